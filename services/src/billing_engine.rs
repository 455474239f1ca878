//! Billing engine: generates one bill line per `bill-generation` order.
//!
//! For every order the engine asks the CRM about the order's customer and
//! waits for the answer. The answers topic must be consumed by a different
//! [`Consumer`](crosstalk_runtime::Consumer) than the workflow topic: a
//! consumer awaits each handler, so an answer queued behind the order waiting
//! for it would only be seen after the timeout.

use crate::crm::{CUSTOMER_CATEGORY, CUSTOMER_IDENTIFIER_FIELD};
use async_trait::async_trait;
use crosstalk_core::handler::{HandlerError, MessageHandler};
use crosstalk_core::message::{BusMessage, WorkflowId, WorkflowOrder};
use crosstalk_runtime::{CorrelationEngine, DEFAULT_WORKFLOW_TYPE, QuestionLifecycle};
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// What the engine did with one workflow order.
#[derive(Debug, Clone, PartialEq)]
pub enum BillingOutcome {
    /// A bill line was generated for the customer
    Billed {
        /// The order
        workflow_id: WorkflowId,
        /// The customer's record as the CRM answered it
        customer: Value,
    },
    /// The CRM does not know the customer
    CustomerUnknown {
        /// The order
        workflow_id: WorkflowId,
        /// The customer asked about
        customer_id: String,
    },
    /// The CRM did not answer in time
    Unanswered {
        /// The order
        workflow_id: WorkflowId,
        /// The customer asked about
        customer_id: String,
    },
    /// The order is of a workflow type this engine does not run
    Ignored {
        /// The order's workflow type
        workflow_type: String,
    },
}

impl BillingOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Billed { .. } => "billed",
            Self::CustomerUnknown { .. } => "customer_unknown",
            Self::Unanswered { .. } => "unanswered",
            Self::Ignored { .. } => "ignored",
        }
    }
}

type OutcomeListener = Arc<dyn Fn(&BillingOutcome) + Send + Sync>;

/// Workflow-topic handler for billing orders.
pub struct BillingEngine {
    engine: CorrelationEngine,
    answer_timeout: Duration,
    workflow_type: String,
    listener: Option<OutcomeListener>,
}

impl BillingEngine {
    /// Create an engine asking questions through `engine` and waiting up to
    /// `answer_timeout` for each answer.
    #[must_use]
    pub fn new(engine: CorrelationEngine, answer_timeout: Duration) -> Self {
        Self {
            engine,
            answer_timeout,
            workflow_type: DEFAULT_WORKFLOW_TYPE.to_string(),
            listener: None,
        }
    }

    /// Run orders of `workflow_type` instead of `bill-generation`.
    #[must_use]
    pub fn with_workflow_type(mut self, workflow_type: impl Into<String>) -> Self {
        self.workflow_type = workflow_type.into();
        self
    }

    /// Call `listener` with the outcome of every processed order.
    #[must_use]
    pub fn with_outcome_listener(
        mut self,
        listener: impl Fn(&BillingOutcome) + Send + Sync + 'static,
    ) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Decode one order, ask about its customer and produce the bill line.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] if the message is not a workflow order or
    /// the question cannot be published.
    pub async fn process(&self, message: &BusMessage) -> Result<BillingOutcome, HandlerError> {
        let order: WorkflowOrder = message.decode()?;
        let outcome = self.bill(order).await?;

        metrics::counter!("billing.orders", "outcome" => outcome.label()).increment(1);
        if let Some(listener) = &self.listener {
            listener(&outcome);
        }
        Ok(outcome)
    }

    async fn bill(&self, order: WorkflowOrder) -> Result<BillingOutcome, HandlerError> {
        if order.workflow_type != self.workflow_type {
            info!(
                workflow_id = %order.workflow_id,
                workflow_type = %order.workflow_type,
                "Workflow type not handled; order ignored"
            );
            return Ok(BillingOutcome::Ignored {
                workflow_type: order.workflow_type,
            });
        }

        let customer_id = order.payload.subject_identifier;
        let lifecycle = self
            .engine
            .ask_and_await(
                CUSTOMER_CATEGORY,
                json!({ CUSTOMER_IDENTIFIER_FIELD: customer_id }),
                self.answer_timeout,
            )
            .await?;

        let outcome = match lifecycle {
            QuestionLifecycle::Answered(answer) if answer.answer.is_null() => {
                warn!(
                    workflow_id = %order.workflow_id,
                    customer_id = %customer_id,
                    "Customer unknown to the CRM; no bill generated"
                );
                BillingOutcome::CustomerUnknown {
                    workflow_id: order.workflow_id,
                    customer_id,
                }
            }
            QuestionLifecycle::Answered(answer) => {
                info!(
                    workflow_id = %order.workflow_id,
                    customer_id = %customer_id,
                    customer = %BillLine(&answer.answer),
                    created = %order.create_time,
                    "Bill generated"
                );
                BillingOutcome::Billed {
                    workflow_id: order.workflow_id,
                    customer: answer.answer,
                }
            }
            QuestionLifecycle::Unanswered(qa_identifier) => {
                warn!(
                    workflow_id = %order.workflow_id,
                    customer_id = %customer_id,
                    qa_identifier = %qa_identifier,
                    "CRM did not answer; no bill generated"
                );
                BillingOutcome::Unanswered {
                    workflow_id: order.workflow_id,
                    customer_id,
                }
            }
        };
        Ok(outcome)
    }
}

#[async_trait]
impl MessageHandler for BillingEngine {
    async fn handle(&self, message: &BusMessage) -> Result<(), HandlerError> {
        self.process(message).await.map(|_| ())
    }
}

impl fmt::Debug for BillingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BillingEngine")
            .field("workflow_type", &self.workflow_type)
            .field("answer_timeout", &self.answer_timeout)
            .finish_non_exhaustive()
    }
}

/// Addressee of a bill: name and city when the record has them.
struct BillLine<'a>(&'a Value);

impl fmt::Display for BillLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = |name: &str| self.0.get(name).and_then(Value::as_str).unwrap_or("?");
        write!(
            f,
            "{} {}, {}",
            field("firstName"),
            field("lastName"),
            field("city")
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)] // Test code can use unwrap/panic
mod tests {
    use super::*;
    use crate::crm;
    use crosstalk_core::environment::Clock;
    use crosstalk_core::message::WorkflowPayload;
    use crosstalk_runtime::{Consumer, RecordStore, TopicRouter};
    use crosstalk_testing::{InMemoryBus, test_clock};
    use std::sync::Mutex;
    use tokio::sync::broadcast;

    const QUESTIONS: &str = "questions-topic";
    const ANSWERS: &str = "answers-topic";

    fn order(workflow_type: &str, customer_id: &str) -> BusMessage {
        let order = WorkflowOrder {
            workflow_type: workflow_type.to_string(),
            workflow_id: WorkflowId::new("1735689600000-00000000000000aa"),
            create_time: test_clock().now(),
            payload: WorkflowPayload {
                subject_identifier: customer_id.to_string(),
            },
        };
        BusMessage::new("workflow-queue", serde_json::to_vec(&order).unwrap())
    }

    /// Starts a CRM answering from a store holding customer 928, and the
    /// engine's answers consumer.
    async fn start_peers(
        bus: &InMemoryBus,
        engine: &CorrelationEngine,
        shutdown: &broadcast::Sender<()>,
        with_crm: bool,
    ) {
        let mut expected = 1;
        if with_crm {
            let store = Arc::new(RecordStore::new("customerId"));
            store
                .upsert(json!({ "customerId": "928", "firstName": "Molly", "city": "Zeewolde" }))
                .unwrap();
            let crm_engine = CorrelationEngine::new(Arc::new(bus.clone()), QUESTIONS, ANSWERS);
            let mut router = TopicRouter::new();
            router.register(
                QUESTIONS,
                Arc::new(crm::question_handler(crm_engine, store, Duration::ZERO)),
            );
            let _ = Consumer::new("crm", Arc::new(bus.clone()), Arc::new(router), shutdown.subscribe())
                .spawn();
            expected += 1;
        }

        let mut router = TopicRouter::new();
        router.register(ANSWERS, Arc::new(engine.answer_handler()));
        let _ = Consumer::new(
            "billing-answers",
            Arc::new(bus.clone()),
            Arc::new(router),
            shutdown.subscribe(),
        )
        .spawn();

        while bus.subscriber_count() < expected {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn known_customer_is_billed() {
        let bus = InMemoryBus::new();
        let (shutdown, _) = broadcast::channel(1);
        let engine = CorrelationEngine::new(Arc::new(bus.clone()), QUESTIONS, ANSWERS);
        start_peers(&bus, &engine, &shutdown, true).await;
        let billing = BillingEngine::new(engine, Duration::from_secs(5));

        let outcome = billing.process(&order("bill-generation", "928")).await.unwrap();

        match outcome {
            BillingOutcome::Billed { customer, .. } => {
                assert_eq!(customer["firstName"], "Molly");
            }
            other => panic!("expected a bill, got {other:?}"),
        }
        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn unknown_customer_is_reported() {
        let bus = InMemoryBus::new();
        let (shutdown, _) = broadcast::channel(1);
        let engine = CorrelationEngine::new(Arc::new(bus.clone()), QUESTIONS, ANSWERS);
        start_peers(&bus, &engine, &shutdown, true).await;
        let billing = BillingEngine::new(engine, Duration::from_secs(5));

        let outcome = billing.process(&order("bill-generation", "23")).await.unwrap();

        assert_eq!(
            outcome,
            BillingOutcome::CustomerUnknown {
                workflow_id: WorkflowId::new("1735689600000-00000000000000aa"),
                customer_id: "23".to_string(),
            }
        );
        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn missing_crm_leaves_order_unanswered() {
        let bus = InMemoryBus::new();
        let (shutdown, _) = broadcast::channel(1);
        let engine = CorrelationEngine::new(Arc::new(bus.clone()), QUESTIONS, ANSWERS);
        start_peers(&bus, &engine, &shutdown, false).await;
        let billing = BillingEngine::new(engine.clone(), Duration::from_millis(50));

        let outcome = billing.process(&order("bill-generation", "928")).await.unwrap();

        assert!(matches!(outcome, BillingOutcome::Unanswered { .. }));
        assert!(engine.pending().is_empty());
        assert_eq!(bus.published(QUESTIONS).len(), 1);
        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn other_workflow_types_are_ignored() {
        let bus = InMemoryBus::new();
        let engine = CorrelationEngine::new(Arc::new(bus.clone()), QUESTIONS, ANSWERS);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let billing = BillingEngine::new(engine, Duration::from_millis(50))
            .with_outcome_listener(move |outcome| sink.lock().unwrap().push(outcome.clone()));

        let outcome = billing.process(&order("dunning", "928")).await.unwrap();

        assert_eq!(
            outcome,
            BillingOutcome::Ignored {
                workflow_type: "dunning".to_string()
            }
        );
        assert_eq!(bus.total_published(), 0);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_order_is_an_error() {
        let bus = InMemoryBus::new();
        let engine = CorrelationEngine::new(Arc::new(bus.clone()), QUESTIONS, ANSWERS);
        let billing = BillingEngine::new(engine, Duration::from_millis(50));

        let result = billing
            .process(&BusMessage::new("workflow-queue", "not an order"))
            .await;

        assert!(matches!(result, Err(HandlerError::Malformed(_))));
    }

    #[test]
    fn bill_line_tolerates_missing_fields() {
        let line = BillLine(&json!({ "firstName": "Molly", "city": "Zeewolde" })).to_string();
        assert_eq!(line, "Molly ?, Zeewolde");
    }
}
