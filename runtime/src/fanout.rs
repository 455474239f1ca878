//! Workflow fan-out: one batch request becomes one order per subject.
//!
//! Every order is published on the workflow topic keyed by its subject, so
//! orders for the same subject stay in one partition. Publishing is attempted
//! for every subject even after a failure; the [`FanOutReport`] says which
//! orders the bus accepted. Accepted means queued, not processed.

use crosstalk_core::bus::{MessageBus, publish_json};
use crosstalk_core::environment::Clock;
use crosstalk_core::message::{WorkflowId, WorkflowOrder, WorkflowPayload};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};

/// Workflow type used when none is configured.
pub const DEFAULT_WORKFLOW_TYPE: &str = "bill-generation";

/// Result of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FanOutReport {
    /// Number of orders the bus accepted
    pub accepted: usize,
    /// Subjects whose order could not be published
    pub failed: Vec<String>,
    /// Ids of the accepted orders, in request order
    pub workflow_ids: Vec<WorkflowId>,
}

/// Expands subject lists into workflow orders.
pub struct WorkflowFanOut {
    bus: Arc<dyn MessageBus>,
    topic: String,
    workflow_type: String,
    clock: Arc<dyn Clock>,
}

impl WorkflowFanOut {
    /// Create a fan-out publishing [`DEFAULT_WORKFLOW_TYPE`] orders on `topic`.
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>, topic: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            bus,
            topic: topic.into(),
            workflow_type: DEFAULT_WORKFLOW_TYPE.to_string(),
            clock,
        }
    }

    /// Publish orders of `workflow_type` instead of the default.
    #[must_use]
    pub fn with_workflow_type(mut self, workflow_type: impl Into<String>) -> Self {
        self.workflow_type = workflow_type.into();
        self
    }

    /// Build (without publishing) the order for `subject`.
    ///
    /// Ids combine the clock's millisecond timestamp with 64 random bits.
    #[must_use]
    pub fn build_order(&self, subject: &str) -> WorkflowOrder {
        let now = self.clock.now();
        WorkflowOrder {
            workflow_type: self.workflow_type.clone(),
            workflow_id: WorkflowId::new(format!(
                "{}-{:016x}",
                now.timestamp_millis(),
                rand::random::<u64>()
            )),
            create_time: now,
            payload: WorkflowPayload {
                subject_identifier: subject.to_string(),
            },
        }
    }

    /// Publish one order per subject.
    pub async fn fan_out<I, S>(&self, subjects: I) -> FanOutReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut report = FanOutReport::default();

        for subject in subjects {
            let subject = subject.as_ref();
            let order = self.build_order(subject);

            match publish_json(self.bus.as_ref(), &self.topic, Some(subject), &order).await {
                Ok(()) => {
                    info!(
                        workflow_id = %order.workflow_id,
                        workflow_type = %order.workflow_type,
                        subject = %subject,
                        "Workflow order published"
                    );
                    metrics::counter!("fanout.orders_published", "topic" => self.topic.clone())
                        .increment(1);
                    report.accepted += 1;
                    report.workflow_ids.push(order.workflow_id);
                }
                Err(e) => {
                    error!(subject = %subject, error = %e, "Failed to publish workflow order");
                    metrics::counter!("fanout.orders_failed", "topic" => self.topic.clone())
                        .increment(1);
                    report.failed.push(subject.to_string());
                }
            }
        }

        report
    }
}

impl fmt::Debug for WorkflowFanOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowFanOut")
            .field("topic", &self.topic)
            .field("workflow_type", &self.workflow_type)
            .finish_non_exhaustive()
    }
}
