//! Question/answer correlation over the bus.
//!
//! A requester publishes a [`Question`] carrying a fresh [`QaIdentifier`] on
//! the questions topic. Some responder consumes it, and if it knows the
//! question's category, publishes an [`Answer`] echoing the identifier on the
//! answers topic. The requester's [`AnswerHandler`] matches the answer back
//! to the waiting [`CorrelationEngine::ask_and_await`] call.
//!
//! ```text
//! requester                          responder
//!   ask_and_await ──► questions-topic ──► QuestionHandler
//!        ▲                                    │ QuestionResponder
//!   PendingAnswers ◄── answers-topic ◄── answer_question
//! ```
//!
//! An unanswered question is not an error: after the timeout the caller gets
//! [`QuestionLifecycle::Unanswered`].

use async_trait::async_trait;
use crosstalk_core::bus::{BusError, MessageBus, publish_json};
use crosstalk_core::handler::{HandlerError, MessageHandler};
use crosstalk_core::message::{Answer, BusMessage, QaIdentifier, Question};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// How a question ended for the requester.
#[derive(Debug, Clone, PartialEq)]
pub enum QuestionLifecycle {
    /// An answer with the question's identifier arrived in time
    Answered(Answer),
    /// No answer arrived before the timeout
    Unanswered(QaIdentifier),
}

impl QuestionLifecycle {
    /// The answer, if one arrived.
    #[must_use]
    pub const fn answer(&self) -> Option<&Answer> {
        match self {
            Self::Answered(answer) => Some(answer),
            Self::Unanswered(_) => None,
        }
    }
}

/// Requester-side registry of questions waiting for an answer.
#[derive(Default)]
pub struct PendingAnswers {
    waiting: Mutex<HashMap<QaIdentifier, oneshot::Sender<Answer>>>,
}

impl PendingAnswers {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<QaIdentifier, oneshot::Sender<Answer>>> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start waiting for the answer to `qa_identifier`.
    ///
    /// Registering the same identifier again replaces the earlier waiter.
    pub fn register(&self, qa_identifier: QaIdentifier) -> oneshot::Receiver<Answer> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(qa_identifier, tx);
        rx
    }

    /// Hand `answer` to whoever waits for its identifier.
    ///
    /// Returns `false` when nobody was waiting (an unknown, expired or
    /// already answered identifier).
    pub fn resolve(&self, answer: Answer) -> bool {
        let Some(waiter) = self.lock().remove(&answer.qa_identifier) else {
            return false;
        };
        waiter.send(answer).is_ok()
    }

    /// Stop waiting for `qa_identifier`. Returns whether it was waiting.
    pub fn cancel(&self, qa_identifier: &QaIdentifier) -> bool {
        self.lock().remove(qa_identifier).is_some()
    }

    /// Number of questions still waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no question is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Removes a pending entry when the waiting call ends, however it ends.
///
/// A caller dropped mid-wait (a handler timeout, a cancelled task) would
/// otherwise leave its entry in the registry forever.
struct PendingEntry<'a> {
    pending: &'a PendingAnswers,
    qa_identifier: QaIdentifier,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        if self.pending.cancel(&self.qa_identifier) {
            debug!(qa_identifier = %self.qa_identifier, "Stopped waiting for answer");
        }
    }
}

impl fmt::Debug for PendingAnswers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingAnswers")
            .field("waiting", &self.len())
            .finish()
    }
}

/// Publishes questions and answers and tracks pending questions.
///
/// Cheap to clone; clones share the bus and the pending registry.
#[derive(Clone)]
pub struct CorrelationEngine {
    bus: Arc<dyn MessageBus>,
    questions_topic: String,
    answers_topic: String,
    pending: Arc<PendingAnswers>,
}

impl CorrelationEngine {
    /// Create an engine publishing questions on `questions_topic` and answers
    /// on `answers_topic`.
    #[must_use]
    pub fn new(
        bus: Arc<dyn MessageBus>,
        questions_topic: impl Into<String>,
        answers_topic: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            questions_topic: questions_topic.into(),
            answers_topic: answers_topic.into(),
            pending: Arc::new(PendingAnswers::new()),
        }
    }

    /// Topic questions are published on.
    #[must_use]
    pub fn questions_topic(&self) -> &str {
        &self.questions_topic
    }

    /// Topic answers are published on.
    #[must_use]
    pub fn answers_topic(&self) -> &str {
        &self.answers_topic
    }

    /// Questions still waiting for an answer.
    #[must_use]
    pub fn pending(&self) -> &Arc<PendingAnswers> {
        &self.pending
    }

    /// Publish a question and return its identifier without waiting.
    ///
    /// The question is keyed by its category.
    ///
    /// # Errors
    ///
    /// Returns the [`BusError`] if the bus rejects the question.
    pub async fn ask_question(
        &self,
        category: &str,
        payload: Value,
    ) -> Result<QaIdentifier, BusError> {
        let question = Question::new(category, payload);
        self.publish_question(&question).await?;
        Ok(question.qa_identifier)
    }

    /// Publish a question and wait up to `timeout` for its answer.
    ///
    /// The waiter is registered before publishing, so an answer can never
    /// arrive unclaimed. It is removed again when this call returns or its
    /// future is dropped.
    ///
    /// # Errors
    ///
    /// Returns the [`BusError`] if the bus rejects the question. A missing
    /// answer is [`QuestionLifecycle::Unanswered`], not an error.
    pub async fn ask_and_await(
        &self,
        category: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<QuestionLifecycle, BusError> {
        let question = Question::new(category, payload);
        let qa_identifier = question.qa_identifier.clone();
        let receiver = self.pending.register(qa_identifier.clone());
        let _entry = PendingEntry {
            pending: &self.pending,
            qa_identifier: qa_identifier.clone(),
        };

        self.publish_question(&question).await?;

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(answer)) => {
                debug!(qa_identifier = %qa_identifier, "Question answered");
                Ok(QuestionLifecycle::Answered(answer))
            }
            Ok(Err(_)) | Err(_) => {
                warn!(
                    qa_identifier = %qa_identifier,
                    category = %category,
                    timeout_ms = timeout.as_millis(),
                    "Question went unanswered"
                );
                Ok(QuestionLifecycle::Unanswered(qa_identifier))
            }
        }
    }

    /// Publish `answer` for the question identified by `qa_identifier`,
    /// keyed by the identifier.
    ///
    /// # Errors
    ///
    /// Returns the [`BusError`] if the bus rejects the answer.
    pub async fn answer_question(
        &self,
        answer: Value,
        qa_identifier: &QaIdentifier,
    ) -> Result<(), BusError> {
        let answer = Answer::new(qa_identifier.clone(), answer);
        publish_json(
            self.bus.as_ref(),
            &self.answers_topic,
            Some(qa_identifier.as_str()),
            &answer,
        )
        .await?;
        debug!(qa_identifier = %qa_identifier, topic = %self.answers_topic, "Answer published");
        Ok(())
    }

    /// A handler for the answers topic feeding this engine's pending registry.
    #[must_use]
    pub fn answer_handler(&self) -> AnswerHandler {
        AnswerHandler::new(self.pending.clone())
    }

    async fn publish_question(&self, question: &Question) -> Result<(), BusError> {
        publish_json(
            self.bus.as_ref(),
            &self.questions_topic,
            Some(&question.question_category),
            question,
        )
        .await?;
        info!(
            qa_identifier = %question.qa_identifier,
            category = %question.question_category,
            topic = %self.questions_topic,
            "Question published"
        );
        Ok(())
    }
}

impl fmt::Debug for CorrelationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelationEngine")
            .field("questions_topic", &self.questions_topic)
            .field("answers_topic", &self.answers_topic)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

type Fallback = Arc<dyn Fn(Answer) + Send + Sync>;

/// Answers-topic handler resolving pending questions.
///
/// Answers nobody waits for go to the fallback if one is set, otherwise they
/// are logged at debug and dropped: they may belong to another requester
/// sharing the topic.
#[derive(Clone)]
pub struct AnswerHandler {
    pending: Arc<PendingAnswers>,
    fallback: Option<Fallback>,
}

impl AnswerHandler {
    /// Create a handler resolving entries of `pending`.
    #[must_use]
    pub const fn new(pending: Arc<PendingAnswers>) -> Self {
        Self {
            pending,
            fallback: None,
        }
    }

    /// Call `fallback` with every answer nobody was waiting for.
    #[must_use]
    pub fn with_fallback(mut self, fallback: impl Fn(Answer) + Send + Sync + 'static) -> Self {
        self.fallback = Some(Arc::new(fallback));
        self
    }
}

#[async_trait]
impl MessageHandler for AnswerHandler {
    async fn handle(&self, message: &BusMessage) -> Result<(), HandlerError> {
        let answer: Answer = message.decode()?;
        let qa_identifier = answer.qa_identifier.clone();

        if self.pending.resolve(answer.clone()) {
            debug!(qa_identifier = %qa_identifier, "Answer matched a pending question");
        } else if let Some(fallback) = &self.fallback {
            fallback(answer);
        } else {
            debug!(qa_identifier = %qa_identifier, "Answer has no pending question; dropped");
        }
        Ok(())
    }
}

/// Composes the answer to questions of one category.
#[async_trait]
pub trait QuestionResponder: Send + Sync + 'static {
    /// Build the answer body for `question`.
    ///
    /// Return `Value::Null` when there is nothing to say about the subject.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] if the answer cannot be composed; no answer
    /// is published then.
    async fn respond(&self, question: &Question) -> Result<Value, HandlerError>;
}

/// What the responder side did with a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestionOutcome {
    /// An answer was published
    Answered(QaIdentifier),
    /// No responder handles the category; nothing was published
    Ignored {
        /// The question's category
        category: String,
    },
}

/// Questions-topic handler answering the categories it has responders for.
pub struct QuestionHandler {
    engine: CorrelationEngine,
    responders: HashMap<String, Arc<dyn QuestionResponder>>,
    answer_delay: Duration,
}

impl QuestionHandler {
    /// Create a handler publishing answers through `engine`.
    #[must_use]
    pub fn new(engine: CorrelationEngine) -> Self {
        Self {
            engine,
            responders: HashMap::new(),
            answer_delay: Duration::ZERO,
        }
    }

    /// Answer questions of `category` with `responder`.
    #[must_use]
    pub fn with_responder(
        mut self,
        category: impl Into<String>,
        responder: Arc<dyn QuestionResponder>,
    ) -> Self {
        self.responders.insert(category.into(), responder);
        self
    }

    /// Wait `delay` before composing each answer.
    #[must_use]
    pub const fn with_answer_delay(mut self, delay: Duration) -> Self {
        self.answer_delay = delay;
        self
    }

    /// Categories this handler answers, sorted.
    #[must_use]
    pub fn categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = self.responders.keys().cloned().collect();
        categories.sort();
        categories
    }

    /// Decode, answer and publish one question.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] if the message is not a question, the
    /// responder fails or the answer cannot be published.
    pub async fn process(&self, message: &BusMessage) -> Result<QuestionOutcome, HandlerError> {
        let question: Question = message.decode()?;

        let Some(responder) = self.responders.get(&question.question_category) else {
            info!(
                qa_identifier = %question.qa_identifier,
                category = %question.question_category,
                "No responder for question category; ignored"
            );
            return Ok(QuestionOutcome::Ignored {
                category: question.question_category,
            });
        };

        if !self.answer_delay.is_zero() {
            tokio::time::sleep(self.answer_delay).await;
        }

        let answer = responder.respond(&question).await?;
        self.engine
            .answer_question(answer, &question.qa_identifier)
            .await?;

        info!(
            qa_identifier = %question.qa_identifier,
            category = %question.question_category,
            "Question answered"
        );
        Ok(QuestionOutcome::Answered(question.qa_identifier))
    }
}

#[async_trait]
impl MessageHandler for QuestionHandler {
    async fn handle(&self, message: &BusMessage) -> Result<(), HandlerError> {
        self.process(message).await.map(|_| ())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic
mod tests {
    use super::*;
    use crosstalk_testing::InMemoryBus;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoResponder;

    #[async_trait]
    impl QuestionResponder for EchoResponder {
        async fn respond(&self, question: &Question) -> Result<Value, HandlerError> {
            Ok(json!({ "echo": question.payload }))
        }
    }

    fn engine(bus: &InMemoryBus) -> CorrelationEngine {
        CorrelationEngine::new(Arc::new(bus.clone()), "questions-topic", "answers-topic")
    }

    fn question_message(category: &str, qa: &str) -> BusMessage {
        let question = Question {
            qa_identifier: QaIdentifier::from(qa),
            question_category: category.to_string(),
            payload: json!({ "customerIdentifier": "928" }),
        };
        BusMessage::new("questions-topic", serde_json::to_vec(&question).unwrap())
    }

    #[tokio::test]
    async fn ask_question_publishes_keyed_by_category() {
        let bus = InMemoryBus::new();
        let qa = engine(&bus)
            .ask_question("customer", json!({ "customerIdentifier": "928" }))
            .await
            .unwrap();

        let published = bus.published("questions-topic");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].key.as_deref(), Some("customer"));
        let question: Question = published[0].decode().unwrap();
        assert_eq!(question.qa_identifier, qa);
        assert_eq!(question.payload["customerIdentifier"], "928");
    }

    #[tokio::test]
    async fn answer_question_echoes_identifier() {
        let bus = InMemoryBus::new();
        let qa = QaIdentifier::from("qa-42");

        engine(&bus)
            .answer_question(json!({ "customerId": "928" }), &qa)
            .await
            .unwrap();

        let answers: Vec<Answer> = bus.published_json("answers-topic");
        assert_eq!(answers, vec![Answer::new(qa, json!({ "customerId": "928" }))]);
        assert_eq!(bus.published("answers-topic")[0].key.as_deref(), Some("qa-42"));
    }

    #[tokio::test]
    async fn ask_and_await_resolves_when_answer_arrives() {
        let bus = InMemoryBus::new();
        let engine = engine(&bus);
        let handler = engine.answer_handler();

        let watcher = bus.clone();
        tokio::spawn(async move {
            let questions = watcher
                .wait_for_published("questions-topic", 1, Duration::from_secs(5))
                .await
                .expect("question should be published");
            let question: Question = questions[0].decode().unwrap();
            let answer = Answer::new(question.qa_identifier, json!({ "customerId": "928" }));
            let message = BusMessage::new("answers-topic", serde_json::to_vec(&answer).unwrap());
            handler.handle(&message).await.unwrap();
        });

        let outcome = engine
            .ask_and_await("customer", json!({}), Duration::from_secs(5))
            .await
            .unwrap();

        let answer = outcome.answer().expect("should be answered");
        assert_eq!(answer.answer["customerId"], "928");
        assert!(engine.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ask_and_await_reports_unanswered_on_timeout() {
        let bus = InMemoryBus::new();
        let engine = engine(&bus);

        let outcome = engine
            .ask_and_await("customer", json!({}), Duration::from_millis(100))
            .await
            .unwrap();

        assert!(matches!(outcome, QuestionLifecycle::Unanswered(_)));
        assert!(engine.pending().is_empty());
    }

    #[tokio::test]
    async fn failed_publish_leaves_nothing_pending() {
        let bus = InMemoryBus::new();
        bus.fail_publishes_to("questions-topic");
        let engine = engine(&bus);

        let result = engine
            .ask_and_await("customer", json!({}), Duration::from_secs(1))
            .await;

        assert!(matches!(result, Err(BusError::PublishFailed { .. })));
        assert!(engine.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn handler_timeout_does_not_leak_pending_questions() {
        use crate::router::{DispatchOutcome, TopicRouter};

        struct AskingHandler(CorrelationEngine);

        #[async_trait]
        impl MessageHandler for AskingHandler {
            async fn handle(&self, _message: &BusMessage) -> Result<(), HandlerError> {
                self.0
                    .ask_and_await("customer", json!({}), Duration::from_secs(10))
                    .await?;
                Ok(())
            }
        }

        let bus = InMemoryBus::new();
        let engine = engine(&bus);
        let mut router = TopicRouter::new().with_handler_timeout(Duration::from_millis(50));
        router.register("workflow-queue", Arc::new(AskingHandler(engine.clone())));

        for _ in 0..3 {
            let outcome = router
                .dispatch(&BusMessage::new("workflow-queue", "{}"))
                .await;
            assert!(matches!(outcome, DispatchOutcome::Failed(_)));
        }

        assert_eq!(bus.published("questions-topic").len(), 3);
        assert!(engine.pending().is_empty());
    }

    #[test]
    fn resolve_only_claims_registered_identifiers() {
        let pending = PendingAnswers::new();
        let mut rx = pending.register(QaIdentifier::from("known"));

        assert!(!pending.resolve(Answer::new(QaIdentifier::from("stranger"), Value::Null)));
        assert!(pending.resolve(Answer::new(QaIdentifier::from("known"), json!(1))));
        assert!(!pending.resolve(Answer::new(QaIdentifier::from("known"), json!(2))));
        assert_eq!(rx.try_recv().unwrap().answer, json!(1));
    }

    #[tokio::test]
    async fn unclaimed_answers_reach_fallback() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let handler = AnswerHandler::new(Arc::new(PendingAnswers::new())).with_fallback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let answer = Answer::new(QaIdentifier::from("other"), Value::Null);
        let message = BusMessage::new("answers-topic", serde_json::to_vec(&answer).unwrap());
        handler.handle(&message).await.unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn question_with_known_category_is_answered() {
        let bus = InMemoryBus::new();
        let handler =
            QuestionHandler::new(engine(&bus)).with_responder("customer", Arc::new(EchoResponder));

        let outcome = handler
            .process(&question_message("customer", "qa-1"))
            .await
            .unwrap();

        assert_eq!(outcome, QuestionOutcome::Answered(QaIdentifier::from("qa-1")));
        let answers: Vec<Answer> = bus.published_json("answers-topic");
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].answer["echo"]["customerIdentifier"], "928");
    }

    #[tokio::test]
    async fn unknown_category_never_produces_an_answer() {
        let bus = InMemoryBus::new();
        let handler =
            QuestionHandler::new(engine(&bus)).with_responder("customer", Arc::new(EchoResponder));

        let outcome = handler
            .process(&question_message("invoice", "qa-2"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            QuestionOutcome::Ignored {
                category: "invoice".to_string()
            }
        );
        assert!(bus.published("answers-topic").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn answer_delay_is_applied() {
        let bus = InMemoryBus::new();
        let handler = QuestionHandler::new(engine(&bus))
            .with_responder("customer", Arc::new(EchoResponder))
            .with_answer_delay(Duration::from_millis(2500));

        let started = tokio::time::Instant::now();
        handler
            .process(&question_message("customer", "qa-3"))
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(2500));
        assert_eq!(bus.published("answers-topic").len(), 1);
    }

    #[tokio::test]
    async fn malformed_question_is_a_handler_error() {
        let bus = InMemoryBus::new();
        let handler = QuestionHandler::new(engine(&bus));

        let result = handler
            .handle(&BusMessage::new("questions-topic", "not json"))
            .await;

        assert!(matches!(result, Err(HandlerError::Malformed(_))));
        assert!(bus.published("answers-topic").is_empty());
    }
}
