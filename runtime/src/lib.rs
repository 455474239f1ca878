//! # Crosstalk Runtime
//!
//! The moving parts of a Crosstalk service: everything between the bus
//! subscription and the domain code.
//!
//! ## Core Components
//!
//! - [`router::TopicRouter`]: maps topics to handlers; dispatch never fails
//! - [`consumer::Consumer`]: subscribe-and-dispatch loop with shutdown and
//!   reconnect handling
//! - [`correlation::CorrelationEngine`]: question/answer correlation
//! - [`fanout::WorkflowFanOut`]: one batch request, one order per subject
//! - [`records::RecordStore`]: in-memory keyed registry of JSON records
//! - [`state::NameTally`]: name occurrence counting over a state store
//!
//! ## Example
//!
//! ```ignore
//! use crosstalk_runtime::{Consumer, CorrelationEngine, QuestionHandler, TopicRouter};
//!
//! let engine = CorrelationEngine::new(bus.clone(), "questions-topic", "answers-topic");
//! let questions = QuestionHandler::new(engine).with_responder("customer", responder);
//!
//! let mut router = TopicRouter::new();
//! router.register("questions-topic", Arc::new(questions));
//!
//! let consumer = Consumer::new("crm", bus, Arc::new(router), shutdown_rx);
//! consumer.spawn().await??;
//! ```

pub mod consumer;
pub mod correlation;
pub mod fanout;
pub mod records;
pub mod retry;
pub mod router;
pub mod state;

pub use consumer::Consumer;
pub use correlation::{
    AnswerHandler, CorrelationEngine, PendingAnswers, QuestionHandler, QuestionLifecycle,
    QuestionOutcome, QuestionResponder,
};
pub use fanout::{DEFAULT_WORKFLOW_TYPE, FanOutReport, WorkflowFanOut};
pub use records::{RecordError, RecordStore, Written, read_seed_file};
pub use retry::ReconnectPolicy;
pub use router::{DispatchOutcome, TopicRouter};
pub use state::{InMemoryStateStore, NameTally};
