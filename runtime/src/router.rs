//! Topic-to-handler dispatch.
//!
//! A [`TopicRouter`] maps each topic name to at most one [`MessageHandler`].
//! Consumers hand every message they pull from the bus to
//! [`TopicRouter::dispatch`], which never fails: a missing handler is a logged
//! [`DispatchOutcome::Unrouted`], a handler error (or panic, or timeout) is a
//! logged [`DispatchOutcome::Failed`]. Either way the read loop carries on
//! with the next message.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut router = TopicRouter::new().with_handler_timeout(Duration::from_secs(30));
//! router.register("questions-topic", Arc::new(question_handler));
//! router.register("answers-topic", Arc::new(answer_handler));
//!
//! let outcome = router.dispatch(&message).await;
//! ```

use crosstalk_core::handler::{HandlerError, MessageHandler};
use crosstalk_core::message::BusMessage;
use futures::FutureExt;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// What happened to a dispatched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The registered handler processed the message
    Handled,
    /// No handler is registered for the message's topic; the message was dropped
    Unrouted,
    /// The handler failed; the failure was logged and contained
    Failed(String),
}

/// Registry of topic handlers with contained dispatch.
///
/// Built once at service startup and then shared (typically in an `Arc`) by
/// the consumer tasks.
#[derive(Default)]
pub struct TopicRouter {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
    handler_timeout: Option<Duration>,
}

impl TopicRouter {
    /// Create an empty router with unbounded handler execution.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any handler invocation that takes longer than `timeout`.
    #[must_use]
    pub const fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }

    /// Register `handler` for `topic`, replacing any previous handler.
    ///
    /// Registering twice is not an error; the last registration wins.
    pub fn register(
        &mut self,
        topic: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> &mut Self {
        let topic = topic.into();
        if self.handlers.insert(topic.clone(), handler).is_some() {
            debug!(topic = %topic, "Replaced message handler for topic");
        } else {
            debug!(topic = %topic, "Registered message handler for topic");
        }
        self
    }

    /// Whether a handler is registered for `topic`.
    #[must_use]
    pub fn is_registered(&self, topic: &str) -> bool {
        self.handlers.contains_key(topic)
    }

    /// Registered topics, sorted.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.handlers.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Route `message` to the handler registered for its topic.
    ///
    /// The handler runs to completion (or until the handler timeout) before
    /// this returns.
    pub async fn dispatch(&self, message: &BusMessage) -> DispatchOutcome {
        let Some(handler) = self.handlers.get(&message.topic) else {
            warn!(
                topic = %message.topic,
                offset = ?message.offset,
                "No message handler is registered for topic; message dropped"
            );
            metrics::counter!("router.unrouted", "topic" => message.topic.clone()).increment(1);
            return DispatchOutcome::Unrouted;
        };

        debug!(
            topic = %message.topic,
            partition = ?message.partition,
            offset = ?message.offset,
            "Dispatching message"
        );

        match self.invoke(handler.as_ref(), message).await {
            Ok(()) => {
                metrics::counter!("router.dispatched", "topic" => message.topic.clone())
                    .increment(1);
                DispatchOutcome::Handled
            }
            Err(e) => {
                error!(
                    topic = %message.topic,
                    offset = ?message.offset,
                    error = %e,
                    "Message handler failed"
                );
                metrics::counter!("router.handler_failures", "topic" => message.topic.clone())
                    .increment(1);
                DispatchOutcome::Failed(e.to_string())
            }
        }
    }

    async fn invoke(
        &self,
        handler: &dyn MessageHandler,
        message: &BusMessage,
    ) -> Result<(), HandlerError> {
        let guarded = AssertUnwindSafe(handler.handle(message)).catch_unwind();

        let result = match self.handler_timeout {
            Some(limit) => tokio::time::timeout(limit, guarded)
                .await
                .map_err(|_| HandlerError::TimedOut(limit))?,
            None => guarded.await,
        };

        result.unwrap_or_else(|panic| Err(HandlerError::Other(panic_message(panic.as_ref()))))
    }
}

impl fmt::Debug for TopicRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicRouter")
            .field("topics", &self.topics())
            .field("handler_timeout", &self.handler_timeout)
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("handler panicked: {detail}")
}
