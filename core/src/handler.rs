//! Message handler trait.
//!
//! A [`MessageHandler`] processes one consumed message. Handlers are registered
//! per topic on a router; the router awaits each handler to completion before
//! the consumer pulls the next message from the same subscription.
//!
//! # Example
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use crosstalk_core::handler::{HandlerError, MessageHandler};
//! use crosstalk_core::message::{BusMessage, Question};
//!
//! struct LogQuestions;
//!
//! #[async_trait]
//! impl MessageHandler for LogQuestions {
//!     async fn handle(&self, message: &BusMessage) -> Result<(), HandlerError> {
//!         let question: Question = message.decode()?;
//!         tracing::info!(category = %question.question_category, "Question received");
//!         Ok(())
//!     }
//! }
//! ```

use crate::bus::BusError;
use crate::message::BusMessage;
use crate::state::StateError;
use async_trait::async_trait;
use std::future::Future;
use thiserror::Error;

/// Errors a handler can report. All of them are contained by the router.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The message body could not be decoded
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Publishing a follow-up message failed
    #[error(transparent)]
    Bus(#[from] BusError),

    /// The state store failed
    #[error(transparent)]
    State(#[from] StateError),

    /// The handler did not finish within its time budget
    #[error("Handler timed out after {0:?}")]
    TimedOut(std::time::Duration),

    /// Any other failure
    #[error("{0}")]
    Other(String),
}

/// Handler for messages consumed from one topic.
///
/// Implementors must be `Send + Sync + 'static` because handlers are shared
/// across async tasks.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one message.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] when the message cannot be processed. The
    /// error is logged at the dispatch boundary; the stream continues.
    async fn handle(&self, message: &BusMessage) -> Result<(), HandlerError>;
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F>(F);

/// Wrap an async closure as a handler.
///
/// ```rust,ignore
/// router.register("names", handler_fn(|message| async move {
///     tracing::info!(body = %message.value_lossy(), "Name received");
///     Ok(())
/// }));
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(BusMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(BusMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, message: &BusMessage) -> Result<(), HandlerError> {
        (self.0)(message.clone()).await
    }
}
