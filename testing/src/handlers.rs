//! Handlers for router and consumer tests.

use async_trait::async_trait;
use crosstalk_core::handler::{HandlerError, MessageHandler};
use crosstalk_core::message::BusMessage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Handler that records every message it receives.
///
/// Clones share the same record, so a test can keep one clone and register
/// the other.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    received: Arc<Mutex<Vec<BusMessage>>>,
}

impl RecordingHandler {
    /// Create a handler with an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages received so far.
    #[must_use]
    pub fn received(&self) -> Vec<BusMessage> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of messages received so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, message: &BusMessage) -> Result<(), HandlerError> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(())
    }
}

/// Handler that fails every message and counts the attempts.
#[derive(Clone, Default)]
pub struct FailingHandler {
    attempts: Arc<AtomicUsize>,
}

impl FailingHandler {
    /// Create a failing handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages this handler was asked to process.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageHandler for FailingHandler {
    async fn handle(&self, message: &BusMessage) -> Result<(), HandlerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(HandlerError::Other(format!(
            "refusing message from topic {}",
            message.topic
        )))
    }
}
