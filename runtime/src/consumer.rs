//! Subscribe-and-dispatch loop.
//!
//! A [`Consumer`] owns one subscription. It pulls messages one at a time and
//! hands each to a [`TopicRouter`], awaiting the handler before pulling the
//! next message, so handlers of one subscription never overlap.
//!
//! # Pattern
//!
//! ```text
//! loop {
//!     subscribe(topics)
//!     for message in stream {
//!         router.dispatch(message)   // never fails
//!         check shutdown signal
//!     }
//!     stream ended => reconnect (if the policy allows) or return Disconnected
//! }
//! ```
//!
//! With the default [`ReconnectPolicy`] a lost connection ends the consumer
//! with [`BusError::Disconnected`]; service binaries treat that as fatal.
//!
//! # Example
//!
//! ```rust,ignore
//! let consumer = Consumer::new("crm", bus.clone(), router.clone(), shutdown_rx);
//! let handle = consumer.spawn();
//!
//! // Later
//! handle.await??;
//! ```

use crate::retry::ReconnectPolicy;
use crate::router::TopicRouter;
use crosstalk_core::bus::{BusError, MessageBus, MessageStream};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Why a subscription stopped.
enum StreamEnd {
    Shutdown,
    Disconnected { processed: usize },
}

/// Consumer of one subscription, dispatching through a [`TopicRouter`].
pub struct Consumer {
    /// Consumer name (for logging)
    name: String,
    /// Topics to subscribe to (defaults to the router's topics)
    topics: Vec<String>,
    /// Bus to consume from
    bus: Arc<dyn MessageBus>,
    /// Router receiving every message
    router: Arc<TopicRouter>,
    /// Shutdown signal receiver
    shutdown: broadcast::Receiver<()>,
    /// What to do when the subscription ends
    reconnect: ReconnectPolicy,
}

impl Consumer {
    /// Create a consumer for every topic registered on `router`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        bus: Arc<dyn MessageBus>,
        router: Arc<TopicRouter>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let topics = router.topics();
        Self {
            name: name.into(),
            topics,
            bus,
            router,
            shutdown,
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Subscribe to `topics` instead of the router's topics.
    ///
    /// Messages on topics without a handler are then dispatched as unrouted.
    #[must_use]
    pub fn with_topics(mut self, topics: Vec<String>) -> Self {
        self.topics = topics;
        self
    }

    /// Set the reconnect policy (default: fatal on disconnect).
    #[must_use]
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Topics this consumer subscribes to.
    #[must_use]
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Spawn the consumer as a background task.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<Result<(), BusError>> {
        tokio::spawn(async move { self.run().await })
    }

    /// Run until shutdown (`Ok`) or until the bus is lost for good (`Err`).
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Disconnected`] when the subscription ends and the
    /// reconnect policy is exhausted, or the last subscription error if
    /// subscribing keeps failing.
    pub async fn run(&mut self) -> Result<(), BusError> {
        info!(consumer = %self.name, topics = ?self.topics, "Consumer started");
        let mut attempts = 0;

        loop {
            let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();

            let subscribed = tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Consumer received shutdown signal");
                    return Ok(());
                }
                result = self.bus.subscribe(&topics) => result,
            };

            let failure = match subscribed {
                Ok(mut stream) => {
                    info!(consumer = %self.name, topics = ?self.topics, "Subscribed to topics");
                    match self.process_stream(&mut stream).await {
                        StreamEnd::Shutdown => {
                            info!(consumer = %self.name, "Consumer stopped");
                            return Ok(());
                        }
                        StreamEnd::Disconnected { processed } => {
                            if processed > 0 {
                                attempts = 0;
                            }
                            BusError::Disconnected {
                                topics: self.topics.clone(),
                            }
                        }
                    }
                }
                Err(e) => e,
            };

            if !self.reconnect.allows(attempts) {
                error!(consumer = %self.name, error = %failure, "Lost the message bus; giving up");
                return Err(failure);
            }

            let delay = self.reconnect.delay_for_attempt(attempts);
            attempts += 1;
            warn!(
                consumer = %self.name,
                error = %failure,
                attempt = attempts,
                delay_ms = delay.as_millis(),
                "Lost the message bus; reconnecting"
            );

            tokio::select! {
                _ = self.shutdown.recv() => return Ok(()),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn process_stream(&mut self, stream: &mut MessageStream) -> StreamEnd {
        let mut processed = 0;
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => return StreamEnd::Shutdown,
                next = stream.next() => match next {
                    Some(Ok(message)) => {
                        self.router.dispatch(&message).await;
                        processed += 1;
                    }
                    Some(Err(e)) => {
                        error!(consumer = %self.name, error = %e, "Error receiving message from stream");
                    }
                    None => {
                        warn!(consumer = %self.name, processed, "Message stream ended");
                        return StreamEnd::Disconnected { processed };
                    }
                },
            }
        }
    }
}
