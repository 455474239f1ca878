//! Service lifecycle and graceful shutdown.
//!
//! An [`Application`] owns a service's bus consumers and, optionally, its HTTP
//! server:
//!
//! 1. **Startup**: spawn every consumer, start serving HTTP
//! 2. **Runtime**: run until a shutdown signal or until a consumer loses the bus
//! 3. **Shutdown**: broadcast shutdown to the consumers and give them
//!    `shutdown_timeout` to stop
//!
//! A consumer that loses the bus for good ends the application with
//! [`LifecycleError::Bus`], so the binary exits non-zero instead of running
//! deaf.

use crosstalk_core::bus::BusError;
use crosstalk_runtime::Consumer;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

/// Why a service stopped other than by a shutdown signal.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// A consumer lost the message bus
    #[error(transparent)]
    Bus(#[from] BusError),

    /// The HTTP server failed
    #[error("HTTP server failed: {0}")]
    Server(#[from] std::io::Error),

    /// A consumer task panicked or was cancelled
    #[error("Consumer task failed: {0}")]
    Task(#[from] JoinError),
}

/// A service ready to run.
pub struct Application {
    name: String,
    http: Option<(tokio::net::TcpListener, axum::Router)>,
    consumers: Vec<Consumer>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_timeout: Duration,
}

impl Application {
    /// Create an application whose consumers listen on `shutdown_tx`.
    #[must_use]
    pub fn new(name: impl Into<String>, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self {
            name: name.into(),
            http: None,
            consumers: Vec::new(),
            shutdown_tx,
            shutdown_timeout: Duration::from_secs(10),
        }
    }

    /// Serve `router` on `listener`.
    #[must_use]
    pub fn with_http(mut self, listener: tokio::net::TcpListener, router: axum::Router) -> Self {
        self.http = Some((listener, router));
        self
    }

    /// Run `consumer` alongside the server.
    #[must_use]
    pub fn with_consumer(mut self, consumer: Consumer) -> Self {
        self.consumers.push(consumer);
        self
    }

    /// Time consumers get to stop after shutdown is broadcast.
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Run until Ctrl+C or SIGTERM, or until a consumer fails.
    ///
    /// # Errors
    ///
    /// See [`Application::run_until`].
    pub async fn run(self) -> Result<(), LifecycleError> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `shutdown` completes, or until a consumer fails.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Bus`] when a consumer gives up on the bus,
    /// [`LifecycleError::Task`] when a consumer task panics and
    /// [`LifecycleError::Server`] when the HTTP server fails.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), LifecycleError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Self {
            name,
            http,
            consumers: to_spawn,
            shutdown_tx,
            shutdown_timeout,
        } = self;

        info!(service = %name, consumer_count = to_spawn.len(), "Starting consumers");
        let mut consumers = JoinSet::new();
        for mut consumer in to_spawn {
            consumers.spawn(async move { consumer.run().await });
        }

        let server = async move {
            match http {
                Some((listener, router)) => {
                    if let Ok(address) = listener.local_addr() {
                        info!(address = %address, "HTTP server listening");
                    }
                    axum::serve(listener, router)
                        .with_graceful_shutdown(shutdown)
                        .await
                }
                None => {
                    shutdown.await;
                    Ok(())
                }
            }
        };

        let outcome = tokio::select! {
            result = server => {
                info!(service = %name, "Shutdown signal received");
                result.map_err(LifecycleError::from)
            }
            Some(joined) = consumers.join_next() => match joined {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(LifecycleError::from(e)),
                Err(e) => Err(LifecycleError::from(e)),
            },
        };

        if let Err(e) = &outcome {
            error!(service = %name, error = %e, "Service stopping after failure");
        }

        let _ = shutdown_tx.send(());
        Self::await_shutdown(&mut consumers, shutdown_timeout).await;

        info!(service = %name, "Shutdown complete");
        outcome
    }

    async fn await_shutdown(consumers: &mut JoinSet<Result<(), BusError>>, timeout: Duration) {
        let drained = tokio::time::timeout(timeout, async {
            while let Some(joined) = consumers.join_next().await {
                match joined {
                    Ok(Ok(())) => info!("Consumer stopped gracefully"),
                    Ok(Err(e)) => warn!(error = %e, "Consumer stopped with an error"),
                    Err(e) => warn!(error = %e, "Consumer task failed"),
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(remaining = consumers.len(), "Consumer shutdown timed out");
            consumers.abort_all();
        }
    }
}

/// Wait for Ctrl+C or SIGTERM.
///
/// A handler that cannot be installed is logged and never fires.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)] // Test code can use unwrap/panic
mod tests {
    use super::*;
    use crosstalk_core::handler::handler_fn;
    use crosstalk_runtime::TopicRouter;
    use crosstalk_testing::InMemoryBus;
    use std::sync::Arc;

    fn consumer(bus: &InMemoryBus, shutdown_tx: &broadcast::Sender<()>) -> Consumer {
        let mut router = TopicRouter::new();
        router.register("names", Arc::new(handler_fn(|_| async { Ok(()) })));
        Consumer::new(
            "names",
            Arc::new(bus.clone()),
            Arc::new(router),
            shutdown_tx.subscribe(),
        )
    }

    #[tokio::test]
    async fn shutdown_stops_consumers() {
        let bus = InMemoryBus::new();
        let (shutdown_tx, _) = broadcast::channel(1);
        let app = Application::new("test", shutdown_tx.clone())
            .with_consumer(consumer(&bus, &shutdown_tx));

        let result = app
            .run_until(tokio::time::sleep(Duration::from_millis(50)))
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn lost_bus_ends_the_application() {
        let bus = InMemoryBus::new();
        let (shutdown_tx, _) = broadcast::channel(1);
        let app = Application::new("test", shutdown_tx.clone())
            .with_consumer(consumer(&bus, &shutdown_tx));

        let disconnector = bus.clone();
        tokio::spawn(async move {
            while disconnector.subscriber_count() == 0 {
                tokio::task::yield_now().await;
            }
            disconnector.disconnect_all();
        });

        let result = app.run_until(std::future::pending()).await;

        match result {
            Err(LifecycleError::Bus(BusError::Disconnected { topics })) => {
                assert_eq!(topics, vec!["names".to_string()]);
            }
            other => panic!("expected a bus disconnect, got {other:?}"),
        }
    }
}
