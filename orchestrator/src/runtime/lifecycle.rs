//! Application lifecycle management and graceful shutdown.
//!
//! When a shutdown signal is received (Ctrl+C or SIGTERM):
//! 1. HTTP server stops accepting new connections
//! 2. Shutdown signal broadcast to the consumer and the sweeper
//! 3. Each background task gets `shutdown_timeout` to finish its current work
//! 4. Clean exit

use super::ResultConsumer;
use crate::sweeper::StaleSweeper;
use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Running application with all background tasks.
pub struct Application {
    listener: tokio::net::TcpListener,
    router: axum::Router,
    consumer: ResultConsumer,
    sweeper: Option<StaleSweeper>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_timeout: Duration,
}

impl Application {
    /// Assemble an application.
    ///
    /// `consumer` must have been created with a receiver of `shutdown_tx`.
    #[must_use]
    pub const fn new(
        listener: tokio::net::TcpListener,
        router: axum::Router,
        consumer: ResultConsumer,
        sweeper: Option<StaleSweeper>,
        shutdown_tx: broadcast::Sender<()>,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            listener,
            router,
            consumer,
            sweeper,
            shutdown_tx,
            shutdown_timeout,
        }
    }

    /// Run until Ctrl+C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP server fails.
    pub async fn run(self) -> Result<(), std::io::Error> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `signal` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP server fails.
    pub async fn run_until<F>(self, signal: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut handles: Vec<(&'static str, JoinHandle<()>)> =
            vec![("consumer", self.consumer.spawn())];
        if let Some(sweeper) = self.sweeper {
            handles.push(("sweeper", sweeper.spawn(self.shutdown_tx.subscribe())));
        }

        match self.listener.local_addr() {
            Ok(address) => info!(%address, "HTTP server listening"),
            Err(e) => warn!(error = %e, "HTTP server listening on unknown address"),
        }

        let served = axum::serve(self.listener, self.router)
            .with_graceful_shutdown(signal)
            .await;

        info!("HTTP server stopped, initiating graceful shutdown");
        let _ = self.shutdown_tx.send(());
        Self::await_shutdown(handles, self.shutdown_timeout).await;
        info!("Graceful shutdown complete");

        served
    }

    async fn await_shutdown(handles: Vec<(&'static str, JoinHandle<()>)>, timeout: Duration) {
        for (task, handle) in handles {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => info!(task, "Background task stopped gracefully"),
                Ok(Err(e)) => warn!(task, error = %e, "Background task failed"),
                Err(_) => warn!(task, "Background task shutdown timed out"),
            }
        }
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("consumer", &self.consumer)
            .field("sweeper", &self.sweeper)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
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
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }
}
