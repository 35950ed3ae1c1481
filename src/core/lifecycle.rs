use crate::core::connection_pool::{ConnectionPool, ShutdownReport};
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Resolves when the process receives an interrupt, or SIGTERM on unix.
pub async fn termination_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for interrupt: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("Interrupt received"),
        _ = terminate => info!("Termination signal received"),
    }
}

/// Ties pool teardown to a shutdown trigger chosen by the owning process.
///
/// The pool is torn down exactly once: new borrows stop, outstanding ones get
/// up to `grace` to come back, then every connection is closed.
pub struct LifecycleManager {
    pool: ConnectionPool,
    grace: Duration,
}

impl LifecycleManager {
    pub fn new(pool: ConnectionPool, grace: Duration) -> Self {
        Self { pool, grace }
    }

    /// Wait for `signal`, then drain and close the pool.
    pub async fn run_until<S>(self, signal: S) -> ShutdownReport
    where
        S: Future<Output = ()>,
    {
        signal.await;
        info!("Shutting down cache client");
        self.pool.shutdown(self.grace).await
    }

    /// Drive `work` until it finishes or `signal` fires, then drain and close the pool.
    ///
    /// Returns the work's output, or `None` when the signal won the race.
    pub async fn run<T, W, S>(self, work: W, signal: S) -> (Option<T>, ShutdownReport)
    where
        W: Future<Output = T>,
        S: Future<Output = ()>,
    {
        let output = tokio::select! {
            output = work => Some(output),
            _ = signal => {
                info!("Shutdown requested before work completed");
                None
            }
        };
        let report = self.pool.shutdown(self.grace).await;
        (output, report)
    }
}
