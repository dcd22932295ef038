//! Graceful shutdown signalling
//!
//! The binary owns one [`ShutdownCoordinator`]. Background tasks hold a
//! [`ShutdownHandle`] and stop when it fires; cleanup steps run through
//! [`ShutdownCoordinator::run_step`] so each one is bounded by a timeout and
//! the process always exits.
//!
//! # Example
//!
//! ```no_run
//! use fishlog_core::shutdown::ShutdownCoordinator;
//! use std::time::Duration;
//!
//! # async fn example() -> std::io::Result<()> {
//! let coordinator = ShutdownCoordinator::new();
//! let mut handle = coordinator.handle();
//!
//! tokio::spawn(async move {
//!     handle.wait_for_shutdown().await;
//!     // stop background work
//! });
//!
//! coordinator.wait_for_signal().await?;
//! coordinator
//!     .run_step("flush", Duration::from_secs(5), async { /* cleanup */ })
//!     .await;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self { shutdown_tx }
    }

    /// Handle a task can await to learn that shutdown has begun
    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shutdown_rx: self.shutdown_tx.subscribe(),
        }
    }

    /// Begin shutdown without waiting for a signal
    pub fn trigger(&self) {
        // No receivers simply means nothing is listening yet
        let _ = self.shutdown_tx.send(());
    }

    /// Wait for SIGTERM or SIGINT, then notify every handle
    ///
    /// # Errors
    ///
    /// Returns an error if the signal handlers cannot be installed.
    pub async fn wait_for_signal(&self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
                _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        self.trigger();
        Ok(())
    }

    /// Run one cleanup step, giving up after `timeout`
    ///
    /// Returns `true` if the step finished in time.
    pub async fn run_step<F>(&self, name: &str, timeout: Duration, step: F) -> bool
    where
        F: Future<Output = ()>,
    {
        match tokio::time::timeout(timeout, step).await {
            Ok(()) => {
                info!(step = %name, "Shutdown step complete");
                true
            }
            Err(_) => {
                warn!(
                    step = %name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Shutdown step timed out"
                );
                false
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ShutdownHandle {
    shutdown_rx: broadcast::Receiver<()>,
}

impl Clone for ShutdownHandle {
    fn clone(&self) -> Self {
        Self {
            shutdown_rx: self.shutdown_rx.resubscribe(),
        }
    }
}

impl ShutdownHandle {
    /// Completes once shutdown has been triggered
    pub async fn wait_for_shutdown(&mut self) {
        let _ = self.shutdown_rx.recv().await;
    }
}
