//! Process shutdown
//!
//! Termination signals stop the background tasks and make one bounded,
//! best-effort attempt to unload the model. A second signal during that
//! attempt exits immediately.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::engine::{ModelState, Scheduler};
use crate::server::RestartFlag;

/// Upper bound on the unload attempt
pub const DEFAULT_UNLOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Exit status used when a second signal forces the exit
pub const FORCED_EXIT_CODE: i32 = 130;

/// How long runtime teardown waits for blocking work still in flight
pub const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Result of the shutdown unload attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
    NothingLoaded,
    Unloaded,
    UnloadFailed(String),
    TimedOut,
}

/// Coordinates the stop signal and the final unload
pub struct ShutdownHandler {
    scheduler: Arc<Scheduler>,
    stop: watch::Sender<bool>,
    unload_timeout: Duration,
}

impl ShutdownHandler {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            scheduler,
            stop,
            unload_timeout: DEFAULT_UNLOAD_TIMEOUT,
        }
    }

    pub fn with_unload_timeout(mut self, timeout: Duration) -> Self {
        self.unload_timeout = timeout;
        self
    }

    /// Stop signal for background tasks; flips to `true` once on shutdown
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }

    pub fn is_triggered(&self) -> bool {
        *self.stop.borrow()
    }

    /// Stop background tasks and unload the model.
    ///
    /// Never fails. Unload errors are logged and reported, and a gate held
    /// past the timeout is abandoned.
    pub async fn release(&self) -> ShutdownOutcome {
        tracing::info!("Shutting down");
        self.stop.send_replace(true);

        if self.scheduler.status().state == ModelState::Empty {
            return ShutdownOutcome::NothingLoaded;
        }

        match tokio::time::timeout(self.unload_timeout, self.scheduler.unload()).await {
            Ok(Ok(())) => ShutdownOutcome::Unloaded,
            Ok(Err(e)) => {
                tracing::warn!("Unload during shutdown failed: {}", e);
                ShutdownOutcome::UnloadFailed(e.to_string())
            }
            Err(_) => {
                tracing::warn!(
                    "Model still busy after {:?}, exiting without unloading",
                    self.unload_timeout
                );
                ShutdownOutcome::TimedOut
            }
        }
    }

    /// Exit the process on the next termination signal
    pub fn arm_forced_exit(&self) {
        tokio::spawn(async {
            let signal = wait_for_termination(None).await;
            tracing::warn!("Received {} again, exiting immediately", signal);
            std::process::exit(FORCED_EXIT_CODE);
        });
    }
}

/// Run `future` on a fresh multi-threaded runtime.
///
/// Once the future completes the runtime is shut down with a bounded wait.
/// Inference abandoned by a timed-out unload keeps running on the blocking
/// pool; it is left behind after `grace` instead of holding the process open.
pub fn block_on_with_grace<F: Future>(future: F, grace: Duration) -> std::io::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let output = runtime.block_on(future);
    runtime.shutdown_timeout(grace);
    Ok(output)
}

/// Wait for SIGINT or SIGTERM, returning the signal name.
///
/// SIGHUP requests an interface restart through `restart` when given.
#[cfg(unix)]
pub async fn wait_for_termination(restart: Option<RestartFlag>) -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sighup) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::hangup()),
    ) {
        (Ok(term), Ok(hup)) => (term, hup),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!("Failed to register signal handlers: {}", e);
            return ctrl_c().await;
        }
    };

    loop {
        tokio::select! {
            name = ctrl_c() => return name,
            _ = sigterm.recv() => return "SIGTERM",
            _ = sighup.recv() => {
                match &restart {
                    Some(flag) => {
                        tracing::info!("Received SIGHUP, restarting the interface");
                        flag.request();
                    }
                    None => tracing::debug!("Ignoring SIGHUP"),
                }
            }
        }
    }
}

#[cfg(not(unix))]
pub async fn wait_for_termination(_restart: Option<RestartFlag>) -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    "SIGINT"
}
