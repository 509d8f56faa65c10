//! Idle eviction
//!
//! Unloads the model once it has gone unused for the configured threshold.
//! The watchdog never waits on the gate: if an inference call holds it, the
//! tick is skipped and the check runs again on the next one.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::scheduler::{IdleCheck, ModelState, Scheduler};

/// Default polling interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Background idle-eviction task
pub struct IdleWatchdog {
    scheduler: Arc<Scheduler>,
    threshold: Duration,
    poll_interval: Duration,
}

impl IdleWatchdog {
    pub fn new(scheduler: Arc<Scheduler>, threshold: Duration) -> Self {
        Self {
            scheduler,
            threshold,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Run on the current runtime until `stop` flips to true or its sender
    /// is dropped
    pub fn spawn(self, stop: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(stop))
    }

    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        tracing::info!(
            "Idle watchdog started ({}s threshold)",
            self.threshold.as_secs()
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *stop.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::debug!("Idle watchdog stopped");
    }

    /// One eviction check
    pub async fn tick(&self) -> IdleCheck {
        if self.scheduler.status().state == ModelState::Empty {
            return IdleCheck::Empty;
        }
        if self.scheduler.activity().idle_for() < self.threshold {
            return IdleCheck::Active;
        }

        let check = self.scheduler.evict_if_idle(self.threshold).await;
        match &check {
            IdleCheck::Evicted(identity) => {
                tracing::info!(
                    "Unloaded {} after {}s of inactivity",
                    identity,
                    self.threshold.as_secs()
                );
            }
            IdleCheck::Failed(e) => {
                tracing::warn!("Idle unload reported an error: {}", e);
            }
            IdleCheck::Busy => tracing::debug!("Model busy, skipping idle check"),
            IdleCheck::Empty | IdleCheck::Active => {}
        }
        check
    }
}
