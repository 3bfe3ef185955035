//! Periodic Task
//!
//! One cancellable timer abstraction for every sampling loop in the agent.
//! A task owns a [`CancellationToken`] and the join handle of its loop;
//! `cancel()` is synchronous and idempotent, `stop()` additionally waits for
//! the loop to exit.
//!
//! The tick callback is synchronous. Work that suspends (capture, HTTP) is
//! spawned by the callback itself so a slow tick never delays the timer;
//! overlap policy belongs to the caller.

use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// When a task fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// First tick after `first`, then every `period`
    Repeating { first: Duration, period: Duration },
    /// A single tick after the delay
    Once(Duration),
}

impl Schedule {
    /// Repeating schedule whose first tick is one full period after start
    pub fn every(period: Duration) -> Self {
        Schedule::Repeating {
            first: period,
            period,
        }
    }

    pub fn once(delay: Duration) -> Self {
        Schedule::Once(delay)
    }
}

/// Handle to a running timer loop
pub struct PeriodicTask {
    name: String,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    /// Spawn the timer loop. `on_tick` receives the 1-based tick count.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F>(name: impl Into<String>, schedule: Schedule, mut on_tick: F) -> Self
    where
        F: FnMut(u64) + Send + 'static,
    {
        let name = name.into();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let loop_name = name.clone();

        let handle = tokio::spawn(async move {
            match schedule {
                Schedule::Once(delay) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => on_tick(1),
                        _ = token.cancelled() => {}
                    }
                }
                Schedule::Repeating { first, period } => {
                    let mut ticker = tokio::time::interval_at(Instant::now() + first, period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    let mut count = 0u64;

                    loop {
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => break,
                            _ = ticker.tick() => {
                                count += 1;
                                on_tick(count);
                            }
                        }
                    }
                }
            }
            debug!("Timer '{}' exited", loop_name);
        });

        debug!("Timer '{}' started: {:?}", name, schedule);
        Self {
            name,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop future ticks. Later calls are no-ops.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            debug!("Timer '{}' cancelled", self.name);
            self.cancel.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// True while the loop can still fire
    pub fn is_running(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.handle
            .lock()
            .map(|h| h.as_ref().map(|h| !h.is_finished()).unwrap_or(false))
            .unwrap_or(false)
    }

    /// Cancel and wait for the loop to exit
    pub async fn stop(&self) {
        self.cancel();
        let handle = self.handle.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Timer '{}' failed to join: {}", self.name, e);
            }
        }
    }

    /// Token cancelled together with this task, for work spawned by ticks
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for PeriodicTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicTask")
            .field("name", &self.name)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
