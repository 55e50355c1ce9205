//! Host tick loop
//!
//! Drains the dispatcher once per tick on the thread that owns the UI.
//! The loop must run inside a [`tokio::task::LocalSet`]: dispatched
//! callbacks start host-side command execution with `spawn_local`.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::Dispatcher;

/// Periodic dispatcher drain on the host thread
pub struct HostLoop {
    dispatcher: Dispatcher,
    interval: Duration,
    stop: CancellationToken,
}

impl HostLoop {
    pub fn new(dispatcher: Dispatcher, interval: Duration) -> Self {
        Self {
            dispatcher,
            interval,
            stop: CancellationToken::new(),
        }
    }

    /// Token that ends the loop when cancelled
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Tick until stopped
    pub async fn run(&self) {
        self.dispatcher.attach();
        tracing::debug!(interval_ms = self.interval.as_millis() as u64, "Host loop started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = ticker.tick() => {
                    let ran = self.dispatcher.drain();
                    if ran > 0 {
                        tracing::trace!(ran, "Drained dispatcher");
                    }
                }
            }
        }

        self.dispatcher.detach();
        tracing::debug!("Host loop stopped");
    }
}
