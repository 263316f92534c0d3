//! Liveness monitor
//!
//! Every cycle each session's liveness flag is read and cleared. A flag that
//! is already clear means the previous ping went unanswered, and the session
//! is evicted; otherwise a fresh ping goes out. A pong sets the flag again.
//! A silent peer is therefore gone within two cycles.

use std::time::Duration;

use axum::extract::ws::Message;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::relay::connection::Delivery;
use crate::relay::hub::Relay;

/// Outcome of one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub evicted: usize,
}

#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    relay: Relay,
    interval: Duration,
}

impl LivenessMonitor {
    #[must_use]
    pub fn new(relay: Relay) -> Self {
        let interval = relay.config().heartbeat_interval();
        Self { relay, interval }
    }

    /// Run one heartbeat cycle over every registered session
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for session in self.relay.sessions().snapshot() {
            match self.relay.sessions().take_alive(&session.id) {
                Some(true) => {
                    if session.connection.deliver(Message::Ping(Default::default()))
                        == Delivery::Closed
                    {
                        tracing::debug!(session_id = %session.id, "Ping skipped, connection closing");
                    }
                    report.probed += 1;
                }
                Some(false) => {
                    self.relay.evict(&session).await;
                    report.evicted += 1;
                }
                None => {}
            }
        }

        if report.evicted > 0 {
            tracing::info!(
                probed = report.probed,
                evicted = report.evicted,
                "Liveness sweep evicted sessions"
            );
        } else {
            tracing::trace!(probed = report.probed, "Liveness sweep");
        }
        report
    }

    /// Sweep on a fixed period until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        tracing::info!(interval_secs = self.interval.as_secs(), "Liveness monitor started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
        tracing::info!("Liveness monitor stopped");
    }
}
