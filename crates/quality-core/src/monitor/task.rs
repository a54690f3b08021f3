//! Per-connection sampling task
//!
//! One task per monitored connection. It waits for the next tick, pulls a
//! sample and runs the pipeline while holding the monitor lock. The
//! cancellation token is re-checked under that lock, so once `stop` has
//! cancelled it no further event can be published for this monitor.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::state::Monitor;
use super::Shared;
use crate::error::Error;
use crate::events::{QualityEvent, StopReason};
use crate::source::StatsSource;
use crate::types::{ConnectionId, RawSample};

pub(super) struct TickTask {
    pub connection_id: ConnectionId,
    pub generation: u64,
    pub interval: Duration,
    pub token: CancellationToken,
    pub source: Arc<dyn StatsSource>,
    pub state: Arc<Mutex<Monitor>>,
    pub shared: Arc<Shared>,
}

impl TickTask {
    pub async fn run(self) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            trace!(connection_id = %self.connection_id, "Pulling stats");
            let pulled = tokio::select! {
                _ = self.token.cancelled() => break,
                result = self.source.get_stats(&self.connection_id) => result,
            };

            let flow = match pulled {
                Ok(sample) => self.on_sample(sample),
                Err(Error::ConnectionClosed { .. }) => self.on_closed(),
                Err(e) => self.on_skipped(e),
            };
            if flow.is_break() {
                break;
            }
        }

        debug!(
            connection_id = %self.connection_id,
            generation = self.generation,
            "Sampling task finished"
        );
    }

    fn on_sample(&self, sample: RawSample) -> ControlFlow<()> {
        let now = Instant::now();
        let mut monitor = self.state.lock();
        if self.token.is_cancelled() {
            return ControlFlow::Break(());
        }

        let Some(outcome) = monitor.process(sample, now, Utc::now()) else {
            return ControlFlow::Continue(());
        };

        if let Some(command) = &outcome.command {
            info!(
                connection_id = %self.connection_id,
                action = %command.action,
                reason = %command.reason,
                "Adaptation requested"
            );
            if let Err(e) = self.shared.sink.submit(command) {
                warn!(connection_id = %self.connection_id, error = %e, "Media control sink rejected command");
                monitor.stats.sink_failures += 1;
            }
        }

        self.shared.events.publish(QualityEvent::QualityUpdated {
            connection_id: self.connection_id.clone(),
            snapshot: outcome.snapshot,
            trend: outcome.trend,
        });
        if let Some(command) = outcome.command {
            self.shared.events.publish(QualityEvent::AdaptationRequested {
                connection_id: self.connection_id.clone(),
                command,
            });
        }

        ControlFlow::Continue(())
    }

    fn on_skipped(&self, error: Error) -> ControlFlow<()> {
        warn!(connection_id = %self.connection_id, error = %error, "Skipping tick");
        let mut monitor = self.state.lock();
        monitor.stats.ticks_skipped += 1;
        ControlFlow::Continue(())
    }

    fn on_closed(&self) -> ControlFlow<()> {
        {
            let _monitor = self.state.lock();
            if self.token.is_cancelled() {
                return ControlFlow::Break(());
            }
            self.token.cancel();
            info!(connection_id = %self.connection_id, "Connection closed, monitoring stopped");
            self.shared.events.publish(QualityEvent::MonitoringStopped {
                connection_id: self.connection_id.clone(),
                reason: StopReason::ConnectionClosed,
                timestamp: Utc::now(),
            });
        }

        // A newer monitor for the same id must survive
        let generation = self.generation;
        self.shared
            .registry
            .remove_if(&self.connection_id, |_, handle| handle.generation == generation);
        ControlFlow::Break(())
    }
}
