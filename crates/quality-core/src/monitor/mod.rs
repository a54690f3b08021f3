//! Connection monitor: the orchestrator
//!
//! [`ConnectionMonitor`] owns a registry of per-connection monitors. Each one
//! runs its own sampling task that pulls statistics from a [`StatsSource`],
//! drives the metric → score → history → trend → adaptation pipeline and
//! publishes the results on the [`EventBus`].
//!
//! Monitors for different connections share nothing but the registry.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use rvoip_quality_core::prelude::*;
//!
//! struct Transport;
//!
//! #[async_trait]
//! impl StatsSource for Transport {
//!     async fn get_stats(&self, _id: &ConnectionId) -> rvoip_quality_core::Result<RawSample> {
//!         Ok(RawSample::default())
//!     }
//! }
//!
//! # async fn example() -> rvoip_quality_core::Result<()> {
//! let monitor = ConnectionMonitor::new(QualityConfig::default())?;
//! let mut events = monitor.subscribe(EventFilter::all());
//!
//! monitor.start_monitoring(ConnectionId::new("peer-1"), Arc::new(Transport)).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event.kind());
//! }
//! # Ok(())
//! # }
//! ```

mod state;
mod task;

pub use state::MonitorStats;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adaptation::AdaptationState;
use crate::config::QualityConfig;
use crate::error::{Error, Result};
use crate::events::{EventBus, EventFilter, EventSubscription, QualityEvent, StopReason};
use crate::source::{MediaControlSink, NullSink, StatsSource};
use crate::types::{ConnectionId, DerivedMetrics, QualitySnapshot, TrendDirection};

use state::Monitor;
use task::TickTask;

/// Registry entry for one monitored connection
///
/// The entry is inserted before the baseline pull, so `task` stays `None`
/// until the sampling task has been spawned.
struct MonitorHandle {
    generation: u64,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
    state: Arc<Mutex<Monitor>>,
}

impl MonitorHandle {
    /// Cancel the task and publish the terminal event, unless the task has
    /// already stopped itself. A monitor that never announced its start ends
    /// silently.
    async fn stop(self, connection_id: &ConnectionId, reason: StopReason, events: &EventBus) {
        {
            let monitor = self.state.lock();
            if !self.token.is_cancelled() {
                self.token.cancel();
                if monitor.started {
                    events.publish(QualityEvent::MonitoringStopped {
                        connection_id: connection_id.clone(),
                        reason,
                        timestamp: Utc::now(),
                    });
                    info!(connection_id = %connection_id, reason = %reason, "Monitoring stopped");
                } else {
                    debug!(connection_id = %connection_id, reason = %reason, "Pending start cancelled");
                }
            }
        }

        let Some(task) = self.task else {
            return;
        };
        task.abort();
        if let Err(e) = task.await {
            if e.is_panic() {
                warn!(connection_id = %connection_id, "Sampling task panicked: {}", e);
            }
        }
    }
}

/// State shared between the monitor and its sampling tasks
pub(crate) struct Shared {
    registry: DashMap<ConnectionId, MonitorHandle>,
    events: Arc<EventBus>,
    sink: Arc<dyn MediaControlSink>,
}

/// Orchestrates quality monitoring for any number of connections
pub struct ConnectionMonitor {
    config: QualityConfig,
    shared: Arc<Shared>,
    next_generation: AtomicU64,
}

impl std::fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMonitor")
            .field("config", &self.config)
            .field("connections", &self.shared.registry.len())
            .finish()
    }
}

impl ConnectionMonitor {
    /// Create a monitor whose adaptation commands are only published as events
    pub fn new(config: QualityConfig) -> Result<Self> {
        Self::with_sink(config, Arc::new(NullSink))
    }

    /// Create a monitor that also submits adaptation commands to `sink`
    pub fn with_sink(config: QualityConfig, sink: Arc<dyn MediaControlSink>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            shared: Arc::new(Shared {
                registry: DashMap::new(),
                events: Arc::new(EventBus::new()),
                sink,
            }),
            next_generation: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.shared.events
    }

    pub fn subscribe(&self, filter: EventFilter) -> EventSubscription {
        self.shared.events.subscribe(filter)
    }

    /// Start monitoring `connection_id` with the monitor's configuration.
    ///
    /// Any existing monitor for the same id is stopped first. One sample is
    /// pulled before this returns to establish the counter baseline; periodic
    /// sampling starts one interval later. If the connection is stopped while
    /// that pull is outstanding, nothing is started and `Ok(())` is returned.
    pub async fn start_monitoring(
        &self,
        connection_id: ConnectionId,
        source: Arc<dyn StatsSource>,
    ) -> Result<()> {
        self.start_with(connection_id, source, self.config.clone()).await
    }

    /// Like [`start_monitoring`](Self::start_monitoring) with a per-connection
    /// configuration override
    pub async fn start_monitoring_with_config(
        &self,
        connection_id: ConnectionId,
        source: Arc<dyn StatsSource>,
        config: QualityConfig,
    ) -> Result<()> {
        config.validate()?;
        self.start_with(connection_id, source, config).await
    }

    async fn start_with(
        &self,
        connection_id: ConnectionId,
        source: Arc<dyn StatsSource>,
        config: QualityConfig,
    ) -> Result<()> {
        self.stop_with_reason(&connection_id, StopReason::Replaced).await;

        // Registered before the baseline pull so a stop issued meanwhile finds it
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let state = Arc::new(Mutex::new(Monitor::new(connection_id.clone(), &config)));
        let pending = MonitorHandle {
            generation,
            token: token.clone(),
            task: None,
            state: state.clone(),
        };
        // A concurrent start for the same id may have registered first
        if let Some(previous) = self.shared.registry.insert(connection_id.clone(), pending) {
            previous
                .stop(&connection_id, StopReason::Replaced, &self.shared.events)
                .await;
        }

        let pulled = tokio::select! {
            _ = token.cancelled() => {
                debug!(connection_id = %connection_id, "Stopped before the baseline sample arrived");
                return Ok(());
            }
            result = source.get_stats(&connection_id) => result,
        };
        let now = tokio::time::Instant::now();

        {
            let mut monitor = state.lock();
            if token.is_cancelled() {
                debug!(connection_id = %connection_id, "Stopped before monitoring started");
                return Ok(());
            }

            match pulled {
                Ok(sample) => {
                    monitor.process(sample, now, Utc::now());
                }
                Err(Error::ConnectionClosed { .. }) => {
                    token.cancel();
                    drop(monitor);
                    self.shared
                        .registry
                        .remove_if(&connection_id, |_, handle| handle.generation == generation);
                    debug!(connection_id = %connection_id, "Connection already closed, not monitoring");
                    return Err(Error::connection_closed(connection_id));
                }
                Err(e) => {
                    warn!(connection_id = %connection_id, error = %e, "Initial stats pull failed");
                    monitor.stats.ticks_skipped += 1;
                }
            }

            monitor.started = true;
            self.shared.events.publish(QualityEvent::MonitoringStarted {
                connection_id: connection_id.clone(),
                timestamp: Utc::now(),
            });
            info!(
                connection_id = %connection_id,
                interval_ms = config.sampling_interval_ms,
                "Monitoring started"
            );
        }

        let task = tokio::spawn(
            TickTask {
                connection_id: connection_id.clone(),
                generation,
                interval: config.sampling_interval(),
                token: token.clone(),
                source,
                state,
                shared: self.shared.clone(),
            }
            .run(),
        );

        match self.shared.registry.get_mut(&connection_id) {
            Some(mut handle) if handle.generation == generation => handle.task = Some(task),
            // Stopped or replaced since the start event; the token is already cancelled
            _ => task.abort(),
        }

        Ok(())
    }

    /// Stop monitoring `connection_id`. Returns `false` if it was not monitored.
    pub async fn stop_monitoring(&self, connection_id: &ConnectionId) -> bool {
        self.stop_with_reason(connection_id, StopReason::Requested).await
    }

    async fn stop_with_reason(&self, connection_id: &ConnectionId, reason: StopReason) -> bool {
        match self.shared.registry.remove(connection_id) {
            Some((_, handle)) => {
                handle.stop(connection_id, reason, &self.shared.events).await;
                true
            }
            None => false,
        }
    }

    /// Stop every monitor
    pub async fn shutdown(&self) {
        let ids = self.monitored_connections();
        debug!(count = ids.len(), "Shutting down quality monitoring");
        for id in ids {
            self.stop_with_reason(&id, StopReason::Requested).await;
        }
    }

    pub fn is_monitoring(&self, connection_id: &ConnectionId) -> bool {
        self.shared
            .registry
            .get(connection_id)
            .map(|handle| !handle.token.is_cancelled())
            .unwrap_or(false)
    }

    pub fn monitored_connections(&self) -> Vec<ConnectionId> {
        self.shared
            .registry
            .iter()
            .filter(|entry| !entry.value().token.is_cancelled())
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn latest_snapshot(&self, connection_id: &ConnectionId) -> Option<QualitySnapshot> {
        self.with_monitor(connection_id, |m| m.history().latest().cloned())
            .flatten()
    }

    /// Retained snapshots, oldest first
    pub fn history(&self, connection_id: &ConnectionId) -> Vec<QualitySnapshot> {
        self.with_monitor(connection_id, |m| m.history().to_vec())
            .unwrap_or_default()
    }

    /// Mean overall score over the retained history
    pub fn average_score(&self, connection_id: &ConnectionId) -> Option<f64> {
        self.with_monitor(connection_id, |m| m.history().average_score())
            .flatten()
    }

    /// Metrics derived from the most recent sample pair
    pub fn latest_metrics(&self, connection_id: &ConnectionId) -> Option<DerivedMetrics> {
        self.with_monitor(connection_id, |m| *m.last_metrics())
    }

    pub fn adaptation_state(&self, connection_id: &ConnectionId) -> Option<AdaptationState> {
        self.with_monitor(connection_id, |m| m.controller().state().clone())
    }

    pub fn trend(&self, connection_id: &ConnectionId) -> Option<TrendDirection> {
        self.with_monitor(connection_id, |m| m.trend())
    }

    pub fn monitor_stats(&self, connection_id: &ConnectionId) -> Option<MonitorStats> {
        self.with_monitor(connection_id, |m| m.stats)
    }

    fn with_monitor<T>(&self, connection_id: &ConnectionId, f: impl FnOnce(&Monitor) -> T) -> Option<T> {
        // Clone the state out so no registry shard lock is held while locking it
        let state = self
            .shared
            .registry
            .get(connection_id)
            .map(|handle| handle.state.clone())?;
        let monitor = state.lock();
        Some(f(&monitor))
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        for entry in self.shared.registry.iter() {
            entry.value().token.cancel();
        }
    }
}
