//! Per-connection pipeline state

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::adaptation::{AdaptationCommand, AdaptationController};
use crate::config::QualityConfig;
use crate::history::QualityHistory;
use crate::metrics::MetricCalculator;
use crate::scoring::QualityScorer;
use crate::trend::TrendAnalyzer;
use crate::types::{ConnectionId, DerivedMetrics, QualitySnapshot, RawSample, TrendDirection};

/// Counters for one monitored connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStats {
    /// Samples that produced a snapshot
    pub ticks_processed: u64,
    /// Ticks dropped because the stats pull failed
    pub ticks_skipped: u64,
    pub commands_emitted: u64,
    pub sink_failures: u64,
}

/// Result of a processed sample
#[derive(Debug, Clone)]
pub(crate) struct TickOutcome {
    pub snapshot: QualitySnapshot,
    pub trend: TrendDirection,
    pub command: Option<AdaptationCommand>,
}

/// Everything owned by one connection's monitor. Only its tick task writes it.
#[derive(Debug)]
pub(crate) struct Monitor {
    connection_id: ConnectionId,
    calculator: MetricCalculator,
    scorer: QualityScorer,
    history: QualityHistory,
    trend: TrendAnalyzer,
    controller: AdaptationController,
    previous_sample: Option<RawSample>,
    last_metrics: DerivedMetrics,
    last_trend: TrendDirection,
    /// Set once `MonitoringStarted` has been published
    pub(crate) started: bool,
    pub(crate) stats: MonitorStats,
}

impl Monitor {
    pub fn new(connection_id: ConnectionId, config: &QualityConfig) -> Self {
        Self {
            calculator: MetricCalculator::new(),
            scorer: QualityScorer::new(config),
            history: QualityHistory::new(config.history_capacity),
            trend: TrendAnalyzer::new(config),
            controller: AdaptationController::new(
                connection_id.clone(),
                config.adaptation,
                config.tiers,
            ),
            connection_id,
            previous_sample: None,
            last_metrics: DerivedMetrics::default(),
            last_trend: TrendDirection::Stable,
            started: false,
            stats: MonitorStats::default(),
        }
    }

    /// Feed one pulled sample through the pipeline.
    ///
    /// The very first sample only establishes the counter baseline and
    /// yields no snapshot.
    pub fn process(
        &mut self,
        sample: RawSample,
        now: Instant,
        timestamp: DateTime<Utc>,
    ) -> Option<TickOutcome> {
        let Some(previous) = self.previous_sample.as_ref() else {
            trace!(connection_id = %self.connection_id, "Baseline sample recorded");
            self.last_metrics = MetricCalculator::baseline(&sample);
            self.previous_sample = Some(sample);
            return None;
        };

        let metrics = self
            .calculator
            .compute(Some(previous), &sample, &self.last_metrics);
        if sample.timestamp_ms > previous.timestamp_ms {
            self.previous_sample = Some(sample);
        }
        self.last_metrics = metrics;

        let snapshot = self.scorer.score(&metrics, now, timestamp);
        self.history.push(snapshot.clone());
        let trend = self
            .trend
            .update(&self.connection_id, snapshot.overall_score, now);
        self.last_trend = trend;
        let command = self.controller.evaluate(&snapshot, now);

        self.stats.ticks_processed += 1;
        if command.is_some() {
            self.stats.commands_emitted += 1;
        }

        debug!(
            connection_id = %self.connection_id,
            score = snapshot.overall_score,
            label = %snapshot.label,
            trend = %trend,
            "Quality snapshot"
        );

        Some(TickOutcome {
            snapshot,
            trend,
            command,
        })
    }

    pub fn history(&self) -> &QualityHistory {
        &self.history
    }

    pub fn controller(&self) -> &AdaptationController {
        &self.controller
    }

    pub fn trend(&self) -> TrendDirection {
        self.last_trend
    }

    pub fn last_metrics(&self) -> &DerivedMetrics {
        &self.last_metrics
    }
}
