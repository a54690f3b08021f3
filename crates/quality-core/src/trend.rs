//! Trailing-window trend classification of overall scores
//!
//! The verdict is informational only. It is published with every quality
//! update but never feeds the adaptation state machine.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::QualityConfig;
use crate::types::{ConnectionId, TrendDirection};

/// Number of most recent samples compared pairwise
const COMPARED_SAMPLES: usize = 3;

/// Score samples of a single connection within the trailing window
#[derive(Debug, Clone, Default)]
pub struct ScoreTrend {
    samples: VecDeque<(f64, Instant)>,
    direction: TrendDirection,
}

impl ScoreTrend {
    fn push(&mut self, score: f64, now: Instant, window: Duration, capacity: usize) {
        if self.samples.len() >= capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((score, now));
        while let Some(&(_, at)) = self.samples.front() {
            if now.saturating_duration_since(at) > window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn classify(&self, min_samples: usize, delta: f64) -> TrendDirection {
        if self.samples.len() < min_samples.max(2) {
            return TrendDirection::Stable;
        }

        let recent: Vec<f64> = self
            .samples
            .iter()
            .skip(self.samples.len().saturating_sub(COMPARED_SAMPLES))
            .map(|&(score, _)| score)
            .collect();

        let mut improving = 0;
        let mut degrading = 0;
        for pair in recent.windows(2) {
            let change = pair[1] - pair[0];
            if change > delta {
                improving += 1;
            } else if change < -delta {
                degrading += 1;
            }
        }

        match improving.cmp(&degrading) {
            std::cmp::Ordering::Greater => TrendDirection::Improving,
            std::cmp::Ordering::Less => TrendDirection::Degrading,
            std::cmp::Ordering::Equal => TrendDirection::Stable,
        }
    }

    pub fn direction(&self) -> TrendDirection {
        self.direction
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Per-connection trend tracker
#[derive(Debug, Clone)]
pub struct TrendAnalyzer {
    window: Duration,
    /// Most samples one window can hold at the configured sampling rate
    capacity: usize,
    min_samples: usize,
    delta: f64,
    trends: HashMap<ConnectionId, ScoreTrend>,
}

impl TrendAnalyzer {
    pub fn new(config: &QualityConfig) -> Self {
        let per_window = config.trend_window_ms / config.sampling_interval_ms.max(1) + 1;
        let capacity = usize::try_from(per_window)
            .unwrap_or(usize::MAX)
            .max(config.trend_min_samples)
            .max(COMPARED_SAMPLES);
        Self {
            window: config.trend_window(),
            capacity,
            min_samples: config.trend_min_samples,
            delta: config.trend_delta,
            trends: HashMap::new(),
        }
    }

    /// Record a score and return the current direction for the connection
    pub fn update(&mut self, connection_id: &ConnectionId, score: f64, now: Instant) -> TrendDirection {
        let trend = self.trends.entry(connection_id.clone()).or_default();
        trend.push(score, now, self.window, self.capacity);
        trend.direction = trend.classify(self.min_samples, self.delta);
        trend.direction
    }

    /// Last verdict for the connection, `Stable` if it was never updated
    pub fn direction(&self, connection_id: &ConnectionId) -> TrendDirection {
        self.trends
            .get(connection_id)
            .map(ScoreTrend::direction)
            .unwrap_or_default()
    }

    pub fn get(&self, connection_id: &ConnectionId) -> Option<&ScoreTrend> {
        self.trends.get(connection_id)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<ScoreTrend> {
        self.trends.remove(connection_id)
    }
}
