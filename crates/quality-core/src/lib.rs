//! Adaptive media-quality monitoring for real-time calls.
//!
//! This crate periodically samples transport statistics of each peer media
//! connection, derives rate metrics, scores them into a quality snapshot,
//! tracks history and trend, and drives a hysteresis-based controller that
//! asks the media layer to step video/audio constraints down or back up.
//!
//! ```text
//! StatsSource ─▶ MetricCalculator ─▶ QualityScorer ─▶ QualityHistory
//!                                                       │
//!              EventBus ◀─ AdaptationController ◀─ TrendAnalyzer
//!                 │
//!                 └─▶ MediaControlSink
//! ```
//!
//! The crate never touches media APIs or the network itself: statistics come
//! in through [`StatsSource`] and adaptation commands leave through
//! [`MediaControlSink`] and the [`EventBus`].

// Error handling
pub mod error;

// Shared data model and configuration
pub mod types;
pub mod config;

// Pipeline stages
pub mod metrics;
pub mod scoring;
pub mod history;
pub mod trend;
pub mod adaptation;

// Orchestration and boundaries
pub mod events;
pub mod source;
pub mod monitor;

pub mod logging;

// Public exports
pub use adaptation::{
    AdaptationAction, AdaptationCommand, AdaptationController, AdaptationState,
    AudioConstraints, MediaDirective, VideoConstraints,
};
pub use config::{
    AdaptationConfig, AudioThresholds, Band, CeilingBands, ConnectionThresholds, FloorBands,
    LabelThresholds, QualityConfig, ScoreWeights, TierConstraints, TierTable, VideoThresholds,
};
pub use error::{Error, Result};
pub use events::{
    EventBus, EventFilter, EventKind, EventSubscription, QualityEvent, QualityEventHandler,
    StopReason,
};
pub use history::QualityHistory;
pub use metrics::MetricCalculator;
pub use monitor::{ConnectionMonitor, MonitorStats};
pub use scoring::QualityScorer;
pub use source::{MediaControlSink, NullSink, RecordingSink, StatsSource};
pub use trend::TrendAnalyzer;
pub use types::{
    AudioMetrics, ConnectionId, ConnectionMetrics, DerivedMetrics, IssueTag, NetworkType,
    QualityLabel, QualitySnapshot, RawSample, StreamStats, Tier, TrendDirection, VideoMetrics,
};

/// Re-export of the types most embedders need
pub mod prelude {
    pub use super::{
        AdaptationCommand, ConnectionId, ConnectionMonitor, Error, EventFilter, EventKind,
        MediaControlSink, MediaDirective, QualityConfig, QualityEvent, QualityEventHandler,
        QualityLabel, QualitySnapshot, RawSample, Result, StatsSource, StreamStats, Tier,
        TrendDirection,
    };
}

/// Default tuning values
pub mod constants {
    /// Default time between sampling ticks
    pub const DEFAULT_SAMPLING_INTERVAL_MS: u64 = 2_000;

    /// Default number of snapshots retained per connection
    pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

    /// Default trailing window for trend classification
    pub const DEFAULT_TREND_WINDOW_MS: u64 = 60_000;

    /// Default cooldown after an adaptation
    pub const DEFAULT_LOCK_DURATION_MS: u64 = 5_000;

    /// Default minimum spacing between upgrade attempts
    pub const DEFAULT_RECOVERY_INTERVAL_MS: u64 = 30_000;

    /// Default number of downgrades before the controller stops stepping down
    pub const DEFAULT_MAX_DOWNGRADES: u32 = 3;
}
