//! Quality monitoring configuration
//!
//! Every tunable of the pipeline lives in [`QualityConfig`]: sampling cadence,
//! history sizes, score weights, threshold bands, label cut-offs, the
//! adaptation timings and the tier constraint table. The configuration is
//! static per monitor; it is validated once, when a monitor is built, so the
//! tick path never has to deal with malformed settings.
//!
//! # Usage Examples
//!
//! ```rust
//! use rvoip_quality_core::config::QualityConfig;
//! use std::time::Duration;
//!
//! let config = QualityConfig::default()
//!     .with_sampling_interval(Duration::from_secs(1))
//!     .with_history_capacity(20);
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.sampling_interval(), Duration::from_secs(1));
//! ```
//!
//! Partial TOML documents override only the fields they name:
//!
//! ```rust
//! use rvoip_quality_core::config::QualityConfig;
//!
//! let config = QualityConfig::from_toml_str(r#"
//!     sampling_interval_ms = 1000
//!
//!     [adaptation]
//!     max_downgrades = 2
//! "#).unwrap();
//!
//! assert_eq!(config.sampling_interval_ms, 1000);
//! assert_eq!(config.adaptation.max_downgrades, 2);
//! assert_eq!(config.adaptation.lock_duration_ms, 5_000);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_HISTORY_CAPACITY, DEFAULT_LOCK_DURATION_MS, DEFAULT_MAX_DOWNGRADES,
    DEFAULT_RECOVERY_INTERVAL_MS, DEFAULT_SAMPLING_INTERVAL_MS, DEFAULT_TREND_WINDOW_MS,
};
use crate::error::{Error, Result};
use crate::types::Tier;

const WEIGHT_TOLERANCE: f64 = 1e-6;

/// A single threshold band: crossing `threshold` costs `penalty` points
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub threshold: f64,
    pub penalty: f64,
}

impl Band {
    pub const fn new(threshold: f64, penalty: f64) -> Self {
        Self { threshold, penalty }
    }
}

/// Bands for metrics where larger is worse (loss, jitter, RTT).
///
/// Ordered from the most severe (largest threshold) down; the first band whose
/// threshold the value exceeds is the one that fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CeilingBands(pub Vec<Band>);

impl CeilingBands {
    /// The single band that fires for `value`, if any
    pub fn matching(&self, value: f64) -> Option<&Band> {
        self.0.iter().find(|band| value > band.threshold)
    }

    fn validate(&self, name: &str) -> Result<()> {
        validate_penalties(&self.0, name)?;
        if self.0.windows(2).any(|w| w[0].threshold <= w[1].threshold) {
            return Err(Error::config(format!(
                "{} thresholds must be strictly descending",
                name
            )));
        }
        Ok(())
    }
}

/// Bands for metrics where smaller is worse (bitrate, frame rate, bandwidth).
///
/// Ordered from the most severe (smallest floor) up; the first band whose
/// floor the value falls below is the one that fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FloorBands(pub Vec<Band>);

impl FloorBands {
    /// The single band that fires for `value`, if any
    pub fn matching(&self, value: f64) -> Option<&Band> {
        self.0.iter().find(|band| value < band.threshold)
    }

    fn validate(&self, name: &str) -> Result<()> {
        validate_penalties(&self.0, name)?;
        if self.0.windows(2).any(|w| w[0].threshold >= w[1].threshold) {
            return Err(Error::config(format!(
                "{} floors must be strictly ascending",
                name
            )));
        }
        Ok(())
    }
}

fn validate_penalties(bands: &[Band], name: &str) -> Result<()> {
    for band in bands {
        if !band.threshold.is_finite() || !band.penalty.is_finite() || band.penalty < 0.0 {
            return Err(Error::config(format!(
                "{} band {:?} must have finite threshold and non-negative penalty",
                name, band
            )));
        }
    }
    Ok(())
}

/// Split of the overall score between the sub-scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub audio: f64,
    pub video: f64,
    pub connection: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            audio: 0.3,
            video: 0.4,
            connection: 0.3,
        }
    }
}

impl ScoreWeights {
    fn validate(&self) -> Result<()> {
        let weights = [self.audio, self.video, self.connection];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(Error::config("score weights must be finite and non-negative"));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(Error::config(format!(
                "score weights must sum to 1, got {}",
                sum
            )));
        }
        Ok(())
    }
}

/// Penalty bands for the audio sub-score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioThresholds {
    pub packet_loss: CeilingBands,
    pub jitter_ms: CeilingBands,
    pub bitrate_bps: FloorBands,
}

impl Default for AudioThresholds {
    fn default() -> Self {
        Self {
            packet_loss: CeilingBands(vec![
                Band::new(0.10, 4.0),
                Band::new(0.05, 2.0),
                Band::new(0.02, 1.0),
            ]),
            jitter_ms: CeilingBands(vec![
                Band::new(50.0, 3.0),
                Band::new(30.0, 2.0),
                Band::new(15.0, 1.0),
            ]),
            // low / medium floors
            bitrate_bps: FloorBands(vec![Band::new(16_000.0, 3.0), Band::new(32_000.0, 1.0)]),
        }
    }
}

/// Penalty bands for the video sub-score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoThresholds {
    pub packet_loss: CeilingBands,
    pub frame_rate: FloorBands,
    pub bitrate_bps: FloorBands,
}

impl Default for VideoThresholds {
    fn default() -> Self {
        Self {
            packet_loss: CeilingBands(vec![
                Band::new(0.10, 4.0),
                Band::new(0.05, 2.0),
                Band::new(0.02, 1.0),
            ]),
            frame_rate: FloorBands(vec![
                Band::new(10.0, 4.0),
                Band::new(15.0, 3.0),
                Band::new(24.0, 1.0),
            ]),
            // low / medium / high floors
            bitrate_bps: FloorBands(vec![
                Band::new(150_000.0, 4.0),
                Band::new(500_000.0, 2.0),
                Band::new(1_000_000.0, 1.0),
            ]),
        }
    }
}

/// Penalty bands for the transport sub-score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionThresholds {
    pub rtt_ms: CeilingBands,
    pub bandwidth_bps: FloorBands,
}

impl Default for ConnectionThresholds {
    fn default() -> Self {
        Self {
            rtt_ms: CeilingBands(vec![
                Band::new(300.0, 4.0),
                Band::new(200.0, 3.0),
                Band::new(100.0, 2.0),
                Band::new(50.0, 1.0),
            ]),
            bandwidth_bps: FloorBands(vec![
                Band::new(500_000.0, 4.0),
                Band::new(1_000_000.0, 3.0),
                Band::new(2_000_000.0, 2.0),
                Band::new(5_000_000.0, 1.0),
            ]),
        }
    }
}

/// Lower bounds (inclusive) of each label band on the 0–10 scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelThresholds {
    pub excellent: f64,
    pub good: f64,
    pub fair: f64,
    pub poor: f64,
}

impl Default for LabelThresholds {
    fn default() -> Self {
        Self {
            excellent: 8.0,
            good: 6.0,
            fair: 4.0,
            poor: 2.0,
        }
    }
}

impl LabelThresholds {
    fn validate(&self) -> Result<()> {
        let cuts = [self.excellent, self.good, self.fair, self.poor];
        if cuts.iter().any(|c| !(0.0..=10.0).contains(c)) {
            return Err(Error::config("label thresholds must lie within [0, 10]"));
        }
        if cuts.windows(2).any(|w| w[0] <= w[1]) {
            return Err(Error::config("label thresholds must be strictly descending"));
        }
        Ok(())
    }
}

/// Hysteresis parameters for the adaptation controller
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptationConfig {
    /// Cooldown after any adaptation during which snapshots are ignored
    pub lock_duration_ms: u64,
    /// Minimum spacing between upgrade attempts
    pub recovery_interval_ms: u64,
    pub max_downgrades: u32,
    /// Downgrade when the overall score is strictly below this
    pub downgrade_below: f64,
    /// Upgrade when the overall score is strictly above this
    pub upgrade_above: f64,
    /// At the lowest tier, disable video when its score is strictly below this
    pub disable_video_below: f64,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            lock_duration_ms: DEFAULT_LOCK_DURATION_MS,
            recovery_interval_ms: DEFAULT_RECOVERY_INTERVAL_MS,
            max_downgrades: DEFAULT_MAX_DOWNGRADES,
            downgrade_below: 4.0,
            upgrade_above: 7.0,
            disable_video_below: 3.0,
        }
    }
}

impl AdaptationConfig {
    pub fn lock_duration(&self) -> Duration {
        Duration::from_millis(self.lock_duration_ms)
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_millis(self.recovery_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        let scores = [self.downgrade_below, self.upgrade_above, self.disable_video_below];
        if scores.iter().any(|s| !(0.0..=10.0).contains(s)) {
            return Err(Error::config("adaptation score thresholds must lie within [0, 10]"));
        }
        if self.upgrade_above <= self.downgrade_below {
            return Err(Error::config(format!(
                "upgrade threshold {} must be above downgrade threshold {}",
                self.upgrade_above, self.downgrade_below
            )));
        }
        Ok(())
    }
}

/// Constraint ceilings applied while a tier is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConstraints {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub max_video_bitrate_bps: u32,
    pub max_audio_bitrate_bps: u32,
}

/// Tier → constraint mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierTable {
    pub high: TierConstraints,
    pub medium: TierConstraints,
    pub low: TierConstraints,
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            high: TierConstraints {
                width: 1280,
                height: 720,
                frame_rate: 30,
                max_video_bitrate_bps: 2_500_000,
                max_audio_bitrate_bps: 64_000,
            },
            medium: TierConstraints {
                width: 640,
                height: 480,
                frame_rate: 24,
                max_video_bitrate_bps: 1_000_000,
                max_audio_bitrate_bps: 48_000,
            },
            low: TierConstraints {
                width: 320,
                height: 240,
                frame_rate: 15,
                max_video_bitrate_bps: 300_000,
                max_audio_bitrate_bps: 32_000,
            },
        }
    }
}

impl TierTable {
    /// Constraints for a tier
    pub fn constraints(&self, tier: Tier) -> &TierConstraints {
        match tier {
            Tier::High => &self.high,
            Tier::Medium => &self.medium,
            Tier::Low => &self.low,
        }
    }

    fn validate(&self) -> Result<()> {
        let rows = [("high", &self.high), ("medium", &self.medium), ("low", &self.low)];
        for (name, row) in rows {
            if row.width == 0 || row.height == 0 || row.frame_rate == 0 {
                return Err(Error::config(format!(
                    "tier {} must have non-zero resolution and frame rate",
                    name
                )));
            }
        }
        for pair in rows.windows(2) {
            let (upper_name, upper) = pair[0];
            let (lower_name, lower) = pair[1];
            if lower.width > upper.width
                || lower.height > upper.height
                || lower.frame_rate > upper.frame_rate
                || lower.max_video_bitrate_bps > upper.max_video_bitrate_bps
                || lower.max_audio_bitrate_bps > upper.max_audio_bitrate_bps
            {
                return Err(Error::config(format!(
                    "tier {} exceeds tier {} constraints",
                    lower_name, upper_name
                )));
            }
        }
        Ok(())
    }
}

/// Complete configuration for quality monitoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Time between sampling ticks
    pub sampling_interval_ms: u64,
    /// Capacity of the per-connection snapshot history
    pub history_capacity: usize,
    /// Trailing window of the trend analyzer
    pub trend_window_ms: u64,
    /// Samples required before a non-stable trend is reported
    pub trend_min_samples: usize,
    /// Pairwise score delta that counts as a trend vote
    pub trend_delta: f64,
    pub weights: ScoreWeights,
    pub audio_thresholds: AudioThresholds,
    pub video_thresholds: VideoThresholds,
    pub connection_thresholds: ConnectionThresholds,
    pub labels: LabelThresholds,
    pub adaptation: AdaptationConfig,
    pub tiers: TierTable,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            sampling_interval_ms: DEFAULT_SAMPLING_INTERVAL_MS,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            trend_window_ms: DEFAULT_TREND_WINDOW_MS,
            trend_min_samples: 3,
            trend_delta: 0.5,
            weights: ScoreWeights::default(),
            audio_thresholds: AudioThresholds::default(),
            video_thresholds: VideoThresholds::default(),
            connection_thresholds: ConnectionThresholds::default(),
            labels: LabelThresholds::default(),
            adaptation: AdaptationConfig::default(),
            tiers: TierTable::default(),
        }
    }
}

impl QualityConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a (possibly partial) TOML document
    pub fn from_toml_str(document: &str) -> Result<Self> {
        Ok(toml::from_str(document)?)
    }

    /// Load a TOML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let document = std::fs::read_to_string(path)?;
        Self::from_toml_str(&document)
    }

    pub fn with_sampling_interval(mut self, interval: Duration) -> Self {
        self.sampling_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_adaptation(mut self, adaptation: AdaptationConfig) -> Self {
        self.adaptation = adaptation;
        self
    }

    pub fn with_tiers(mut self, tiers: TierTable) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms)
    }

    pub fn trend_window(&self) -> Duration {
        Duration::from_millis(self.trend_window_ms)
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> Result<()> {
        if self.sampling_interval_ms == 0 {
            return Err(Error::config("sampling interval must be non-zero"));
        }
        if self.history_capacity == 0 {
            return Err(Error::config("history capacity must be non-zero"));
        }
        if self.trend_window_ms == 0 {
            return Err(Error::config("trend window must be non-zero"));
        }
        if self.trend_min_samples < 2 {
            return Err(Error::config("trend analysis needs at least 2 samples"));
        }
        if !self.trend_delta.is_finite() || self.trend_delta < 0.0 {
            return Err(Error::config("trend delta must be finite and non-negative"));
        }

        self.weights.validate()?;

        self.audio_thresholds.packet_loss.validate("audio packet loss")?;
        self.audio_thresholds.jitter_ms.validate("audio jitter")?;
        self.audio_thresholds.bitrate_bps.validate("audio bitrate")?;
        self.video_thresholds.packet_loss.validate("video packet loss")?;
        self.video_thresholds.frame_rate.validate("video frame rate")?;
        self.video_thresholds.bitrate_bps.validate("video bitrate")?;
        self.connection_thresholds.rtt_ms.validate("round-trip time")?;
        self.connection_thresholds.bandwidth_bps.validate("bandwidth")?;

        self.labels.validate()?;
        self.adaptation.validate()?;
        self.tiers.validate()?;
        Ok(())
    }
}
