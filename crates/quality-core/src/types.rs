//! Core data types shared across the quality pipeline
//!
//! Raw transport statistics flow in as [`RawSample`]s, are reduced to
//! [`DerivedMetrics`] and finally assessed as a [`QualitySnapshot`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Opaque identifier of one peer media connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a new connection ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Kind of network link reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Wifi,
    Cellular,
    Ethernet,
    #[default]
    Unknown,
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wifi => write!(f, "wifi"),
            Self::Cellular => write!(f, "cellular"),
            Self::Ethernet => write!(f, "ethernet"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Cumulative counters for one media stream (audio or video)
///
/// Counters are cumulative since the stream started. Jitter is reported in
/// seconds, as the transport layer does.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamStats {
    /// When the transport captured these counters (milliseconds)
    pub timestamp_ms: f64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    /// Interarrival jitter in seconds
    pub jitter_secs: Option<f64>,
    pub frames_encoded: u64,
    pub frames_decoded: u64,
    /// Instantaneous frame rate, when the transport reports one
    pub frames_per_second: Option<f64>,
}

impl StreamStats {
    pub(crate) fn total_bytes(&self) -> u64 {
        self.bytes_sent.saturating_add(self.bytes_received)
    }

    pub(crate) fn total_frames(&self) -> u64 {
        self.frames_encoded.saturating_add(self.frames_decoded)
    }
}

/// Snapshot pulled from the transport layer at one instant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// Capture time in milliseconds (transport clock)
    pub timestamp_ms: f64,
    pub audio: Option<StreamStats>,
    pub video: Option<StreamStats>,
    /// Transport round-trip time in seconds
    pub round_trip_time_secs: Option<f64>,
    /// Bandwidth estimate published by the transport, if any
    pub available_outgoing_bitrate_bps: Option<f64>,
    pub network_type: NetworkType,
}

/// Derived audio rates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioMetrics {
    pub bitrate_bps: f64,
    pub packet_loss_ratio: f64,
    pub jitter_ms: f64,
}

/// Derived video rates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoMetrics {
    pub bitrate_bps: f64,
    pub packet_loss_ratio: f64,
    pub frame_rate: f64,
}

/// Transport-level metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub rtt_ms: f64,
    /// `None` when it cannot be derived consistently
    pub effective_bandwidth_bps: Option<f64>,
    pub network_type: NetworkType,
}

/// Rates computed from two chronologically ordered samples
///
/// A media kind that is absent from the current sample is `None`, which the
/// scorer treats as an unavailable sub-score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub audio: Option<AudioMetrics>,
    pub video: Option<VideoMetrics>,
    pub connection: ConnectionMetrics,
}

/// Discrete quality label derived from the overall score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLabel {
    Critical,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl fmt::Display for QualityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Excellent => write!(f, "excellent"),
            Self::Good => write!(f, "good"),
            Self::Fair => write!(f, "fair"),
            Self::Poor => write!(f, "poor"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Threshold band that fired while scoring, for diagnostics and UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueTag {
    HighAudioPacketLoss,
    HighAudioJitter,
    LowAudioBitrate,
    HighVideoPacketLoss,
    LowFrameRate,
    LowVideoBitrate,
    HighLatency,
    LowBandwidth,
}

impl fmt::Display for IssueTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::HighAudioPacketLoss => "high-audio-packet-loss",
            Self::HighAudioJitter => "high-audio-jitter",
            Self::LowAudioBitrate => "low-audio-bitrate",
            Self::HighVideoPacketLoss => "high-video-packet-loss",
            Self::LowFrameRate => "low-frame-rate",
            Self::LowVideoBitrate => "low-video-bitrate",
            Self::HighLatency => "high-latency",
            Self::LowBandwidth => "low-bandwidth",
        };
        f.write_str(tag)
    }
}

/// One point-in-time quality assessment for a connection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualitySnapshot {
    /// Wall-clock time of the assessment
    pub timestamp: DateTime<Utc>,
    /// Monotonic time used by the control logic
    #[serde(skip)]
    pub captured_at: Instant,
    /// `None` when the connection carries no audio
    pub audio_score: Option<f64>,
    /// `None` when the connection carries no video
    pub video_score: Option<f64>,
    pub connection_score: f64,
    pub overall_score: f64,
    pub label: QualityLabel,
    /// Sorted, de-duplicated
    pub issues: Vec<IssueTag>,
}

/// Direction of the recent overall-score trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Degrading,
    #[default]
    Stable,
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Improving => write!(f, "improving"),
            Self::Degrading => write!(f, "degrading"),
            Self::Stable => write!(f, "stable"),
        }
    }
}

/// Named bundle of media constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    High,
    Medium,
    Low,
}

impl Tier {
    /// Next tier down, if any
    pub fn lower(self) -> Option<Tier> {
        match self {
            Self::High => Some(Self::Medium),
            Self::Medium => Some(Self::Low),
            Self::Low => None,
        }
    }

    /// Next tier up, if any
    pub fn higher(self) -> Option<Tier> {
        match self {
            Self::High => None,
            Self::Medium => Some(Self::High),
            Self::Low => Some(Self::Medium),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}
