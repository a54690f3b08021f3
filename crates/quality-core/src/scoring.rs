//! Score-based quality classification
//!
//! Each sub-score starts at 10 and loses the penalty of the single matching
//! band per metric. Sub-scores are combined into a weighted overall score,
//! renormalizing over the sub-scores that are actually available (a connection
//! without video is not punished for the missing track).

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::config::{
    AudioThresholds, ConnectionThresholds, LabelThresholds, QualityConfig, ScoreWeights,
    VideoThresholds,
};
use crate::types::{
    AudioMetrics, ConnectionMetrics, DerivedMetrics, IssueTag, QualityLabel, QualitySnapshot,
    VideoMetrics,
};

/// Upper bound of every score
pub const MAX_SCORE: f64 = 10.0;

/// Maps derived metrics to sub-scores, an overall score and a label
#[derive(Debug, Clone)]
pub struct QualityScorer {
    weights: ScoreWeights,
    audio: AudioThresholds,
    video: VideoThresholds,
    connection: ConnectionThresholds,
    labels: LabelThresholds,
}

impl QualityScorer {
    /// Create a scorer from an already validated configuration
    pub fn new(config: &QualityConfig) -> Self {
        Self {
            weights: config.weights,
            audio: config.audio_thresholds.clone(),
            video: config.video_thresholds.clone(),
            connection: config.connection_thresholds.clone(),
            labels: config.labels,
        }
    }

    /// Assess one set of metrics.
    ///
    /// `captured_at` and `timestamp` are supplied by the caller so the scorer
    /// stays a pure function of its inputs.
    pub fn score(
        &self,
        metrics: &DerivedMetrics,
        captured_at: Instant,
        timestamp: DateTime<Utc>,
    ) -> QualitySnapshot {
        let mut issues = BTreeSet::new();

        let audio_score = metrics.audio.as_ref().map(|audio| self.audio_score(audio, &mut issues));
        let video_score = metrics.video.as_ref().map(|video| self.video_score(video, &mut issues));
        let connection_score = self.connection_score(&metrics.connection, &mut issues);

        let overall_score = self.overall_score(audio_score, video_score, connection_score);

        QualitySnapshot {
            timestamp,
            captured_at,
            audio_score,
            video_score,
            connection_score,
            overall_score,
            label: self.label(overall_score),
            issues: issues.into_iter().collect(),
        }
    }

    /// Label for an overall score; lower bounds are inclusive
    pub fn label(&self, overall_score: f64) -> QualityLabel {
        if overall_score >= self.labels.excellent {
            QualityLabel::Excellent
        } else if overall_score >= self.labels.good {
            QualityLabel::Good
        } else if overall_score >= self.labels.fair {
            QualityLabel::Fair
        } else if overall_score >= self.labels.poor {
            QualityLabel::Poor
        } else {
            QualityLabel::Critical
        }
    }

    fn audio_score(&self, audio: &AudioMetrics, issues: &mut BTreeSet<IssueTag>) -> f64 {
        let mut penalty = 0.0;
        if let Some(band) = self.audio.packet_loss.matching(audio.packet_loss_ratio) {
            penalty += band.penalty;
            issues.insert(IssueTag::HighAudioPacketLoss);
        }
        if let Some(band) = self.audio.jitter_ms.matching(audio.jitter_ms) {
            penalty += band.penalty;
            issues.insert(IssueTag::HighAudioJitter);
        }
        if let Some(band) = self.audio.bitrate_bps.matching(audio.bitrate_bps) {
            penalty += band.penalty;
            issues.insert(IssueTag::LowAudioBitrate);
        }
        clamp_score(MAX_SCORE - penalty)
    }

    fn video_score(&self, video: &VideoMetrics, issues: &mut BTreeSet<IssueTag>) -> f64 {
        let mut penalty = 0.0;
        if let Some(band) = self.video.packet_loss.matching(video.packet_loss_ratio) {
            penalty += band.penalty;
            issues.insert(IssueTag::HighVideoPacketLoss);
        }
        if let Some(band) = self.video.frame_rate.matching(video.frame_rate) {
            penalty += band.penalty;
            issues.insert(IssueTag::LowFrameRate);
        }
        if let Some(band) = self.video.bitrate_bps.matching(video.bitrate_bps) {
            penalty += band.penalty;
            issues.insert(IssueTag::LowVideoBitrate);
        }
        clamp_score(MAX_SCORE - penalty)
    }

    fn connection_score(
        &self,
        connection: &ConnectionMetrics,
        issues: &mut BTreeSet<IssueTag>,
    ) -> f64 {
        let mut penalty = 0.0;
        if let Some(band) = self.connection.rtt_ms.matching(connection.rtt_ms) {
            penalty += band.penalty;
            issues.insert(IssueTag::HighLatency);
        }
        if let Some(bandwidth) = connection.effective_bandwidth_bps {
            if let Some(band) = self.connection.bandwidth_bps.matching(bandwidth) {
                penalty += band.penalty;
                issues.insert(IssueTag::LowBandwidth);
            }
        }
        clamp_score(MAX_SCORE - penalty)
    }

    fn overall_score(&self, audio: Option<f64>, video: Option<f64>, connection: f64) -> f64 {
        let parts = [
            (audio, self.weights.audio),
            (video, self.weights.video),
            (Some(connection), self.weights.connection),
        ];

        let (weighted, total_weight) = parts
            .iter()
            .filter_map(|(score, weight)| score.map(|s| (s * weight, *weight)))
            .fold((0.0, 0.0), |(acc, total), (value, weight)| (acc + value, total + weight));

        if total_weight > 0.0 {
            return clamp_score(weighted / total_weight);
        }

        // every available sub-score carries zero weight: plain mean
        let available: Vec<f64> = parts.iter().filter_map(|(score, _)| *score).collect();
        clamp_score(available.iter().sum::<f64>() / available.len() as f64)
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, MAX_SCORE)
}
