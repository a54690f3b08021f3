//! Rate derivation from cumulative transport counters
//!
//! [`MetricCalculator`] turns two successive [`RawSample`]s of the same
//! connection into [`DerivedMetrics`]. It never extrapolates from a single
//! sample and never divides by a non-positive interval.

use crate::types::{
    AudioMetrics, ConnectionMetrics, DerivedMetrics, RawSample, StreamStats, VideoMetrics,
};

/// Stateless converter from raw counters to rates
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricCalculator;

impl MetricCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Compute metrics for `current` relative to `previous`.
    ///
    /// * Without a `previous` sample the result is all zeros, except for the
    ///   network type which is an instantaneous read.
    /// * When the samples are not strictly ordered in time, `last` (the
    ///   metrics produced by the previous call) is returned unchanged.
    pub fn compute(
        &self,
        previous: Option<&RawSample>,
        current: &RawSample,
        last: &DerivedMetrics,
    ) -> DerivedMetrics {
        let Some(previous) = previous else {
            return Self::baseline(current);
        };

        let time_delta_ms = current.timestamp_ms - previous.timestamp_ms;
        if !(time_delta_ms > 0.0) {
            return *last;
        }
        let elapsed_secs = time_delta_ms / 1000.0;

        let audio = current.audio.as_ref().map(|cur| match previous.audio.as_ref() {
            Some(prev) => AudioMetrics {
                bitrate_bps: bitrate(prev, cur, elapsed_secs),
                packet_loss_ratio: packet_loss_ratio(prev, cur),
                jitter_ms: cur.jitter_secs.map(secs_to_ms).unwrap_or(0.0),
            },
            None => AudioMetrics::default(),
        });

        let video = current.video.as_ref().map(|cur| match previous.video.as_ref() {
            Some(prev) => VideoMetrics {
                bitrate_bps: bitrate(prev, cur, elapsed_secs),
                packet_loss_ratio: packet_loss_ratio(prev, cur),
                frame_rate: frame_rate(prev, cur, elapsed_secs),
            },
            None => VideoMetrics::default(),
        });

        DerivedMetrics {
            audio,
            video,
            connection: ConnectionMetrics {
                rtt_ms: current.round_trip_time_secs.map(secs_to_ms).unwrap_or(0.0),
                effective_bandwidth_bps: effective_bandwidth(previous, current),
                network_type: current.network_type,
            },
        }
    }

    /// All-zero metrics for a sample with no prior baseline
    pub fn baseline(current: &RawSample) -> DerivedMetrics {
        DerivedMetrics {
            audio: current.audio.as_ref().map(|_| AudioMetrics::default()),
            video: current.video.as_ref().map(|_| VideoMetrics::default()),
            connection: ConnectionMetrics {
                rtt_ms: 0.0,
                effective_bandwidth_bps: None,
                network_type: current.network_type,
            },
        }
    }
}

fn secs_to_ms(secs: f64) -> f64 {
    secs * 1000.0
}

fn bitrate(prev: &StreamStats, cur: &StreamStats, elapsed_secs: f64) -> f64 {
    let bytes_delta = cur.total_bytes().saturating_sub(prev.total_bytes());
    (bytes_delta as f64 * 8.0) / elapsed_secs
}

fn packet_loss_ratio(prev: &StreamStats, cur: &StreamStats) -> f64 {
    let lost = cur.packets_lost.saturating_sub(prev.packets_lost) as f64;
    let received = cur.packets_received.saturating_sub(prev.packets_received) as f64;
    let total = lost + received;
    if total == 0.0 {
        return 0.0;
    }
    (lost / total).clamp(0.0, 1.0)
}

fn frame_rate(prev: &StreamStats, cur: &StreamStats, elapsed_secs: f64) -> f64 {
    match cur.frames_per_second {
        Some(fps) if fps.is_finite() && fps >= 0.0 => fps,
        _ => {
            let frames_delta = cur.total_frames().saturating_sub(prev.total_frames());
            frames_delta as f64 / elapsed_secs
        }
    }
}

/// Latest per-kind capture time of a sample
fn latest_stream_timestamp(sample: &RawSample) -> Option<f64> {
    match (sample.audio.as_ref(), sample.video.as_ref()) {
        (Some(audio), Some(video)) => Some(audio.timestamp_ms.max(video.timestamp_ms)),
        _ => None,
    }
}

/// Bandwidth actually in use across both media kinds.
///
/// A transport-published estimate wins. Otherwise the byte deltas of both kinds
/// are divided by the interval between the most recent per-kind timestamps of
/// each sample; with only one kind present the metric is dropped.
fn effective_bandwidth(previous: &RawSample, current: &RawSample) -> Option<f64> {
    if let Some(available) = current.available_outgoing_bitrate_bps {
        if available.is_finite() && available >= 0.0 {
            return Some(available);
        }
    }

    let (prev_audio, prev_video) = (previous.audio.as_ref()?, previous.video.as_ref()?);
    let (cur_audio, cur_video) = (current.audio.as_ref()?, current.video.as_ref()?);

    let elapsed_ms = latest_stream_timestamp(current)? - latest_stream_timestamp(previous)?;
    if !(elapsed_ms > 0.0) {
        return None;
    }

    let bytes = cur_audio.total_bytes().saturating_sub(prev_audio.total_bytes())
        + cur_video.total_bytes().saturating_sub(prev_video.total_bytes());
    Some(bytes as f64 * 8.0 / (elapsed_ms / 1000.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NetworkType;

    fn stream(ts: f64, bytes: u64, received: u64, lost: u64, frames: u64) -> StreamStats {
        StreamStats {
            timestamp_ms: ts,
            bytes_received: bytes,
            packets_received: received,
            packets_lost: lost,
            jitter_secs: Some(0.012),
            frames_decoded: frames,
            ..Default::default()
        }
    }

    fn sample(ts: f64, audio_bytes: u64, video_bytes: u64, lost: u64, frames: u64) -> RawSample {
        RawSample {
            timestamp_ms: ts,
            audio: Some(stream(ts, audio_bytes, 50 * (ts as u64 / 1000), lost, 0)),
            video: Some(stream(ts, video_bytes, 100 * (ts as u64 / 1000), lost, frames)),
            round_trip_time_secs: Some(0.08),
            available_outgoing_bitrate_bps: None,
            network_type: NetworkType::Wifi,
        }
    }

    #[test]
    fn test_first_sample_yields_zero_rates() {
        let calc = MetricCalculator::new();
        let current = sample(2000.0, 10_000, 200_000, 3, 60);

        let metrics = calc.compute(None, &current, &DerivedMetrics::default());

        let audio = metrics.audio.unwrap();
        let video = metrics.video.unwrap();
        assert_eq!(audio.bitrate_bps, 0.0);
        assert_eq!(audio.packet_loss_ratio, 0.0);
        assert_eq!(video.bitrate_bps, 0.0);
        assert_eq!(video.frame_rate, 0.0);
        assert_eq!(metrics.connection.rtt_ms, 0.0);
        assert_eq!(metrics.connection.network_type, NetworkType::Wifi);
    }

    #[test]
    fn test_rates_from_two_samples() {
        let calc = MetricCalculator::new();
        let previous = sample(1000.0, 0, 0, 0, 0);
        let current = sample(3000.0, 8_000, 250_000, 0, 60);

        let metrics = calc.compute(Some(&previous), &current, &DerivedMetrics::default());

        let audio = metrics.audio.unwrap();
        assert_eq!(audio.bitrate_bps, 32_000.0);
        assert!((audio.jitter_ms - 12.0).abs() < 1e-9);

        let video = metrics.video.unwrap();
        assert_eq!(video.bitrate_bps, 1_000_000.0);
        assert_eq!(video.frame_rate, 30.0);

        assert!((metrics.connection.rtt_ms - 80.0).abs() < 1e-9);
        assert_eq!(metrics.connection.effective_bandwidth_bps, Some(1_032_000.0));
    }

    #[test]
    fn test_identical_timestamps_return_previous_metrics() {
        let calc = MetricCalculator::new();
        let previous = sample(1000.0, 0, 0, 0, 0);
        let current = sample(1000.0, 8_000, 250_000, 0, 60);
        let last = DerivedMetrics {
            audio: Some(AudioMetrics {
                bitrate_bps: 24_000.0,
                packet_loss_ratio: 0.01,
                jitter_ms: 5.0,
            }),
            ..Default::default()
        };

        let metrics = calc.compute(Some(&previous), &current, &last);
        assert_eq!(metrics, last);

        let backwards = sample(500.0, 8_000, 250_000, 0, 60);
        assert_eq!(calc.compute(Some(&previous), &backwards, &last), last);
    }

    #[test]
    fn test_packet_loss_ratio() {
        let prev = stream(0.0, 0, 100, 0, 0);
        let cur = stream(1000.0, 0, 190, 10, 0);
        assert!((packet_loss_ratio(&prev, &cur) - 0.1).abs() < 1e-9);

        // no traffic at all
        assert_eq!(packet_loss_ratio(&prev, &prev), 0.0);

        // counters that went backwards are treated as no change
        let reset = stream(1000.0, 0, 50, 0, 0);
        assert_eq!(packet_loss_ratio(&prev, &reset), 0.0);
    }

    #[test]
    fn test_reported_frame_rate_preferred() {
        let prev = stream(0.0, 0, 0, 0, 0);
        let mut cur = stream(1000.0, 0, 0, 0, 12);
        assert_eq!(frame_rate(&prev, &cur, 1.0), 12.0);

        cur.frames_per_second = Some(29.97);
        assert_eq!(frame_rate(&prev, &cur, 1.0), 29.97);
    }

    #[test]
    fn test_effective_bandwidth_requires_both_kinds() {
        let calc = MetricCalculator::new();
        let mut previous = sample(1000.0, 0, 0, 0, 0);
        let mut current = sample(2000.0, 4_000, 100_000, 0, 30);
        previous.video = None;
        current.video = None;

        let metrics = calc.compute(Some(&previous), &current, &DerivedMetrics::default());
        assert!(metrics.video.is_none());
        assert_eq!(metrics.connection.effective_bandwidth_bps, None);
    }

    #[test]
    fn test_effective_bandwidth_uses_latest_kind_timestamp() {
        let calc = MetricCalculator::new();
        let mut previous = sample(1000.0, 0, 0, 0, 0);
        let mut current = sample(3000.0, 10_000, 240_000, 0, 60);
        // audio counters lag behind video on both samples
        previous.audio.as_mut().unwrap().timestamp_ms = 900.0;
        current.audio.as_mut().unwrap().timestamp_ms = 2500.0;

        let metrics = calc.compute(Some(&previous), &current, &DerivedMetrics::default());
        // (10_000 + 240_000) bytes over video's 2s interval
        assert_eq!(metrics.connection.effective_bandwidth_bps, Some(1_000_000.0));
    }

    #[test]
    fn test_transport_estimate_wins() {
        let calc = MetricCalculator::new();
        let previous = sample(1000.0, 0, 0, 0, 0);
        let mut current = sample(2000.0, 4_000, 100_000, 0, 30);
        current.available_outgoing_bitrate_bps = Some(3_000_000.0);

        let metrics = calc.compute(Some(&previous), &current, &DerivedMetrics::default());
        assert_eq!(metrics.connection.effective_bandwidth_bps, Some(3_000_000.0));
    }

    #[test]
    fn test_new_stream_without_baseline_is_zero() {
        let calc = MetricCalculator::new();
        let mut previous = sample(1000.0, 0, 0, 0, 0);
        previous.video = None;
        let current = sample(2000.0, 4_000, 100_000, 0, 30);

        let metrics = calc.compute(Some(&previous), &current, &DerivedMetrics::default());
        assert_eq!(metrics.video, Some(VideoMetrics::default()));
        assert_eq!(metrics.audio.unwrap().bitrate_bps, 32_000.0);
    }

    #[test]
    fn test_inputs_not_mutated() {
        let calc = MetricCalculator::new();
        let previous = sample(1000.0, 0, 0, 0, 0);
        let current = sample(2000.0, 4_000, 100_000, 0, 30);
        let (prev_copy, cur_copy) = (previous.clone(), current.clone());

        let _ = calc.compute(Some(&previous), &current, &DerivedMetrics::default());
        assert_eq!(previous, prev_copy);
        assert_eq!(current, cur_copy);
    }
}
