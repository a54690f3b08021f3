//! Shared fixtures for the monitor integration tests

#![allow(dead_code)]

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use rvoip_quality_core::{
    AdaptationCommand, ConnectionId, Error, MediaControlSink, NetworkType, QualityEvent,
    RawSample, Result, StatsSource, StreamStats,
};

pub const PACKETS_PER_SECOND: f64 = 50.0;

/// Media conditions the scripted transport reports
#[derive(Debug, Clone, Copy)]
pub struct Conditions {
    pub audio_bps: f64,
    pub video_bps: f64,
    pub loss: f64,
    pub jitter_ms: f64,
    pub frame_rate: f64,
    pub rtt_ms: f64,
    pub available_bps: f64,
}

impl Conditions {
    /// Every metric inside its healthiest band
    pub fn good() -> Self {
        Self {
            audio_bps: 64_000.0,
            video_bps: 2_000_000.0,
            loss: 0.0,
            jitter_ms: 5.0,
            frame_rate: 30.0,
            rtt_ms: 40.0,
            available_bps: 10_000_000.0,
        }
    }

    /// 12% loss, 350 ms RTT, video bitrate below the lowest floor
    pub fn bad() -> Self {
        Self {
            audio_bps: 10_000.0,
            video_bps: 100_000.0,
            loss: 0.12,
            jitter_ms: 60.0,
            frame_rate: 8.0,
            rtt_ms: 350.0,
            available_bps: 400_000.0,
        }
    }
}

#[derive(Debug)]
struct TransportState {
    last_ms: f64,
    audio: StreamStats,
    video: StreamStats,
    conditions: Conditions,
    closed: bool,
    failures_left: u32,
    calls: u32,
}

/// Stats source that integrates cumulative counters over paused tokio time
#[derive(Debug)]
pub struct ScriptedTransport {
    start: Instant,
    delay: Duration,
    state: Mutex<TransportState>,
}

impl ScriptedTransport {
    pub fn new(conditions: Conditions) -> Self {
        Self {
            start: Instant::now(),
            delay: Duration::ZERO,
            state: Mutex::new(TransportState {
                last_ms: 0.0,
                audio: StreamStats::default(),
                video: StreamStats::default(),
                conditions,
                closed: false,
                failures_left: 0,
                calls: 0,
            }),
        }
    }

    /// Every pull takes `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_conditions(&self, conditions: Conditions) {
        self.state.lock().conditions = conditions;
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    /// The next `count` pulls fail with `StatsUnavailable`
    pub fn fail_next(&self, count: u32) {
        self.state.lock().failures_left = count;
    }

    pub fn calls(&self) -> u32 {
        self.state.lock().calls
    }

    fn sample(&self, connection_id: &ConnectionId) -> Result<RawSample> {
        let mut state = self.state.lock();
        state.calls += 1;
        if state.closed {
            return Err(Error::connection_closed(connection_id.clone()));
        }
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(Error::stats_unavailable(connection_id.clone(), "stats timeout"));
        }

        let now_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        let secs = (now_ms - state.last_ms) / 1000.0;
        state.last_ms = now_ms;
        let c = state.conditions;

        let packets = (PACKETS_PER_SECOND * secs).round();
        let lost = (packets * c.loss).round();
        let received = packets - lost;

        advance(&mut state.audio, now_ms, c.audio_bps * secs / 8.0, received, lost, 0.0);
        state.audio.jitter_secs = Some(c.jitter_ms / 1000.0);
        advance(&mut state.video, now_ms, c.video_bps * secs / 8.0, received, lost, c.frame_rate * secs);
        state.video.frames_per_second = Some(c.frame_rate);

        Ok(RawSample {
            timestamp_ms: now_ms,
            audio: Some(state.audio.clone()),
            video: Some(state.video.clone()),
            round_trip_time_secs: Some(c.rtt_ms / 1000.0),
            available_outgoing_bitrate_bps: Some(c.available_bps),
            network_type: NetworkType::Wifi,
        })
    }
}

fn advance(stats: &mut StreamStats, now_ms: f64, bytes: f64, received: f64, lost: f64, frames: f64) {
    stats.timestamp_ms = now_ms;
    stats.bytes_received += bytes.round() as u64;
    stats.packets_received += received as u64;
    stats.packets_lost += lost as u64;
    stats.frames_decoded += frames.round() as u64;
}

#[async_trait]
impl StatsSource for ScriptedTransport {
    async fn get_stats(&self, connection_id: &ConnectionId) -> Result<RawSample> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.sample(connection_id)
    }
}

/// Sink that rejects every command
#[derive(Debug, Default)]
pub struct RejectingSink;

impl MediaControlSink for RejectingSink {
    fn submit(&self, _command: &AdaptationCommand) -> Result<()> {
        Err(Error::sink("renegotiation in progress"))
    }
}

/// Commands carried by `AdaptationRequested` events, in order
pub fn commands(events: &[QualityEvent]) -> Vec<AdaptationCommand> {
    events
        .iter()
        .filter_map(|event| match event {
            QualityEvent::AdaptationRequested { command, .. } => Some(command.clone()),
            _ => None,
        })
        .collect()
}

pub fn count_updates(events: &[QualityEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, QualityEvent::QualityUpdated { .. }))
        .count()
}

/// Sleep until `offset` after `start` on the (paused) tokio clock
pub async fn advance_to(start: Instant, offset: Duration) {
    tokio::time::sleep_until(start + offset).await;
}

pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}
