//! Hysteresis-based adaptation controller
//!
//! One controller per connection. It steps the media tier down when the
//! overall score is poor and back up once quality has recovered, never more
//! than once per lock window. The controller only produces
//! [`AdaptationCommand`]s; applying them is the media-control sink's job.
//!
//! ```text
//!              score < downgrade_below            lock elapsed
//!    Idle ─────────────────────────────▶ Locked ───────────────▶ Idle
//!      ▲   score > upgrade_above (after                              │
//!      │   recovery interval, count > 0)                             │
//!      └─────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::config::{AdaptationConfig, TierConstraints, TierTable};
use crate::types::{ConnectionId, QualitySnapshot, Tier};

/// Video constraint ceilings sent to the media layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VideoConstraints {
    pub tier: Tier,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub max_bitrate_bps: u32,
}

/// Audio constraint ceilings sent to the media layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AudioConstraints {
    pub tier: Tier,
    pub max_bitrate_bps: u32,
}

impl VideoConstraints {
    fn for_tier(tier: Tier, row: &TierConstraints) -> Self {
        Self {
            tier,
            width: row.width,
            height: row.height,
            frame_rate: row.frame_rate,
            max_bitrate_bps: row.max_video_bitrate_bps,
        }
    }
}

impl AudioConstraints {
    fn for_tier(tier: Tier, row: &TierConstraints) -> Self {
        Self {
            tier,
            max_bitrate_bps: row.max_audio_bitrate_bps,
        }
    }
}

/// Direction of an adaptation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AdaptationAction {
    Downgrade,
    Upgrade,
}

impl fmt::Display for AdaptationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Downgrade => write!(f, "downgrade"),
            Self::Upgrade => write!(f, "upgrade"),
        }
    }
}

/// What the media-control sink must apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MediaDirective {
    AdjustConstraints {
        video: VideoConstraints,
        audio: AudioConstraints,
    },
    DisableVideo,
}

/// Instruction produced by the controller for one connection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptationCommand {
    pub connection_id: ConnectionId,
    pub action: AdaptationAction,
    pub directive: MediaDirective,
    pub reason: String,
}

impl AdaptationCommand {
    pub fn is_disable_video(&self) -> bool {
        matches!(self.directive, MediaDirective::DisableVideo)
    }

    /// Video tier requested by an `AdjustConstraints` directive
    pub fn video_tier(&self) -> Option<Tier> {
        match self.directive {
            MediaDirective::AdjustConstraints { video, .. } => Some(video.tier),
            MediaDirective::DisableVideo => None,
        }
    }
}

/// Controller state, exposed read-only for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptationState {
    pub current_video_tier: Tier,
    pub current_audio_tier: Tier,
    pub downgrade_count: u32,
    pub last_adaptation_time: Option<Instant>,
    pub last_upgrade_attempt_time: Option<Instant>,
    pub locked: bool,
    pub video_disabled: bool,
}

impl Default for AdaptationState {
    fn default() -> Self {
        Self {
            current_video_tier: Tier::High,
            current_audio_tier: Tier::High,
            downgrade_count: 0,
            last_adaptation_time: None,
            last_upgrade_attempt_time: None,
            locked: false,
            video_disabled: false,
        }
    }
}

/// Per-connection adaptation state machine
#[derive(Debug, Clone)]
pub struct AdaptationController {
    connection_id: ConnectionId,
    config: AdaptationConfig,
    tiers: TierTable,
    state: AdaptationState,
}

impl AdaptationController {
    pub fn new(connection_id: ConnectionId, config: AdaptationConfig, tiers: TierTable) -> Self {
        Self {
            connection_id,
            config,
            tiers,
            state: AdaptationState::default(),
        }
    }

    pub fn state(&self) -> &AdaptationState {
        &self.state
    }

    /// Evaluate a snapshot; at most one command is produced per call
    pub fn evaluate(&mut self, snapshot: &QualitySnapshot, now: Instant) -> Option<AdaptationCommand> {
        if self.state.locked {
            let within_lock = self
                .state
                .last_adaptation_time
                .map(|at| now.saturating_duration_since(at) < self.config.lock_duration())
                .unwrap_or(false);
            if within_lock {
                return None;
            }
            self.state.locked = false;
        }

        let score = snapshot.overall_score;
        if score < self.config.downgrade_below
            && self.state.downgrade_count < self.config.max_downgrades
        {
            return self.downgrade(snapshot, now);
        }

        if score > self.config.upgrade_above
            && self.state.downgrade_count > 0
            && self.recovery_elapsed(now)
        {
            return self.upgrade(snapshot, now);
        }

        None
    }

    fn recovery_elapsed(&self, now: Instant) -> bool {
        self.state
            .last_upgrade_attempt_time
            .map(|at| now.saturating_duration_since(at) > self.config.recovery_interval())
            .unwrap_or(true)
    }

    fn downgrade(&mut self, snapshot: &QualitySnapshot, now: Instant) -> Option<AdaptationCommand> {
        let directive = match self.state.current_video_tier.lower() {
            Some(next) => {
                self.state.current_video_tier = next;
                self.state.current_audio_tier = next;
                self.adjust_directive()
            }
            None => {
                let video_score = snapshot.video_score?;
                if self.state.video_disabled || video_score >= self.config.disable_video_below {
                    return None;
                }
                self.state.video_disabled = true;
                MediaDirective::DisableVideo
            }
        };

        self.state.downgrade_count += 1;
        self.state.last_adaptation_time = Some(now);
        self.state.locked = true;

        let reason = format!(
            "overall score {:.1} below {:.1} ({})",
            snapshot.overall_score, self.config.downgrade_below, snapshot.label
        );
        debug!(
            connection_id = %self.connection_id,
            tier = %self.state.current_video_tier,
            downgrade_count = self.state.downgrade_count,
            "Downgrading media"
        );
        Some(self.command(AdaptationAction::Downgrade, directive, reason))
    }

    fn upgrade(&mut self, snapshot: &QualitySnapshot, now: Instant) -> Option<AdaptationCommand> {
        if self.state.video_disabled {
            // Video comes back at the lowest tier before stepping further up
            self.state.video_disabled = false;
        } else {
            let next = self.state.current_video_tier.higher()?;
            self.state.current_video_tier = next;
            self.state.current_audio_tier = next;
        }
        let directive = self.adjust_directive();

        self.state.downgrade_count -= 1;
        self.state.last_upgrade_attempt_time = Some(now);
        self.state.last_adaptation_time = Some(now);
        self.state.locked = true;

        let reason = format!(
            "overall score {:.1} above {:.1} ({})",
            snapshot.overall_score, self.config.upgrade_above, snapshot.label
        );
        debug!(
            connection_id = %self.connection_id,
            tier = %self.state.current_video_tier,
            downgrade_count = self.state.downgrade_count,
            "Upgrading media"
        );
        Some(self.command(AdaptationAction::Upgrade, directive, reason))
    }

    fn adjust_directive(&self) -> MediaDirective {
        let video_tier = self.state.current_video_tier;
        let audio_tier = self.state.current_audio_tier;
        MediaDirective::AdjustConstraints {
            video: VideoConstraints::for_tier(video_tier, self.tiers.constraints(video_tier)),
            audio: AudioConstraints::for_tier(audio_tier, self.tiers.constraints(audio_tier)),
        }
    }

    fn command(&self, action: AdaptationAction, directive: MediaDirective, reason: String) -> AdaptationCommand {
        AdaptationCommand {
            connection_id: self.connection_id.clone(),
            action,
            directive,
            reason,
        }
    }
}
