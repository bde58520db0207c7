//! Client configuration
//!
//! Every field has a default, so a config file only lists what it changes.
//! Durations use the human form (`"250ms"`, `"10s"`).
//!
//! ```json
//! {
//!   "tick_interval": "16ms",
//!   "log_format": "json",
//!   "pose": { "publish_hz": 20 },
//!   "engagement": { "flag_threshold": "15s" }
//! }
//! ```

use std::time::Duration;

use agora_board::BoardConfig;
use agora_core::{AgoraError, AgoraResult};
use agora_engagement::EngagementConfig;
use agora_pose::PoseConfig;
use agora_replication::ChannelConfig;
use serde::{Deserialize, Deserializer};

use crate::LogFormat;

fn duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}

/// Client configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Local simulation tick
    #[serde(deserialize_with = "duration")]
    pub tick_interval: Duration,
    pub log_format: LogFormat,
    pub channel: ChannelSettings,
    pub pose: PoseSettings,
    pub board: BoardSettings,
    pub engagement: EngagementSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            tick_interval: Duration::from_millis(16),
            log_format: LogFormat::default(),
            channel: ChannelSettings::default(),
            pose: PoseSettings::default(),
            board: BoardSettings::default(),
            engagement: EngagementSettings::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_json_str(json: &str) -> AgoraResult<Self> {
        let config: ClientConfig =
            serde_json::from_str(json).map_err(|e| AgoraError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AgoraResult<()> {
        fn positive(name: &str, value: Duration) -> AgoraResult<()> {
            if value.is_zero() {
                return Err(AgoraError::Config(format!("{name} must be positive")));
            }
            Ok(())
        }
        fn positive_rate(name: &str, value: f32) -> AgoraResult<()> {
            if !(value.is_finite() && value > 0.0) {
                return Err(AgoraError::Config(format!("{name} must be a positive number")));
            }
            Ok(())
        }

        positive("tick_interval", self.tick_interval)?;

        let c = &self.channel;
        positive("channel.nack_interval", c.nack_interval)?;
        positive("channel.heartbeat_interval", c.heartbeat_interval)?;
        positive("channel.sync_retry", c.sync_retry)?;
        if c.history_capacity == 0 || c.max_pending == 0 || c.max_nack_batch == 0 {
            return Err(AgoraError::Config(
                "channel buffer sizes must be positive".into(),
            ));
        }

        positive_rate("pose.publish_hz", self.pose.publish_hz)?;
        positive_rate("pose.smoothing_rate", self.pose.smoothing_rate)?;
        positive("pose.stale_after", self.pose.stale_after)?;

        if !(self.board.min_point_distance.is_finite() && self.board.min_point_distance >= 0.0) {
            return Err(AgoraError::Config(
                "board.min_point_distance must not be negative".into(),
            ));
        }

        let e = &self.engagement;
        positive_rate("engagement.unfocused_rate", e.unfocused_rate)?;
        positive_rate("engagement.idle_rate", e.idle_rate)?;
        positive("engagement.window", e.window)?;
        positive("engagement.flag_threshold", e.flag_threshold)?;
        positive("engagement.poll_interval", e.poll_interval)?;
        Ok(())
    }

    pub fn channel_config(&self) -> ChannelConfig {
        let c = &self.channel;
        ChannelConfig {
            history_capacity: c.history_capacity,
            max_pending: c.max_pending,
            nack_interval: c.nack_interval,
            max_nack_batch: c.max_nack_batch,
            heartbeat_interval: c.heartbeat_interval,
            sync_retry: c.sync_retry,
            snapshot_chunk_bytes: c.snapshot_chunk_bytes,
        }
    }

    pub fn pose_config(&self) -> PoseConfig {
        PoseConfig {
            publish_hz: self.pose.publish_hz,
            smoothing_rate: self.pose.smoothing_rate,
            stale_after: self.pose.stale_after,
        }
    }

    pub fn board_config(&self) -> BoardConfig {
        BoardConfig {
            min_point_distance: self.board.min_point_distance,
        }
    }

    pub fn engagement_config(&self) -> EngagementConfig {
        let e = &self.engagement;
        EngagementConfig {
            unfocused_rate: e.unfocused_rate,
            max_unfocused_penalty: e.max_unfocused_penalty,
            idle_threshold: e.idle_threshold,
            idle_rate: e.idle_rate,
            max_idle_penalty: e.max_idle_penalty,
            interaction_bonus: e.interaction_bonus,
            max_bonus: e.max_bonus,
            window: e.window,
            flag_threshold: e.flag_threshold,
            poll_interval: e.poll_interval,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelSettings {
    pub history_capacity: usize,
    pub max_pending: usize,
    #[serde(deserialize_with = "duration")]
    pub nack_interval: Duration,
    pub max_nack_batch: usize,
    #[serde(deserialize_with = "duration")]
    pub heartbeat_interval: Duration,
    #[serde(deserialize_with = "duration")]
    pub sync_retry: Duration,
    pub snapshot_chunk_bytes: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        let c = ChannelConfig::default();
        ChannelSettings {
            history_capacity: c.history_capacity,
            max_pending: c.max_pending,
            nack_interval: c.nack_interval,
            max_nack_batch: c.max_nack_batch,
            heartbeat_interval: c.heartbeat_interval,
            sync_retry: c.sync_retry,
            snapshot_chunk_bytes: c.snapshot_chunk_bytes,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoseSettings {
    pub publish_hz: f32,
    pub smoothing_rate: f32,
    #[serde(deserialize_with = "duration")]
    pub stale_after: Duration,
}

impl Default for PoseSettings {
    fn default() -> Self {
        let p = PoseConfig::default();
        PoseSettings {
            publish_hz: p.publish_hz,
            smoothing_rate: p.smoothing_rate,
            stale_after: p.stale_after,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoardSettings {
    pub min_point_distance: f32,
}

impl Default for BoardSettings {
    fn default() -> Self {
        BoardSettings {
            min_point_distance: BoardConfig::default().min_point_distance,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngagementSettings {
    pub unfocused_rate: f32,
    pub max_unfocused_penalty: f32,
    #[serde(deserialize_with = "duration")]
    pub idle_threshold: Duration,
    pub idle_rate: f32,
    pub max_idle_penalty: f32,
    pub interaction_bonus: f32,
    pub max_bonus: f32,
    #[serde(deserialize_with = "duration")]
    pub window: Duration,
    #[serde(deserialize_with = "duration")]
    pub flag_threshold: Duration,
    #[serde(deserialize_with = "duration")]
    pub poll_interval: Duration,
}

impl Default for EngagementSettings {
    fn default() -> Self {
        let e = EngagementConfig::default();
        EngagementSettings {
            unfocused_rate: e.unfocused_rate,
            max_unfocused_penalty: e.max_unfocused_penalty,
            idle_threshold: e.idle_threshold,
            idle_rate: e.idle_rate,
            max_idle_penalty: e.max_idle_penalty,
            interaction_bonus: e.interaction_bonus,
            max_bonus: e.max_bonus,
            window: e.window,
            flag_threshold: e.flag_threshold,
            poll_interval: e.poll_interval,
        }
    }
}
