//! Local engagement score
//!
//! ```text
//! score = 100
//!       - min(unfocused_rate * unfocused_secs, max_unfocused_penalty)
//!       - min(idle_rate * (idle_secs - idle_threshold), max_idle_penalty)
//!       + min(interactions * interaction_bonus, max_bonus)
//! ```
//!
//! clamped to [0, 100]. The unfocused term covers the current unfocused
//! streak, so the score recovers once focus returns.

use std::time::Duration;

use agora_core::{ActorId, SessionTime};
use tracing::debug;

/// Score model and telemetry timing
#[derive(Debug, Clone)]
pub struct EngagementConfig {
    /// Points lost per unfocused second
    pub unfocused_rate: f32,
    pub max_unfocused_penalty: f32,
    /// Idle time tolerated before the idle penalty starts
    pub idle_threshold: Duration,
    /// Points lost per idle second past the threshold
    pub idle_rate: f32,
    pub max_idle_penalty: f32,
    pub interaction_bonus: f32,
    pub max_bonus: f32,
    /// Samples kept per member by the aggregator
    pub window: Duration,
    /// Continuous unfocused time before a member is flagged
    pub flag_threshold: Duration,
    /// How often the instructor polls the class
    pub poll_interval: Duration,
}

impl Default for EngagementConfig {
    fn default() -> Self {
        EngagementConfig {
            unfocused_rate: 2.0,
            max_unfocused_penalty: 60.0,
            idle_threshold: Duration::from_secs(30),
            idle_rate: 1.0,
            max_idle_penalty: 30.0,
            interaction_bonus: 5.0,
            max_bonus: 20.0,
            window: Duration::from_secs(60),
            flag_threshold: Duration::from_secs(10),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// One engagement report
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngagementSample {
    pub actor: ActorId,
    pub is_focused: bool,
    pub score: f32,
    pub timestamp: SessionTime,
}

/// Engagement of the local member
#[derive(Debug, Clone)]
pub struct EngagementTracker {
    config: EngagementConfig,
    focused: bool,
    unfocused_since: Option<SessionTime>,
    last_activity: SessionTime,
    interactions: u32,
}

impl EngagementTracker {
    /// Start focused and active at `now`
    pub fn new(config: EngagementConfig, now: SessionTime) -> Self {
        EngagementTracker {
            config,
            focused: true,
            unfocused_since: None,
            last_activity: now,
            interactions: 0,
        }
    }

    pub fn config(&self) -> &EngagementConfig {
        &self.config
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    /// Returns true when the focus state changed
    pub fn set_focused(&mut self, focused: bool, now: SessionTime) -> bool {
        if focused == self.focused {
            return false;
        }
        self.focused = focused;
        self.unfocused_since = if focused { None } else { Some(now) };
        debug!(focused, "focus changed");
        true
    }

    pub fn record_interaction(&mut self, now: SessionTime) {
        self.interactions = self.interactions.saturating_add(1);
        self.last_activity = now;
    }

    /// Length of the current unfocused streak
    pub fn unfocused_for(&self, now: SessionTime) -> Option<Duration> {
        self.unfocused_since.map(|since| now.since(since))
    }

    pub fn score(&self, now: SessionTime) -> f32 {
        let c = &self.config;
        let unfocused = self
            .unfocused_for(now)
            .map_or(0.0, |d| (d.as_secs_f32() * c.unfocused_rate).min(c.max_unfocused_penalty));
        let idle_over = now
            .since(self.last_activity)
            .saturating_sub(c.idle_threshold)
            .as_secs_f32();
        let idle = (idle_over * c.idle_rate).min(c.max_idle_penalty);
        let bonus = (self.interactions as f32 * c.interaction_bonus).min(c.max_bonus);
        (100.0 - unfocused - idle + bonus).clamp(0.0, 100.0)
    }

    pub fn sample(&self, actor: ActorId, now: SessionTime) -> EngagementSample {
        EngagementSample {
            actor,
            is_focused: self.focused,
            score: self.score(now),
            timestamp: now,
        }
    }
}
