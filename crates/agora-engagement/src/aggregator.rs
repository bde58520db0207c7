//! Instructor-side aggregation of engagement reports

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use agora_core::{ActorId, SessionTime};
use tracing::{debug, warn};

use crate::EngagementSample;

/// Class-wide view over the latest report of every member
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EngagementSummary {
    pub total_members: usize,
    pub focused_count: usize,
    pub average_score: f32,
}

/// Reports from one member
#[derive(Debug, Clone)]
pub struct MemberEngagement {
    samples: VecDeque<EngagementSample>,
    unfocused_since: Option<SessionTime>,
}

impl MemberEngagement {
    fn new() -> Self {
        MemberEngagement {
            samples: VecDeque::new(),
            unfocused_since: None,
        }
    }

    pub fn latest(&self) -> Option<&EngagementSample> {
        self.samples.back()
    }

    pub fn samples(&self) -> impl Iterator<Item = &EngagementSample> {
        self.samples.iter()
    }

    /// Mean score over the rolling window
    pub fn window_average(&self) -> Option<f32> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f32 = self.samples.iter().map(|s| s.score).sum();
        Some(sum / self.samples.len() as f32)
    }

    /// Start of the current unfocused streak as seen by the aggregator
    pub fn unfocused_since(&self) -> Option<SessionTime> {
        self.unfocused_since
    }
}

/// Rolling per-member window of engagement samples
#[derive(Debug, Clone)]
pub struct EngagementAggregator {
    window: Duration,
    members: BTreeMap<ActorId, MemberEngagement>,
}

impl EngagementAggregator {
    pub fn new(window: Duration) -> Self {
        EngagementAggregator {
            window,
            members: BTreeMap::new(),
        }
    }

    /// Record a report received at `now`
    pub fn on_sample(&mut self, actor: ActorId, is_focused: bool, score: f32, now: SessionTime) {
        let score = if score.is_finite() {
            score.clamp(0.0, 100.0)
        } else {
            warn!(actor = %actor, "non-finite engagement score");
            0.0
        };

        let member = self.members.entry(actor).or_insert_with(MemberEngagement::new);
        if is_focused {
            member.unfocused_since = None;
        } else if member.unfocused_since.is_none() {
            member.unfocused_since = Some(now);
        }

        member.samples.push_back(EngagementSample {
            actor,
            is_focused,
            score,
            timestamp: now,
        });
        while let Some(oldest) = member.samples.front() {
            // The latest sample is always kept
            if member.samples.len() > 1 && now.since(oldest.timestamp) > self.window {
                member.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn member(&self, actor: ActorId) -> Option<&MemberEngagement> {
        self.members.get(&actor)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn summary(&self) -> EngagementSummary {
        let latest: Vec<&EngagementSample> =
            self.members.values().filter_map(|m| m.latest()).collect();
        if latest.is_empty() {
            return EngagementSummary::default();
        }
        let focused_count = latest.iter().filter(|s| s.is_focused).count();
        let sum: f32 = latest.iter().map(|s| s.score).sum();
        EngagementSummary {
            total_members: latest.len(),
            focused_count,
            average_score: sum / latest.len() as f32,
        }
    }

    /// Members continuously unfocused for longer than `threshold`, by actor
    pub fn flagged_members(&self, threshold: Duration, now: SessionTime) -> Vec<ActorId> {
        self.members
            .iter()
            .filter(|(_, m)| {
                m.unfocused_since
                    .map_or(false, |since| now.since(since) > threshold)
            })
            .map(|(actor, _)| *actor)
            .collect()
    }

    /// Member departed
    pub fn remove(&mut self, actor: ActorId) -> bool {
        let removed = self.members.remove(&actor).is_some();
        if removed {
            debug!(actor = %actor, "engagement history dropped");
        }
        removed
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }
}

impl Default for EngagementAggregator {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}
