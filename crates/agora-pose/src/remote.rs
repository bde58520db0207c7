//! Mirrored pose of one remote participant

use std::time::Duration;

use agora_core::{ActorId, SessionTime};
use agora_wire::{Pose, PoseUpdate};

/// Body and head transforms captured together
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AvatarPose {
    pub body: Pose,
    pub head: Pose,
}

impl AvatarPose {
    pub fn new(body: Pose, head: Pose) -> Self {
        AvatarPose { body, head }
    }

    pub fn interpolate(&self, other: &AvatarPose, t: f32) -> AvatarPose {
        AvatarPose {
            body: self.body.interpolate(&other.body, t),
            head: self.head.interpolate(&other.head, t),
        }
    }
}

/// Remote pose: latest accepted target and the smoothed displayed pose
#[derive(Debug, Clone)]
pub struct RemotePose {
    pub owner: ActorId,
    /// Latest accepted sample
    pub target: AvatarPose,
    /// What the scene shows; moves toward `target`
    pub current: AvatarPose,
    pub last_seq: u64,
    pub last_update: SessionTime,
}

impl RemotePose {
    /// First sample: displayed pose starts at the target
    pub fn new(update: &PoseUpdate, now: SessionTime) -> Self {
        let pose = AvatarPose::new(update.body, update.head);
        RemotePose {
            owner: update.owner,
            target: pose,
            current: pose,
            last_seq: update.seq,
            last_update: now,
        }
    }

    /// Take a newer sample. Older or equal sequences are refused.
    pub fn apply(&mut self, update: &PoseUpdate, now: SessionTime) -> bool {
        if update.seq <= self.last_seq {
            return false;
        }
        self.target = AvatarPose::new(update.body, update.head);
        self.last_seq = update.seq;
        self.last_update = now;
        true
    }

    /// Move the displayed pose toward the target
    pub fn advance(&mut self, dt: Duration, smoothing_rate: f32) {
        let t = (dt.as_secs_f32() * smoothing_rate).min(1.0);
        self.current = self.current.interpolate(&self.target, t);
    }

    pub fn is_stale(&self, now: SessionTime, stale_after: Duration) -> bool {
        now.since(self.last_update) > stale_after
    }
}
