//! Pose replicator

use std::collections::BTreeMap;
use std::time::Duration;

use agora_core::{ActorId, AgoraError, AgoraResult, SessionTime, Target};
use agora_replication::SessionContext;
use agora_wire::{Message, Pose, PoseUpdate};
use tracing::{debug, warn};

use crate::{AvatarPose, RemotePose};

/// Pose configuration
#[derive(Debug, Clone)]
pub struct PoseConfig {
    /// Local publish rate
    pub publish_hz: f32,
    /// Interpolation speed: fraction of the remaining distance per second
    pub smoothing_rate: f32,
    /// Remote poses not refreshed within this window are dropped
    pub stale_after: Duration,
}

impl Default for PoseConfig {
    fn default() -> Self {
        PoseConfig {
            publish_hz: 15.0,
            smoothing_rate: 10.0,
            stale_after: Duration::from_secs(3),
        }
    }
}

impl PoseConfig {
    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.publish_hz.max(f32::EPSILON))
    }
}

/// Pose counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoseStats {
    pub published: u64,
    pub applied: u64,
    pub stale_dropped: u64,
    pub expired: u64,
}

/// Publishes the local pose and mirrors everyone else's
#[derive(Debug)]
pub struct PoseReplicator {
    config: PoseConfig,
    /// Latest local capture, sent by the next publish
    capture: Option<AvatarPose>,
    seq: u64,
    remotes: BTreeMap<ActorId, RemotePose>,
    stats: PoseStats,
}

impl PoseReplicator {
    pub fn new(config: PoseConfig) -> Self {
        PoseReplicator {
            config,
            capture: None,
            seq: 0,
            remotes: BTreeMap::new(),
            stats: PoseStats::default(),
        }
    }

    pub fn config(&self) -> &PoseConfig {
        &self.config
    }

    pub fn stats(&self) -> PoseStats {
        self.stats
    }

    /// Record the local transforms; they go out on the next publish tick
    pub fn publish(&mut self, body: Pose, head: Pose) {
        self.capture = Some(AvatarPose::new(body, head));
    }

    pub fn local_pose(&self) -> Option<AvatarPose> {
        self.capture
    }

    /// Send the latest capture to the other members. Called from the publish
    /// timer; an unchanged pose is sent again.
    pub fn flush(&mut self, ctx: &mut SessionContext) -> AgoraResult<bool> {
        let Some(pose) = self.capture else {
            return Ok(false);
        };
        self.seq += 1;
        let update = PoseUpdate {
            owner: ctx.local_actor(),
            seq: self.seq,
            body: pose.body,
            head: pose.head,
        };
        match ctx.send(Target::Others, Message::Pose(update)) {
            Ok(_) => {
                self.stats.published += 1;
                Ok(true)
            }
            // Poses are disposable; a dropped link loses this sample only
            Err(AgoraError::ConnectionError(reason)) => {
                debug!(%reason, "pose not published");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Apply a received pose. Returns true when it became the new target.
    pub fn on_remote_update(&mut self, from: ActorId, update: &PoseUpdate, now: SessionTime) -> bool {
        if update.owner != from {
            warn!(from = %from, owner = %update.owner, "pose for another owner dropped");
            return false;
        }
        let applied = match self.remotes.get_mut(&from) {
            Some(remote) => remote.apply(update, now),
            None => {
                self.remotes.insert(from, RemotePose::new(update, now));
                true
            }
        };
        if applied {
            self.stats.applied += 1;
        } else {
            self.stats.stale_dropped += 1;
        }
        applied
    }

    /// Move every displayed pose toward its target
    pub fn advance(&mut self, dt: Duration) {
        let rate = self.config.smoothing_rate;
        for remote in self.remotes.values_mut() {
            remote.advance(dt, rate);
        }
    }

    /// Drop poses not refreshed within `stale_after`
    pub fn drop_stale(&mut self, now: SessionTime) -> Vec<ActorId> {
        let stale_after = self.config.stale_after;
        let stale: Vec<ActorId> = self
            .remotes
            .values()
            .filter(|remote| remote.is_stale(now, stale_after))
            .map(|remote| remote.owner)
            .collect();
        for actor in &stale {
            self.remotes.remove(actor);
            debug!(owner = %actor, "stale pose dropped");
        }
        self.stats.expired += stale.len() as u64;
        stale
    }

    /// Owner left the session
    pub fn remove(&mut self, actor: ActorId) -> bool {
        self.remotes.remove(&actor).is_some()
    }

    pub fn remote(&self, actor: ActorId) -> Option<&RemotePose> {
        self.remotes.get(&actor)
    }

    pub fn remotes(&self) -> impl Iterator<Item = &RemotePose> {
        self.remotes.values()
    }
}

impl Default for PoseReplicator {
    fn default() -> Self {
        Self::new(PoseConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::{Quat, Role, Vec3};
    use agora_replication::{ChannelConfig, Inbound};
    use agora_session::JoinRequest;
    use agora_transport::{HubConfig, LoopbackHub, TransportEvent};

    fn pose(x: f32) -> Pose {
        Pose::new(Vec3::new(x, 0.0, 0.0), Quat::IDENTITY)
    }

    fn sample(owner: u32, seq: u64, x: f32) -> PoseUpdate {
        PoseUpdate {
            owner: ActorId(owner),
            seq,
            body: pose(x),
            head: pose(x),
        }
    }

    #[test]
    fn test_publish_interval() {
        let config = PoseConfig::default();
        let interval = config.publish_interval();
        assert!(interval > Duration::from_millis(66) && interval < Duration::from_millis(67));
    }

    #[test]
    fn test_latest_wins_per_owner() {
        let mut poses = PoseReplicator::default();
        let now = SessionTime::ZERO;
        assert!(poses.on_remote_update(ActorId(2), &sample(2, 3, 1.0), now));
        assert!(!poses.on_remote_update(ActorId(2), &sample(2, 2, 9.0), now));
        assert!(poses.on_remote_update(ActorId(3), &sample(3, 1, 5.0), now));
        assert_eq!(poses.remote(ActorId(2)).unwrap().target.body.position.x, 1.0);
        assert_eq!(poses.stats().stale_dropped, 1);
    }

    #[test]
    fn test_foreign_owner_rejected() {
        let mut poses = PoseReplicator::default();
        assert!(!poses.on_remote_update(ActorId(2), &sample(3, 1, 1.0), SessionTime::ZERO));
        assert!(poses.remote(ActorId(3)).is_none());
    }

    #[test]
    fn test_stale_and_departed_poses_dropped() {
        let mut poses = PoseReplicator::default();
        poses.on_remote_update(ActorId(2), &sample(2, 1, 0.0), SessionTime::ZERO);
        poses.on_remote_update(ActorId(3), &sample(3, 1, 0.0), SessionTime::from_secs(2));
        assert_eq!(poses.drop_stale(SessionTime::from_secs(4)), vec![ActorId(2)]);
        assert!(poses.remove(ActorId(3)));
        assert_eq!(poses.remotes().count(), 0);
    }

    #[test]
    fn test_flush_sends_to_others() {
        let hub = LoopbackHub::new(HubConfig::default());
        let join = |name: &str| {
            let (transport, outcome) = hub
                .join(JoinRequest::named("Classroom_1234", name, Role::Student))
                .unwrap();
            SessionContext::from_join(outcome, Box::new(transport), ChannelConfig::default(), SessionTime::ZERO)
        };
        let mut a = join("a");
        let mut b = join("b");
        let mut poses = PoseReplicator::default();

        assert!(!poses.flush(&mut a).unwrap());
        poses.publish(pose(1.0), pose(1.2));
        assert!(poses.flush(&mut a).unwrap());
        assert!(poses.flush(&mut a).unwrap());
        assert!(a.channel.next_inbound().is_none());

        let mut received = PoseReplicator::default();
        for event in b.channel.transport().poll() {
            if let TransportEvent::Message { from, bytes } = event {
                b.channel.ingest(from, &bytes, SessionTime::ZERO);
            }
        }
        while let Some(item) = b.channel.next_inbound() {
            if let Inbound::Message(delivery) = item {
                if let Message::Pose(update) = &delivery.message {
                    received.on_remote_update(delivery.origin, update, SessionTime::ZERO);
                }
            }
        }
        let remote = received.remote(ActorId(1)).unwrap();
        assert_eq!(remote.last_seq, 2);
        assert_eq!(remote.target.head.position.x, 1.2);
    }
}
