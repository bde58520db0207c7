//! Per-client session context handed to every component

use agora_core::{ActorId, AgoraResult, MemberInfo, Role, SessionId, SessionTime, Target};
use agora_session::{JoinOutcome, Room};
use agora_transport::Transport;
use agora_wire::Message;

use crate::{ChannelConfig, ReplicationChannel};

/// Local member, mirrored roster and channel of one client
pub struct SessionContext {
    pub session: SessionId,
    pub local: MemberInfo,
    /// Local mirror of the roster; authority is elected from it
    pub room: Room,
    pub channel: ReplicationChannel,
    /// Clock of the current tick
    pub now: SessionTime,
}

impl SessionContext {
    pub fn new(
        local: MemberInfo,
        room: Room,
        transport: Box<dyn Transport>,
        config: ChannelConfig,
        now: SessionTime,
    ) -> Self {
        let needs_sync = room.actors().any(|actor| actor != local.actor);
        let channel = ReplicationChannel::new(transport, config, needs_sync, now);
        SessionContext {
            session: room.id(),
            local,
            room,
            channel,
            now,
        }
    }

    /// Build the context from a successful join
    pub fn from_join(
        outcome: JoinOutcome,
        transport: Box<dyn Transport>,
        config: ChannelConfig,
        now: SessionTime,
    ) -> Self {
        let room = Room::mirror(outcome.session, outcome.room, outcome.capacity, outcome.roster);
        Self::new(outcome.member, room, transport, config, now)
    }

    #[inline]
    pub fn local_actor(&self) -> ActorId {
        self.local.actor
    }

    pub fn authority(&self) -> Option<ActorId> {
        self.room.authority()
    }

    pub fn is_authority(&self) -> bool {
        self.room.is_authority(self.local.actor)
    }

    pub fn role_of(&self, actor: ActorId) -> Option<Role> {
        self.room.role_of(actor)
    }

    /// Send through the channel, resolving `Authority` from the roster
    pub fn send(&mut self, target: Target, message: Message) -> AgoraResult<u64> {
        self.channel.send(&self.room, target, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_session::JoinRequest;
    use agora_transport::{HubConfig, LoopbackHub};

    fn context(hub: &LoopbackHub, name: &str, role: Role) -> SessionContext {
        let (transport, outcome) = hub
            .join(JoinRequest::named("Classroom_1234", name, role))
            .unwrap();
        SessionContext::from_join(outcome, Box::new(transport), ChannelConfig::default(), SessionTime::ZERO)
    }

    #[test]
    fn test_first_member_is_authority_and_synced() {
        let hub = LoopbackHub::new(HubConfig::default());
        let teacher = context(&hub, "teacher", Role::Instructor);
        assert!(teacher.is_authority());
        assert!(!teacher.channel.is_syncing());
        assert_eq!(teacher.role_of(teacher.local_actor()), Some(Role::Instructor));
    }

    #[test]
    fn test_late_joiner_starts_syncing() {
        let hub = LoopbackHub::new(HubConfig::default());
        let teacher = context(&hub, "teacher", Role::Instructor);
        let student = context(&hub, "ana", Role::Student);
        assert!(student.channel.is_syncing());
        assert_eq!(student.authority(), Some(teacher.local_actor()));
        assert_eq!(student.session, teacher.session);
    }
}
