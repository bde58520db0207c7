//! Transport interface consumed by the replication layer

use std::time::Duration;

use agora_core::{ActorId, AgoraResult, LeaveReason, MemberInfo, SessionId, Target};

/// Event surfaced by the room provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    MemberJoined(MemberInfo),
    MemberLeft { actor: ActorId, reason: LeaveReason },
    MemberSuspended(ActorId),
    MemberResumed(ActorId),
    Message { from: ActorId, bytes: Vec<u8> },
    /// Hard loss of the connection; the member identity is gone
    Disconnected,
}

/// Connection to one room as one member.
///
/// Delivery is best-effort: datagrams may be dropped, duplicated or
/// reordered. The sender never receives its own datagrams; local loopback
/// is the replication channel's job.
pub trait Transport {
    fn local_actor(&self) -> ActorId;

    fn session(&self) -> SessionId;

    /// Send to the members selected by `target`
    fn send(&self, target: Target, bytes: Vec<u8>) -> AgoraResult<()>;

    /// Take every event received since the last poll
    fn poll(&self) -> Vec<TransportEvent>;

    /// Round-trip estimate, `None` while the link is down
    fn ping(&self) -> Option<Duration>;

    /// Ask the room provider to remove a member
    fn kick(&self, actor: ActorId) -> AgoraResult<()>;

    /// Leave the room
    fn leave(&self) -> AgoraResult<()>;
}
