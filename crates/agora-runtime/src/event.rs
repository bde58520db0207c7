//! Observation events for the UI layer

use agora_authority::CommandEffect;
use agora_board::StrokeUpdated;
use agora_core::{ActorId, LeaveReason, MemberInfo};
use agora_engagement::EngagementSummary;

/// Read-only notifications raised by the client. The UI changes session
/// state only through the client's entry points.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A remote pose got a new target
    PoseUpdated { owner: ActorId },
    /// A remote pose was not refreshed in time and was dropped
    PoseExpired { owner: ActorId },
    StrokeUpdated(StrokeUpdated),
    MuteStateChanged { effective_muted: bool },
    CommandApplied { origin: ActorId, effect: CommandEffect },
    EngagementSummaryChanged(EngagementSummary),
    /// A member stayed unfocused past the flag threshold
    MemberFlagged { actor: ActorId, score: f32 },
    MemberJoined(MemberInfo),
    MemberLeft { actor: ActorId, reason: LeaveReason },
    MemberSuspended(ActorId),
    MemberResumed(ActorId),
    AuthorityChanged {
        previous: Option<ActorId>,
        current: Option<ActorId>,
    },
    /// Late-joiner catch-up finished
    Synced,
    /// Removed by an instructor
    Kicked,
    /// Connection lost for good; a fresh join is required
    Disconnected,
}

/// Runtime counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub ticks: u64,
    pub messages_in: u64,
    pub messages_out: u64,
    pub deliveries: u64,
    pub duplicates_dropped: u64,
    pub commands_rejected: u64,
    pub retransmissions: u64,
    pub timers_fired: u64,
}
