//! Voice gate state machine

use agora_core::ActorId;
use tracing::debug;

use crate::VoiceOutput;

/// The mute law
#[inline]
pub fn effective_muted(local: bool, group_all: bool, individual: bool) -> bool {
    local || group_all || individual
}

/// Mute flags of the local member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MuteFlags {
    pub local: bool,
    pub group_all: bool,
    pub individual: bool,
}

impl MuteFlags {
    pub fn effective(&self) -> bool {
        effective_muted(self.local, self.group_all, self.individual)
    }
}

/// Combines the local toggle with instructor flags. Every input returns
/// `Some(effective)` only when the effective decision changed.
#[derive(Debug, Clone)]
pub struct VoiceGate {
    local_actor: ActorId,
    flags: MuteFlags,
    effective: bool,
}

impl VoiceGate {
    pub fn new(local_actor: ActorId) -> Self {
        VoiceGate {
            local_actor,
            flags: MuteFlags::default(),
            effective: false,
        }
    }

    pub fn flags(&self) -> MuteFlags {
        self.flags
    }

    #[inline]
    pub fn effective_muted(&self) -> bool {
        self.effective
    }

    pub fn set_local_mute(&mut self, muted: bool) -> Option<bool> {
        self.flags.local = muted;
        self.recompute()
    }

    pub fn on_authority_mute_all(&mut self, muted: bool) -> Option<bool> {
        self.flags.group_all = muted;
        self.recompute()
    }

    /// Individual mute; flags for other members are not ours to track
    pub fn on_authority_mute_one(&mut self, actor: ActorId, muted: bool) -> Option<bool> {
        if actor != self.local_actor {
            return None;
        }
        self.flags.individual = muted;
        self.recompute()
    }

    /// Take the instructor flags from restored session controls
    pub fn restore(&mut self, group_all: bool, individual: bool) -> Option<bool> {
        self.flags.group_all = group_all;
        self.flags.individual = individual;
        self.recompute()
    }

    /// Push the decision to the audio device
    pub fn drive(&self, output: &mut dyn VoiceOutput) {
        output.set_transmit_enabled(!self.effective);
    }

    fn recompute(&mut self) -> Option<bool> {
        let effective = self.flags.effective();
        if effective == self.effective {
            return None;
        }
        self.effective = effective;
        debug!(actor = %self.local_actor, muted = effective, flags = ?self.flags, "effective mute changed");
        Some(effective)
    }
}
