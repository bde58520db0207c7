//! Replicated command state

use std::collections::BTreeSet;

use agora_core::ActorId;
use agora_wire::ControlsSnapshot;

/// Session-wide state set by instructor commands
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionControls {
    pub mute_all: bool,
    /// Members muted individually
    pub muted: BTreeSet<ActorId>,
    pub environment: Option<String>,
    pub material_access: bool,
}

impl SessionControls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_individually_muted(&self, actor: ActorId) -> bool {
        self.muted.contains(&actor)
    }

    /// Returns true if the flag changed
    pub fn set_muted(&mut self, actor: ActorId, muted: bool) -> bool {
        if muted {
            self.muted.insert(actor)
        } else {
            self.muted.remove(&actor)
        }
    }

    /// Member left: its individual flag goes with it
    pub fn forget(&mut self, actor: ActorId) {
        self.muted.remove(&actor);
    }

    pub fn snapshot(&self) -> ControlsSnapshot {
        ControlsSnapshot {
            mute_all: self.mute_all,
            muted: self.muted.iter().copied().collect(),
            environment: self.environment.clone(),
            material_access: self.material_access,
        }
    }

    pub fn from_snapshot(snapshot: &ControlsSnapshot) -> Self {
        SessionControls {
            mute_all: snapshot.mute_all,
            muted: snapshot.muted.iter().copied().collect(),
            environment: snapshot.environment.clone(),
            material_access: snapshot.material_access,
        }
    }
}
