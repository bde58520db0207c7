//! Latest-wins filter for unreliable lanes

use std::collections::HashMap;

use agora_core::{ActorId, Lane};

/// Tracks the newest accepted sequence per (origin, lane)
#[derive(Debug, Default, Clone)]
pub struct LatestWins {
    newest: HashMap<(ActorId, Lane), u64>,
}

impl LatestWins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `seq` if it is newer than anything seen from this origin
    pub fn accept(&mut self, origin: ActorId, lane: Lane, seq: u64) -> bool {
        let newest = self.newest.entry((origin, lane)).or_insert(0);
        if seq <= *newest {
            return false;
        }
        *newest = seq;
        true
    }

    pub fn newest(&self, origin: ActorId, lane: Lane) -> Option<u64> {
        self.newest.get(&(origin, lane)).copied()
    }

    pub fn forget(&mut self, origin: ActorId) {
        self.newest.retain(|(actor, _), _| *actor != origin);
    }
}
