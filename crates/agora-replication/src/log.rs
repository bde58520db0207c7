//! Buffered history replayed to late joiners

use std::collections::HashMap;

use agora_core::{ActorId, StrokeKey};
use agora_wire::{Envelope, Message};

/// Every delivered `Buffered` envelope, in delivery order
#[derive(Debug, Default, Clone)]
pub struct BufferedLog {
    entries: Vec<Envelope>,
    /// Board sequence of each stroke's begin
    begins: HashMap<StrokeKey, u64>,
}

impl BufferedLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, envelope: Envelope) {
        if let Message::StrokeBegin { stroke, .. } = &envelope.message {
            self.begins
                .insert(StrokeKey::new(envelope.origin, *stroke), envelope.seq);
        }
        self.entries.push(envelope);
    }

    pub fn entries(&self) -> &[Envelope] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop the history of strokes a clear removed: those whose begin
    /// sequence is within the clearer's horizon for that owner. Entries of
    /// strokes whose begin is not in the log go too.
    pub fn trim_cleared(&mut self, horizon: &[(ActorId, u64)]) -> usize {
        let seen = |owner: ActorId| {
            horizon
                .iter()
                .find(|(actor, _)| *actor == owner)
                .map_or(0, |(_, seq)| *seq)
        };
        self.begins
            .retain(|key, begin_seq| *begin_seq > seen(key.owner));

        let before = self.entries.len();
        let begins = &self.begins;
        self.entries.retain(|entry| match entry.message.stroke_id() {
            Some(stroke) => begins.contains_key(&StrokeKey::new(entry.origin, stroke)),
            None => true,
        });
        before - self.entries.len()
    }
}
