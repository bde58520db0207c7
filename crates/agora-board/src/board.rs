//! Board state: strokes in begin order

use std::collections::HashMap;

use agora_core::{ActorId, AgoraError, AgoraResult, StrokeKey, Vec3};

/// One continuous drawing gesture
#[derive(Debug, Clone, PartialEq)]
pub struct Stroke {
    pub key: StrokeKey,
    pub color_index: u8,
    pub points: Vec<Vec3>,
    pub is_open: bool,
    /// Owner's board sequence of the begin event
    pub begin_seq: u64,
}

impl Stroke {
    pub fn last_point(&self) -> Option<Vec3> {
        self.points.last().copied()
    }
}

/// Every stroke on the board
#[derive(Debug, Clone, Default)]
pub struct Board {
    strokes: Vec<Stroke>,
    index: HashMap<StrokeKey, usize>,
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a stroke. A repeated begin for a known key is ignored.
    pub fn begin(&mut self, key: StrokeKey, color_index: u8, point: Vec3, begin_seq: u64) -> bool {
        if self.index.contains_key(&key) {
            return false;
        }
        self.index.insert(key, self.strokes.len());
        self.strokes.push(Stroke {
            key,
            color_index,
            points: vec![point],
            is_open: true,
            begin_seq,
        });
        true
    }

    fn open_stroke(&mut self, key: StrokeKey) -> AgoraResult<&mut Stroke> {
        let stroke = self
            .index
            .get(&key)
            .and_then(|&i| self.strokes.get_mut(i))
            .ok_or(AgoraError::UnknownStroke(key))?;
        if !stroke.is_open {
            return Err(AgoraError::UnknownStroke(key));
        }
        Ok(stroke)
    }

    pub fn extend(&mut self, key: StrokeKey, point: Vec3) -> AgoraResult<()> {
        self.open_stroke(key)?.points.push(point);
        Ok(())
    }

    pub fn end(&mut self, key: StrokeKey) -> AgoraResult<()> {
        self.open_stroke(key)?.is_open = false;
        Ok(())
    }

    /// Remove strokes whose begin sequence is within `horizon` for their
    /// owner. Returns the removed keys in board order.
    pub fn clear(&mut self, horizon: &[(ActorId, u64)]) -> Vec<StrokeKey> {
        let seen = |owner: ActorId| {
            horizon
                .iter()
                .find(|(actor, _)| *actor == owner)
                .map_or(0, |(_, seq)| *seq)
        };
        let mut removed = Vec::new();
        self.strokes.retain(|stroke| {
            let cleared = stroke.begin_seq <= seen(stroke.key.owner);
            if cleared {
                removed.push(stroke.key);
            }
            !cleared
        });
        self.index = self
            .strokes
            .iter()
            .enumerate()
            .map(|(i, stroke)| (stroke.key, i))
            .collect();
        removed
    }

    pub fn stroke(&self, key: StrokeKey) -> Option<&Stroke> {
        self.index.get(&key).and_then(|&i| self.strokes.get(i))
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn len(&self) -> usize {
        self.strokes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }
}
