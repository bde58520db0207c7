//! Identity types
//!
//! Actor identities are small because the room provider hands them out from a
//! per-room counter; session and stroke identities are 64-bit.

use std::fmt;

/// Member identity - unique and stable for the lifetime of a session
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ActorId(pub u32);

impl ActorId {
    pub const NONE: ActorId = ActorId(0);

    #[inline]
    pub fn new(id: u32) -> Self {
        ActorId(id)
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        ActorId(u32::from_le_bytes(bytes))
    }
}

impl fmt::Debug for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Actor({})", self.0)
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session identity - one per active room
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SessionId(pub u64);

impl SessionId {
    pub const ZERO: SessionId = SessionId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        SessionId(id)
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        SessionId(u64::from_le_bytes(bytes))
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Session({:08x})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Stroke identity - strictly increasing per owner, never reused
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StrokeId(pub u64);

impl StrokeId {
    #[inline]
    pub fn new(id: u64) -> Self {
        StrokeId(id)
    }

    /// The identity issued after this one
    #[inline]
    pub fn next(self) -> Self {
        StrokeId(self.0 + 1)
    }
}

impl fmt::Debug for StrokeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stroke({})", self.0)
    }
}

/// Board key of a stroke. Stroke ids are only unique per owner, so the
/// whiteboard always addresses strokes by (owner, id).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StrokeKey {
    pub owner: ActorId,
    pub id: StrokeId,
}

impl StrokeKey {
    #[inline]
    pub fn new(owner: ActorId, id: StrokeId) -> Self {
        StrokeKey { owner, id }
    }
}

impl fmt::Debug for StrokeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stroke({}:{})", self.owner.0, self.id.0)
    }
}

impl fmt::Display for StrokeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner.0, self.id.0)
    }
}
