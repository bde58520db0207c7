//! Error types for the replication layer

use thiserror::Error;

use crate::{ActorId, StrokeKey};

/// Core errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgoraError {
    // Transport errors
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Disconnected: member identity lost, a fresh join is required")]
    Disconnected,

    // Directory errors
    #[error("Room {room} is full (capacity {capacity})")]
    RoomFull { room: String, capacity: usize },

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Session not found")]
    SessionNotFound,

    #[error("Not in a session")]
    NotInSession,

    #[error("Member not found: {0}")]
    MemberNotFound(ActorId),

    // Authority errors
    #[error("Authority violation: actor {issuer} may not issue {command}")]
    AuthorityViolation {
        issuer: ActorId,
        command: &'static str,
    },

    // Board errors
    #[error("Unknown stroke: {0}")]
    UnknownStroke(StrokeKey),

    // Wire errors
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Unknown message kind: {0:#04x}")]
    UnknownMessageKind(u8),

    #[error("Envelope too large: {0} bytes")]
    EnvelopeTooLarge(usize),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl AgoraError {
    /// Fatal errors end the session for this client
    pub fn is_fatal(&self) -> bool {
        matches!(self, AgoraError::Disconnected)
    }
}

/// Result type for replication operations
pub type AgoraResult<T> = Result<T, AgoraError>;
