//! Agora Wire Protocol - Binary message format
//!
//! This crate implements the wire format for replication traffic:
//! - Envelope header (29 bytes): session, origin, lane, stream flags, target, sequence
//! - One tagged message per envelope
//!
//! Every message kind is a variant of the closed [`Message`] enum, so
//! receivers dispatch with an exhaustive match.

pub mod codec;
pub mod envelope;
pub mod message;

pub use codec::*;
pub use envelope::*;
pub use message::*;
