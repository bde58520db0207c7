//! Agora Replication - Send/receive over an unreliable transport
//!
//! Two delivery classes share one channel:
//! - Unreliable-latest-wins (poses): newest sequence per origin wins,
//!   older or equal sequences are discarded
//! - Reliable-ordered (strokes, commands, sync): every origin numbers its
//!   messages per stream; receivers deliver in order, hold gaps, and NACK
//!   the origin, which retransmits from a bounded history
//!
//! `Buffered` messages are additionally kept in a log and replayed, in
//! original order, to members that join later.

pub mod channel;
pub mod context;
pub mod latest;
pub mod log;
pub mod stream;

pub use channel::*;
pub use context::*;
pub use latest::*;
pub use log::*;
pub use stream::*;
