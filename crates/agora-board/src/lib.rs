//! Agora Board - Shared whiteboard
//!
//! Strokes are keyed by (owner, stroke id) and only their owner appends to
//! them, so concurrent drawing needs no arbitration. Every stroke event
//! travels `Buffered` on the owner's reliable board stream: receivers apply
//! it in emission order and late joiners get the whole board by replay.
//!
//! A clear carries the clearer's board horizon. Each member removes exactly
//! the strokes whose begin the clearer had seen, so a stroke begun while the
//! clear was in flight survives on every member alike.

pub mod board;
pub mod replicator;

pub use board::*;
pub use replicator::*;
