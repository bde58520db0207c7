//! Agora Pose - Participant transforms at a fixed rate
//!
//! Each member publishes its body and head transforms on the unreliable
//! pose lane. Receivers keep the newest accepted sample per owner as a
//! target and move a locally displayed pose toward it every frame, so
//! remote avatars glide instead of snapping under jitter.

pub mod remote;
pub mod replicator;

pub use remote::*;
pub use replicator::*;
