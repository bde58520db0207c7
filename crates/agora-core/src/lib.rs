//! Agora Core - Fundamental types and primitives
//!
//! This crate defines the core types used throughout the replication layer:
//! - Identifiers (ActorId, SessionId, StrokeId)
//! - Session time
//! - Delivery targets, lanes and delivery classes
//! - Member roles and connection state
//! - Spatial math shared by poses and strokes

pub mod class;
pub mod error;
pub mod id;
pub mod math;
pub mod member;
pub mod time;

pub use class::*;
pub use error::*;
pub use id::*;
pub use math::*;
pub use member::*;
pub use time::*;
