//! Agora Session - Who is in the room, and who holds authority
//!
//! # Authority
//!
//! Authority is a pure function of the roster: the lowest `ActorId` among
//! connected members. Every client recomputes it from the same membership
//! events, so all members converge on the same holder without a consensus
//! round-trip.
//!
//! Authority is NOT the instructor role. Roles gate privileged commands;
//! authority only decides who answers late joiners and who receives
//! engagement reports.

pub mod directory;
pub mod room;

pub use directory::*;
pub use room::*;
