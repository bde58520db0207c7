//! Agora Voice - Effective mute decision
//!
//! ```text
//! effective = local OR group_all OR individual
//! ```
//!
//! A member can always mute itself, but cannot clear a mute the instructor
//! forced on it. Audio capture and playback stay outside this crate behind
//! the [`VoiceOutput`] trait.

pub mod gate;
pub mod output;

pub use gate::*;
pub use output::*;
