//! Agora Engagement - Focus telemetry
//!
//! Every member scores its own engagement with an [`EngagementTracker`]
//! and reports it when the instructor polls. The instructor's client feeds
//! the reports into an [`EngagementAggregator`] for the class-wide summary
//! and the list of members that have been unfocused for too long.

pub mod aggregator;
pub mod tracker;

pub use aggregator::*;
pub use tracker::*;
