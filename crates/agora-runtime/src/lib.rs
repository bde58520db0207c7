//! Agora Runtime - Client orchestration and main loop
//!
//! Each [`Client`] owns one [`SessionContext`] and every replication
//! component, and advances them in a staged tick:
//! 1. Advance the session clock
//! 2. Ingest transport events (membership, datagrams)
//! 3. Dispatch deliveries with an exhaustive match on the message kind
//! 4. Fire due timers (pose publish, channel service, engagement polling)
//! 5. Advance pose interpolation and drop stale poses
//!
//! The UI observes the session through [`ClientEvent`]s and only changes
//! it through the client's publish and command entry points.

pub mod client;
pub mod config;
pub mod driver;
pub mod event;
pub mod scheduler;
pub mod telemetry;

pub use agora_replication::SessionContext;
pub use client::*;
pub use config::*;
pub use event::*;
pub use scheduler::*;
pub use telemetry::*;
