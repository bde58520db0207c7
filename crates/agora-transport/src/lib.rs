//! Agora Transport Layer - Room provider interface
//!
//! This crate provides:
//! - The `Transport` trait the replication layer sends and polls through
//! - An in-process room provider (`LoopbackHub`) backed by the session directory
//! - Pluggable link conditioning (loss, duplication, reordering)

pub mod link;
pub mod loopback;
pub mod transport;

pub use link::*;
pub use loopback::*;
pub use transport::*;
