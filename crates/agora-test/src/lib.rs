//! Agora Test Harness - Chaos testing and classroom scenarios
//!
//! This crate provides:
//! - A seeded chaos link conditioner for the loopback hub
//! - A multi-client classroom harness
//! - Scenario tests for the replication guarantees (under `tests/`)
//! - Wire codec benchmarks (under `benches/`)

pub mod chaos;
pub mod harness;

pub use chaos::*;
pub use harness::*;
