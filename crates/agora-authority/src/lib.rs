//! Agora Authority - Instructor commands
//!
//! Privileged commands are gated on the issuer's verified role, never on
//! which member holds replication authority. The check runs twice: before
//! a command leaves the issuing client, and again on every receiver against
//! its own roster, so a tampered client cannot push state onto others.
//!
//! Accepted commands update [`SessionControls`], the replicated command
//! state that late joiners receive in their snapshot.

pub mod bus;
pub mod controls;

pub use bus::*;
pub use controls::*;
