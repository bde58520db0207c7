//! Member roles and connection state

use crate::{ActorId, SessionTime};

/// Verified role of a member.
///
/// Roles are assigned out-of-band and are independent of replication
/// authority: the authority holder may well be a student.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Role {
    #[default]
    Student = 0x00,
    Instructor = 0x01,
    Observer = 0x02,
}

impl Role {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Role::Student),
            0x01 => Some(Role::Instructor),
            0x02 => Some(Role::Observer),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// May this role issue privileged commands?
    pub fn is_privileged(self) -> bool {
        self == Role::Instructor
    }
}

/// Public description of a member, as announced by the room provider
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberInfo {
    pub actor: ActorId,
    pub display_name: String,
    pub role: Role,
}

impl MemberInfo {
    pub fn new(actor: ActorId, display_name: impl Into<String>, role: Role) -> Self {
        MemberInfo {
            actor,
            display_name: display_name.into(),
            role,
        }
    }
}

/// Connection state of a member
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    /// Connection dropped; the member keeps its identity until the grace
    /// window expires
    Suspended { since: SessionTime },
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Why a member left the roster
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LeaveReason {
    Left = 0x00,
    Kicked = 0x01,
    TimedOut = 0x02,
}
