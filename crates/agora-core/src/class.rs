//! Delivery targets, lanes and delivery classes
//!
//! Every replicated message travels on a lane. The lane fixes the delivery
//! class:
//! - Pose: unreliable, latest wins, stale updates discarded
//! - Board: reliable, ordered per owner, buffered history for late joiners
//! - Command: reliable, ordered per issuer
//! - Control: heartbeats (unreliable) and sync traffic (reliable, direct)

use crate::ActorId;

/// Delivery class of a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeliveryClass {
    /// Out-of-order or dropped messages are fine; newest sequence wins
    UnreliableLatest,
    /// At-least-once, applied in the sender's emission order
    ReliableOrdered,
}

/// Logical lane a message travels on
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Lane {
    Pose = 0x01,
    Board = 0x02,
    Command = 0x03,
    Control = 0x04,
}

impl Lane {
    pub const RELIABLE: [Lane; 3] = [Lane::Board, Lane::Command, Lane::Control];

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Lane::Pose),
            0x02 => Some(Lane::Board),
            0x03 => Some(Lane::Command),
            0x04 => Some(Lane::Control),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Delivery class for sequenced traffic on this lane. Heartbeats on the
    /// control lane are sent unsequenced and never consult this.
    pub fn delivery_class(self) -> DeliveryClass {
        match self {
            Lane::Pose => DeliveryClass::UnreliableLatest,
            Lane::Board | Lane::Command | Lane::Control => DeliveryClass::ReliableOrdered,
        }
    }
}

/// Who a message is addressed to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    /// Every member, sender included
    All,
    /// Every member except the sender
    Others,
    /// One member
    Single(ActorId),
    /// The current authority holder
    Authority,
    /// Every current member, and replayed in order to later joiners
    Buffered,
}

impl Target {
    const TAG_ALL: u8 = 0x00;
    const TAG_OTHERS: u8 = 0x01;
    const TAG_SINGLE: u8 = 0x02;
    const TAG_AUTHORITY: u8 = 0x03;
    const TAG_BUFFERED: u8 = 0x04;

    /// Wire tag and optional actor
    pub fn to_parts(self) -> (u8, ActorId) {
        match self {
            Target::All => (Self::TAG_ALL, ActorId::NONE),
            Target::Others => (Self::TAG_OTHERS, ActorId::NONE),
            Target::Single(actor) => (Self::TAG_SINGLE, actor),
            Target::Authority => (Self::TAG_AUTHORITY, ActorId::NONE),
            Target::Buffered => (Self::TAG_BUFFERED, ActorId::NONE),
        }
    }

    pub fn from_parts(tag: u8, actor: ActorId) -> Option<Self> {
        match tag {
            Self::TAG_ALL => Some(Target::All),
            Self::TAG_OTHERS => Some(Target::Others),
            Self::TAG_SINGLE => Some(Target::Single(actor)),
            Self::TAG_AUTHORITY => Some(Target::Authority),
            Self::TAG_BUFFERED => Some(Target::Buffered),
            _ => None,
        }
    }

    /// Does the sender receive its own message?
    pub fn includes_sender(self) -> bool {
        matches!(self, Target::All | Target::Buffered)
    }

    /// Is this addressed to exactly one member?
    pub fn is_direct(self) -> bool {
        matches!(self, Target::Single(_) | Target::Authority)
    }
}
