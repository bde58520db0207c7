//! Envelope: fixed header plus one message
//!
//! Header is 29 bytes:
//! - Byte 0: Magic (0xA6)
//! - Byte 1: Wire version
//! - Bytes 2-9: Session ID (LE)
//! - Bytes 10-13: Origin actor (LE)
//! - Byte 14: Lane
//! - Byte 15: Flags (bit 0 = direct stream)
//! - Byte 16: Target tag
//! - Bytes 17-20: Target actor (LE, zero unless Single)
//! - Bytes 21-28: Sequence (LE): stream sequence on reliable traffic,
//!   latest-wins sequence on poses, zero on control traffic

use agora_core::{ActorId, AgoraError, AgoraResult, Lane, SessionId, Target};
use bytes::BufMut;

use crate::{Message, WireReader, WireWrite};

/// Header size in bytes
pub const HEADER_SIZE: usize = 29;

/// Largest encoded envelope accepted by the transport
pub const MAX_ENVELOPE_SIZE: usize = 64 * 1024;

pub const ENVELOPE_MAGIC: u8 = 0xA6;

pub const WIRE_VERSION: u8 = 1;

const FLAG_DIRECT: u8 = 0x01;

/// One replicated message with its routing and ordering metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub session: SessionId,
    /// Member that emitted the message
    pub origin: ActorId,
    pub lane: Lane,
    /// Sequenced on the origin's per-receiver stream rather than its
    /// broadcast stream
    pub direct: bool,
    pub target: Target,
    pub seq: u64,
    pub message: Message,
}

impl Envelope {
    /// Unsequenced envelope on the message's own lane
    pub fn new(session: SessionId, origin: ActorId, target: Target, message: Message) -> Self {
        Envelope {
            session,
            origin,
            lane: message.lane(),
            direct: target.is_direct(),
            target,
            seq: 0,
            message,
        }
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    /// Append the encoded envelope to `buf` without a size check
    pub fn write_to(&self, buf: &mut Vec<u8>) -> AgoraResult<()> {
        let (tag, target_actor) = self.target.to_parts();
        buf.put_u8(ENVELOPE_MAGIC);
        buf.put_u8(WIRE_VERSION);
        buf.put_u64_le(self.session.0);
        buf.put_actor(self.origin);
        buf.put_u8(self.lane.to_byte());
        buf.put_u8(if self.direct { FLAG_DIRECT } else { 0 });
        buf.put_u8(tag);
        buf.put_actor(target_actor);
        buf.put_u64_le(self.seq);
        self.message.write_to(buf)
    }

    /// Encode to bytes
    pub fn encode(&self) -> AgoraResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + 64);
        self.write_to(&mut buf)?;
        if buf.len() > MAX_ENVELOPE_SIZE {
            return Err(AgoraError::EnvelopeTooLarge(buf.len()));
        }
        Ok(buf)
    }

    /// Decode from bytes. Trailing bytes after the message are rejected.
    pub fn decode(buf: &[u8]) -> AgoraResult<Envelope> {
        if buf.len() > MAX_ENVELOPE_SIZE {
            return Err(AgoraError::EnvelopeTooLarge(buf.len()));
        }
        if buf.len() < HEADER_SIZE {
            return Err(AgoraError::BufferTooShort {
                expected: HEADER_SIZE,
                actual: buf.len(),
            });
        }

        let mut reader = WireReader::new(buf);
        let magic = reader.u8()?;
        if magic != ENVELOPE_MAGIC {
            return Err(AgoraError::InvalidWireFormat(format!(
                "bad magic {magic:#04x}"
            )));
        }
        let version = reader.u8()?;
        if version != WIRE_VERSION {
            return Err(AgoraError::InvalidWireFormat(format!(
                "unsupported wire version {version}"
            )));
        }

        let session = SessionId(reader.u64()?);
        let origin = reader.actor()?;
        let lane_byte = reader.u8()?;
        let lane = Lane::from_byte(lane_byte).ok_or_else(|| {
            AgoraError::InvalidWireFormat(format!("unknown lane {lane_byte:#04x}"))
        })?;
        let flags = reader.u8()?;
        let tag = reader.u8()?;
        let target_actor = reader.actor()?;
        let target = Target::from_parts(tag, target_actor)
            .ok_or_else(|| AgoraError::InvalidWireFormat(format!("unknown target tag {tag}")))?;
        let seq = reader.u64()?;

        let message = Message::read_from(&mut reader)?;
        if message.lane() != lane {
            return Err(AgoraError::InvalidWireFormat(format!(
                "{} does not travel on lane {lane:?}",
                message.name()
            )));
        }
        if reader.remaining() != 0 {
            return Err(AgoraError::InvalidWireFormat(format!(
                "{} trailing bytes",
                reader.remaining()
            )));
        }

        Ok(Envelope {
            session,
            origin,
            lane,
            direct: flags & FLAG_DIRECT != 0,
            target,
            seq,
            message,
        })
    }
}
