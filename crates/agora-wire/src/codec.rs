//! Primitive field encoding
//!
//! All integers are little-endian. Reads are bounds-checked so a truncated
//! datagram surfaces as `BufferTooShort` instead of a panic.

use agora_core::{ActorId, AgoraError, AgoraResult, Quat, Vec3};
use bytes::{Buf, BufMut};

/// Longest string accepted on the wire (environment names, display names)
pub const MAX_STRING_LEN: usize = 1024;

/// Bounds-checked reader over a received buffer
pub struct WireReader<'a> {
    buf: &'a [u8],
    consumed: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        WireReader { buf, consumed: 0 }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.consumed
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, n: usize) -> AgoraResult<()> {
        if self.buf.remaining() < n {
            return Err(AgoraError::BufferTooShort {
                expected: self.consumed + n,
                actual: self.consumed + self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self) -> AgoraResult<u8> {
        self.ensure(1)?;
        self.consumed += 1;
        Ok(self.buf.get_u8())
    }

    pub fn u16(&mut self) -> AgoraResult<u16> {
        self.ensure(2)?;
        self.consumed += 2;
        Ok(self.buf.get_u16_le())
    }

    pub fn u32(&mut self) -> AgoraResult<u32> {
        self.ensure(4)?;
        self.consumed += 4;
        Ok(self.buf.get_u32_le())
    }

    pub fn u64(&mut self) -> AgoraResult<u64> {
        self.ensure(8)?;
        self.consumed += 8;
        Ok(self.buf.get_u64_le())
    }

    pub fn f32(&mut self) -> AgoraResult<f32> {
        self.ensure(4)?;
        self.consumed += 4;
        Ok(self.buf.get_f32_le())
    }

    pub fn bool(&mut self) -> AgoraResult<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(AgoraError::InvalidWireFormat(format!(
                "invalid bool byte {other:#04x}"
            ))),
        }
    }

    pub fn actor(&mut self) -> AgoraResult<ActorId> {
        Ok(ActorId(self.u32()?))
    }

    pub fn bytes(&mut self, len: usize) -> AgoraResult<&'a [u8]> {
        self.ensure(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        self.consumed += len;
        Ok(head)
    }

    pub fn string(&mut self) -> AgoraResult<String> {
        let len = self.u16()? as usize;
        if len > MAX_STRING_LEN {
            return Err(AgoraError::InvalidWireFormat(format!(
                "string too long: {len}"
            )));
        }
        let raw = self.bytes(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| AgoraError::InvalidWireFormat("string is not utf-8".into()))
    }

    pub fn vec3(&mut self) -> AgoraResult<Vec3> {
        Ok(Vec3::new(self.f32()?, self.f32()?, self.f32()?))
    }

    pub fn quat(&mut self) -> AgoraResult<Quat> {
        Ok(Quat::new(self.f32()?, self.f32()?, self.f32()?, self.f32()?))
    }

    /// Length prefix of a repeated field, bounded by what the buffer could
    /// possibly hold so a corrupt count cannot trigger a huge allocation
    pub fn count(&mut self, min_item_size: usize) -> AgoraResult<usize> {
        let count = self.u16()? as usize;
        if count.saturating_mul(min_item_size.max(1)) > self.remaining() {
            return Err(AgoraError::InvalidWireFormat(format!(
                "count {count} exceeds remaining {} bytes",
                self.remaining()
            )));
        }
        Ok(count)
    }
}

/// Field writers on top of any `BufMut`
pub trait WireWrite: BufMut {
    fn put_bool(&mut self, value: bool) {
        self.put_u8(u8::from(value));
    }

    fn put_actor(&mut self, actor: ActorId) {
        self.put_u32_le(actor.0);
    }

    /// Strings over `MAX_STRING_LEN` bytes are refused, never cut
    fn put_string(&mut self, value: &str) -> AgoraResult<()> {
        let raw = value.as_bytes();
        if raw.len() > MAX_STRING_LEN {
            return Err(AgoraError::InvalidWireFormat(format!(
                "string too long: {} bytes",
                raw.len()
            )));
        }
        self.put_u16_le(raw.len() as u16);
        self.put_slice(raw);
        Ok(())
    }

    fn put_vec3(&mut self, v: &Vec3) {
        self.put_f32_le(v.x);
        self.put_f32_le(v.y);
        self.put_f32_le(v.z);
    }

    fn put_quat(&mut self, q: &Quat) {
        self.put_f32_le(q.w);
        self.put_f32_le(q.x);
        self.put_f32_le(q.y);
        self.put_f32_le(q.z);
    }

    fn put_count(&mut self, count: usize) {
        self.put_u16_le(count.min(u16::MAX as usize) as u16);
    }
}

impl<T: BufMut> WireWrite for T {}
