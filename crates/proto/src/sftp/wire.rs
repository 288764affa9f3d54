//! Typed field parsing and packet building.
//!
//! SFTP strings and byte blobs are `uint32 length` followed by raw bytes;
//! all integers are big-endian. [`Parser`] walks a request payload with
//! typed reads that fail on underflow, and [`PacketBuilder`] assembles a
//! response with a length placeholder that is patched when the packet is
//! finished.

use crate::sftp::message::MessageType;
use bytes::{BufMut, Bytes, BytesMut};
use skiff_platform::{SkiffError, SkiffResult};

/// Sequential typed reader over one request payload.
///
/// Every read consumes from the front of the buffer; reading past the end
/// fails, which the session maps onto `SSH_FX_BAD_MESSAGE`.
pub struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    /// Creates a parser over a request payload.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> SkiffResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(SkiffError::Protocol("SFTP request truncated".to_string()));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> SkiffResult<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads a big-endian u32.
    pub fn read_u32(&mut self) -> SkiffResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a big-endian u64.
    pub fn read_u64(&mut self) -> SkiffResult<u64> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Reads a length-prefixed byte string.
    pub fn read_bytes(&mut self) -> SkiffResult<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    /// Reads a length-prefixed string, replacing invalid UTF-8.
    pub fn read_string(&mut self) -> SkiffResult<String> {
        Ok(String::from_utf8_lossy(self.read_bytes()?).into_owned())
    }

    /// Reads exactly `n` raw bytes without a length prefix.
    pub fn read_raw(&mut self, n: usize) -> SkiffResult<&'a [u8]> {
        self.take(n)
    }
}

/// Builds one response packet.
///
/// The four length bytes are reserved up front and patched in
/// [`finish`](PacketBuilder::finish), so fields can be appended without
/// knowing the final size.
pub struct PacketBuilder {
    buf: BytesMut,
}

impl PacketBuilder {
    /// Starts a packet of the given type.
    pub fn new(msg_type: MessageType) -> Self {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u32(0); // length placeholder
        buf.put_u8(msg_type as u8);
        Self { buf }
    }

    /// Appends one byte.
    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    /// Appends a big-endian u32.
    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    /// Appends a big-endian u64.
    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    /// Appends a length-prefixed byte string.
    pub fn put_bytes(&mut self, v: &[u8]) {
        self.buf.put_u32(v.len() as u32);
        self.buf.put_slice(v);
    }

    /// Appends a length-prefixed string.
    pub fn put_str(&mut self, v: &str) {
        self.put_bytes(v.as_bytes());
    }

    /// Patches the length field and returns the wire bytes.
    pub fn finish(mut self) -> Bytes {
        let length = (self.buf.len() - 4) as u32;
        self.buf[0..4].copy_from_slice(&length.to_be_bytes());
        self.buf.freeze()
    }
}
