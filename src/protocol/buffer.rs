//! Positional byte buffer for the native protocol notation.
//!
//! All fixed-width integers are big-endian. Variable-width values are
//! length-prefixed:
//!
//! | notation       | layout                                         |
//! |----------------|------------------------------------------------|
//! | `[string]`     | u16 length + UTF-8                             |
//! | `[long string]`| i32 length + UTF-8                             |
//! | `[bytes]`      | i32 length + bytes, negative length is null    |
//! | `[short bytes]`| u16 length + bytes, zero length reads as null  |
//! | `[inet]`       | u8 size (4 or 16) + address + i32 port         |
//! | `[uuid]`       | 16 raw bytes                                   |
//!
//! Reads never grow the buffer and fail with [`CodecError::UnexpectedEof`]
//! when fewer bytes remain than the value needs.

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Buf, Bytes};
use uuid::Uuid;

use super::error::{CodecError, CodecResult};

/// Default initial capacity and growth step (256 bytes)
pub const DEFAULT_GROWTH_STEP: usize = 256;

/// An IP address with an optional port, as carried by `[inet]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Inet {
    /// Address
    pub address: IpAddr,
    /// Port, `None` when the wire carried 0
    pub port: Option<u16>,
}

impl Inet {
    /// Create an address without a port.
    pub fn new(address: IpAddr) -> Self {
        Self { address, port: None }
    }

    /// Create an address with a port.
    pub fn with_port(address: IpAddr, port: u16) -> Self {
        Self { address, port: Some(port) }
    }
}

impl fmt::Display for Inet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.address, self.port) {
            (IpAddr::V6(ip), Some(port)) => write!(f, "[{}]:{}", ip, port),
            (ip, Some(port)) => write!(f, "{}:{}", ip, port),
            (ip, None) => write!(f, "{}", ip),
        }
    }
}

/// Growable byte buffer with a single read/write cursor.
///
/// Writes land at the cursor and extend the written extent; capacity grows to
/// the next multiple of the step that fits the write. Reads consume from the cursor up to the written extent.
#[derive(Clone)]
pub struct ByteBuffer {
    data: Vec<u8>,
    pos: usize,
    len: usize,
    step: usize,
}

impl ByteBuffer {
    /// Create an empty buffer with the default growth step.
    pub fn new() -> Self {
        Self::with_step(DEFAULT_GROWTH_STEP)
    }

    /// Create an empty buffer whose capacity starts at and grows by `step`.
    pub fn with_step(step: usize) -> Self {
        let step = step.max(1);
        Self {
            data: vec![0; step],
            pos: 0,
            len: 0,
            step,
        }
    }

    /// Wrap existing bytes for reading; the cursor starts at 0.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let data = bytes.into();
        let len = data.len();
        Self {
            data,
            pos: 0,
            len,
            step: DEFAULT_GROWTH_STEP,
        }
    }

    /// Current cursor position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left between the cursor and the written extent.
    pub fn remaining(&self) -> usize {
        self.len.saturating_sub(self.pos)
    }

    /// Written extent.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated capacity.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Move the cursor back to the start.
    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    /// The written bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Consume the buffer, returning the written bytes.
    pub fn into_bytes(mut self) -> Bytes {
        self.data.truncate(self.len);
        Bytes::from(self.data)
    }

    // ------------------------------------------------------------------
    // raw access
    // ------------------------------------------------------------------

    fn ensure_readable(&self, needed: usize) -> CodecResult<()> {
        let remaining = self.remaining();
        if remaining < needed {
            return Err(CodecError::UnexpectedEof { needed, remaining });
        }
        Ok(())
    }

    fn ensure_writable(&mut self, needed: usize) {
        let required = self.pos + needed;
        if required > self.data.len() {
            let grown = required.div_ceil(self.step) * self.step;
            self.data.resize(grown, 0);
        }
    }

    /// Read `n` raw bytes.
    pub fn read_raw(&mut self, n: usize) -> CodecResult<&[u8]> {
        self.ensure_readable(n)?;
        let start = self.pos;
        self.pos += n;
        Ok(&self.data[start..self.pos])
    }

    /// Write raw bytes at the cursor.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.ensure_writable(bytes.len());
        self.data[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        self.len = self.len.max(self.pos);
    }

    // ------------------------------------------------------------------
    // fixed width
    // ------------------------------------------------------------------

    /// Read an unsigned byte.
    pub fn read_u8(&mut self) -> CodecResult<u8> {
        self.ensure_readable(1)?;
        let value = self.data[self.pos];
        self.pos += 1;
        Ok(value)
    }

    /// Write an unsigned byte.
    pub fn write_u8(&mut self, value: u8) {
        self.write_raw(&[value]);
    }

    /// Read a signed byte.
    pub fn read_i8(&mut self) -> CodecResult<i8> {
        Ok(self.read_u8()? as i8)
    }

    /// Write a signed byte.
    pub fn write_i8(&mut self, value: i8) {
        self.write_raw(&value.to_be_bytes());
    }

    /// Read a `[short]`.
    pub fn read_u16(&mut self) -> CodecResult<u16> {
        self.ensure_readable(2)?;
        let value = (&self.data[self.pos..]).get_u16();
        self.pos += 2;
        Ok(value)
    }

    /// Write a `[short]`.
    pub fn write_u16(&mut self, value: u16) {
        self.write_raw(&value.to_be_bytes());
    }

    /// Read an `[int]`.
    pub fn read_i32(&mut self) -> CodecResult<i32> {
        self.ensure_readable(4)?;
        let value = (&self.data[self.pos..]).get_i32();
        self.pos += 4;
        Ok(value)
    }

    /// Write an `[int]`.
    pub fn write_i32(&mut self, value: i32) {
        self.write_raw(&value.to_be_bytes());
    }

    /// Read an unsigned 32-bit integer.
    pub fn read_u32(&mut self) -> CodecResult<u32> {
        self.ensure_readable(4)?;
        let value = (&self.data[self.pos..]).get_u32();
        self.pos += 4;
        Ok(value)
    }

    /// Write an unsigned 32-bit integer.
    pub fn write_u32(&mut self, value: u32) {
        self.write_raw(&value.to_be_bytes());
    }

    /// Read a `[long]`.
    pub fn read_i64(&mut self) -> CodecResult<i64> {
        self.ensure_readable(8)?;
        let value = (&self.data[self.pos..]).get_i64();
        self.pos += 8;
        Ok(value)
    }

    /// Write a `[long]`.
    pub fn write_i64(&mut self, value: i64) {
        self.write_raw(&value.to_be_bytes());
    }

    // ------------------------------------------------------------------
    // strings
    // ------------------------------------------------------------------

    fn read_utf8(&mut self, len: usize) -> CodecResult<String> {
        let raw = self.read_raw(len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8)
    }

    /// Read a `[string]`.
    pub fn read_string(&mut self) -> CodecResult<String> {
        let len = self.read_u16()? as usize;
        self.read_utf8(len)
    }

    /// Write a `[string]`.
    pub fn write_string(&mut self, value: &str) -> CodecResult<()> {
        let len = u16::try_from(value.len()).map_err(|_| {
            CodecError::Overflow(format!("string of {} bytes exceeds [string] limit", value.len()))
        })?;
        self.write_u16(len);
        self.write_raw(value.as_bytes());
        Ok(())
    }

    /// Read a `[long string]`.
    pub fn read_long_string(&mut self) -> CodecResult<String> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(CodecError::InvalidValue(format!("negative [long string] length {}", len)));
        }
        self.read_utf8(len as usize)
    }

    /// Write a `[long string]`.
    pub fn write_long_string(&mut self, value: &str) -> CodecResult<()> {
        let len = i32::try_from(value.len()).map_err(|_| {
            CodecError::Overflow(format!("string of {} bytes exceeds [long string] limit", value.len()))
        })?;
        self.write_i32(len);
        self.write_raw(value.as_bytes());
        Ok(())
    }

    /// Read a `[string list]`.
    pub fn read_string_list(&mut self) -> CodecResult<Vec<String>> {
        let count = self.read_u16()? as usize;
        let mut list = Vec::with_capacity(count.min(self.remaining() / 2 + 1));
        for _ in 0..count {
            list.push(self.read_string()?);
        }
        Ok(list)
    }

    /// Write a `[string list]`.
    pub fn write_string_list<S: AsRef<str>>(&mut self, values: &[S]) -> CodecResult<()> {
        self.write_count(values.len())?;
        for value in values {
            self.write_string(value.as_ref())?;
        }
        Ok(())
    }

    /// Read a `[string map]`.
    pub fn read_string_map(&mut self) -> CodecResult<BTreeMap<String, String>> {
        let count = self.read_u16()? as usize;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let key = self.read_string()?;
            let value = self.read_string()?;
            map.insert(key, value);
        }
        Ok(map)
    }

    /// Write a `[string map]`.
    pub fn write_string_map(&mut self, map: &BTreeMap<String, String>) -> CodecResult<()> {
        self.write_count(map.len())?;
        for (key, value) in map {
            self.write_string(key)?;
            self.write_string(value)?;
        }
        Ok(())
    }

    /// Read a `[string multimap]`.
    pub fn read_string_multimap(&mut self) -> CodecResult<BTreeMap<String, Vec<String>>> {
        let count = self.read_u16()? as usize;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let key = self.read_string()?;
            let values = self.read_string_list()?;
            map.insert(key, values);
        }
        Ok(map)
    }

    /// Write a `[string multimap]`.
    pub fn write_string_multimap(&mut self, map: &BTreeMap<String, Vec<String>>) -> CodecResult<()> {
        self.write_count(map.len())?;
        for (key, values) in map {
            self.write_string(key)?;
            self.write_string_list(values)?;
        }
        Ok(())
    }

    /// Write a 16-bit element count.
    pub fn write_count(&mut self, count: usize) -> CodecResult<()> {
        let count = u16::try_from(count)
            .map_err(|_| CodecError::Overflow(format!("{} elements exceed a [short] count", count)))?;
        self.write_u16(count);
        Ok(())
    }

    // ------------------------------------------------------------------
    // bytes
    // ------------------------------------------------------------------

    /// Read a `[bytes]`; a negative length is null.
    pub fn read_bytes(&mut self) -> CodecResult<Option<Bytes>> {
        let len = self.read_i32()?;
        if len < 0 {
            return Ok(None);
        }
        let raw = self.read_raw(len as usize)?;
        Ok(Some(Bytes::copy_from_slice(raw)))
    }

    /// Write a `[bytes]`; `None` is written as length -1.
    pub fn write_bytes(&mut self, value: Option<&[u8]>) -> CodecResult<()> {
        match value {
            Some(bytes) => {
                let len = i32::try_from(bytes.len()).map_err(|_| {
                    CodecError::Overflow(format!("{} bytes exceed [bytes] limit", bytes.len()))
                })?;
                self.write_i32(len);
                self.write_raw(bytes);
            }
            None => self.write_i32(-1),
        }
        Ok(())
    }

    /// Read a `[short bytes]`; an empty value reads as null.
    pub fn read_short_bytes(&mut self) -> CodecResult<Option<Bytes>> {
        let len = self.read_u16()? as usize;
        if len == 0 {
            return Ok(None);
        }
        let raw = self.read_raw(len)?;
        Ok(Some(Bytes::copy_from_slice(raw)))
    }

    /// Write a `[short bytes]`.
    pub fn write_short_bytes(&mut self, value: &[u8]) -> CodecResult<()> {
        let len = u16::try_from(value.len()).map_err(|_| {
            CodecError::Overflow(format!("{} bytes exceed [short bytes] limit", value.len()))
        })?;
        self.write_u16(len);
        self.write_raw(value);
        Ok(())
    }

    // ------------------------------------------------------------------
    // composite
    // ------------------------------------------------------------------

    /// Read an `[inet]`.
    pub fn read_inet(&mut self) -> CodecResult<Inet> {
        let size = self.read_u8()? as usize;
        let address = match size {
            4 => {
                let raw = self.read_raw(4)?;
                IpAddr::V4(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]))
            }
            16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(self.read_raw(16)?);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            other => {
                return Err(CodecError::InvalidValue(format!("inet address size {}", other)));
            }
        };
        let port = self.read_i32()?;
        let port = match port {
            0 => None,
            p => Some(
                u16::try_from(p).map_err(|_| CodecError::InvalidValue(format!("inet port {}", p)))?,
            ),
        };
        Ok(Inet { address, port })
    }

    /// Write an `[inet]`.
    pub fn write_inet(&mut self, inet: &Inet) {
        match inet.address {
            IpAddr::V4(ip) => {
                self.write_u8(4);
                self.write_raw(&ip.octets());
            }
            IpAddr::V6(ip) => {
                self.write_u8(16);
                self.write_raw(&ip.octets());
            }
        }
        self.write_i32(inet.port.map(i32::from).unwrap_or(0));
    }

    /// Read a `[uuid]`.
    pub fn read_uuid(&mut self) -> CodecResult<Uuid> {
        let raw = self.read_raw(16)?;
        Uuid::from_slice(raw).map_err(|e| CodecError::InvalidValue(e.to_string()))
    }

    /// Write a `[uuid]`.
    pub fn write_uuid(&mut self, uuid: &Uuid) {
        self.write_raw(uuid.as_bytes());
    }
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("position", &self.pos)
            .field("len", &self.len)
            .field("capacity", &self.data.len())
            .finish()
    }
}
