//! Big-endian data streams.
//!
//! `DataOutput` and `DataInput` are the only way message bodies touch bytes.
//! Both carry the [`WireVersion`] of the peer on the other end so that
//! version-gated encoders can branch without threading it through every call.
//!
//! # Array framing
//!
//! ```text
//! null        0xFF
//! len <= 252  [len: u8]
//! len <= u16  0xFE [len: u16]
//! otherwise   0xFD [len: i32]
//! ```

use crate::error::{Result, WireError};
use crate::version::WireVersion;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Marker for a null array.
pub const NULL_ARRAY: u8 = 0xFF;
/// Marker for a length that follows as a u16.
pub const SHORT_ARRAY_LEN: u8 = 0xFE;
/// Marker for a length that follows as an i32.
pub const INT_ARRAY_LEN: u8 = 0xFD;
/// Largest length that fits in the marker byte itself.
pub const MAX_BYTE_ARRAY_LEN: usize = 252;

/// Test a single bit of a status byte.
pub fn test_flag(status: u8, flag: u8) -> bool {
    status & flag != 0
}

/// Growable output stream.
#[derive(Debug, Default)]
pub struct DataOutput {
    buf: BytesMut,
    version: WireVersion,
}

impl DataOutput {
    pub fn new(version: WireVersion) -> Self {
        Self {
            buf: BytesMut::new(),
            version,
        }
    }

    pub fn with_capacity(capacity: usize, version: WireVersion) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            version,
        }
    }

    pub fn version(&self) -> WireVersion {
        self.version
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Finish writing and hand out the bytes.
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    pub fn write_i8(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.put_u16(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.buf.put_i16(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64(value);
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buf.put_f64(value);
    }

    /// Append bytes with no framing.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Write an array length, `None` meaning a null array.
    pub fn write_array_length(&mut self, len: Option<usize>) {
        match len {
            None => self.buf.put_u8(NULL_ARRAY),
            Some(len) if len <= MAX_BYTE_ARRAY_LEN => self.buf.put_u8(len as u8),
            Some(len) if len <= u16::MAX as usize => {
                self.buf.put_u8(SHORT_ARRAY_LEN);
                self.buf.put_u16(len as u16);
            }
            Some(len) => {
                self.buf.put_u8(INT_ARRAY_LEN);
                self.buf.put_i32(len as i32);
            }
        }
    }

    pub fn write_byte_array(&mut self, bytes: &[u8]) {
        self.write_array_length(Some(bytes.len()));
        self.buf.put_slice(bytes);
    }

    pub fn write_optional_byte_array(&mut self, bytes: Option<&[u8]>) {
        match bytes {
            Some(bytes) => self.write_byte_array(bytes),
            None => self.write_array_length(None),
        }
    }

    /// Modified-UTF style string: u16 byte length then UTF-8.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        let len = u16::try_from(value.len()).map_err(|_| {
            WireError::MalformedMessage(format!("string of {} bytes is too long", value.len()))
        })?;
        self.buf.put_u16(len);
        self.buf.put_slice(value.as_bytes());
        Ok(())
    }
}

/// Cursor over a received frame.
#[derive(Debug, Clone)]
pub struct DataInput {
    buf: Bytes,
    version: WireVersion,
}

impl DataInput {
    pub fn new(bytes: impl Into<Bytes>, version: WireVersion) -> Self {
        Self {
            buf: bytes.into(),
            version,
        }
    }

    pub fn version(&self) -> WireVersion {
        self.version
    }

    /// Switch the version mid-stream, after reading a frame header.
    pub fn set_version(&mut self, version: WireVersion) {
        self.version = version;
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_empty(&self) -> bool {
        !self.buf.has_remaining()
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        let remaining = self.buf.remaining();
        if remaining < needed {
            return Err(WireError::Truncated { needed, remaining });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        self.ensure(1)?;
        Ok(self.buf.get_i8())
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.ensure(2)?;
        Ok(self.buf.get_i16())
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.ensure(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.ensure(8)?;
        Ok(self.buf.get_i64())
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        self.ensure(8)?;
        Ok(self.buf.get_f64())
    }

    /// Take `len` bytes without copying.
    pub fn read_raw(&mut self, len: usize) -> Result<Bytes> {
        self.ensure(len)?;
        Ok(self.buf.split_to(len))
    }

    /// Everything that has not been read yet.
    pub fn read_remaining(&mut self) -> Bytes {
        let len = self.buf.remaining();
        self.buf.split_to(len)
    }

    pub fn read_array_length(&mut self) -> Result<Option<usize>> {
        match self.read_u8()? {
            NULL_ARRAY => Ok(None),
            SHORT_ARRAY_LEN => Ok(Some(self.read_u16()? as usize)),
            INT_ARRAY_LEN => {
                let len = self.read_i32()?;
                if len < 0 {
                    return Err(WireError::InvalidArrayLength(len));
                }
                Ok(Some(len as usize))
            }
            len if (len as usize) <= MAX_BYTE_ARRAY_LEN => Ok(Some(len as usize)),
            other => Err(WireError::InvalidArrayLength(i32::from(other as i8))),
        }
    }

    pub fn read_optional_byte_array(&mut self) -> Result<Option<Bytes>> {
        match self.read_array_length()? {
            Some(len) => Ok(Some(self.read_raw(len)?)),
            None => Ok(None),
        }
    }

    /// Read a byte array that must not be null.
    pub fn read_byte_array(&mut self) -> Result<Bytes> {
        self.read_optional_byte_array()?
            .ok_or_else(|| WireError::MalformedMessage("unexpected null byte array".into()))
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let raw = self.read_raw(len)?;
        Ok(String::from_utf8(raw.to_vec())?)
    }
}
