//! Compact encoding of the (thread id, sequence id) pair.
//!
//! Each value is written in the narrowest signed width that holds it,
//! preceded by a one-byte tag:
//!
//! ```text
//! [tag: u8][value]     tag 0 = i8, 1 = i16, 2 = i32, 3 = i64 (big-endian)
//! ```
//!
//! Event ids are small in practice, so most pairs fit in four bytes.

use crate::error::{EventIdError, Result};
use basalt_wire::{DataInput, DataOutput, WireVersion};
use bytes::Bytes;

/// The four fixed widths a value can be written in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdWidth {
    Byte,
    Short,
    Int,
    Long,
}

impl IdWidth {
    /// Narrowest width that represents `value`.
    pub fn for_value(value: i64) -> Self {
        if i8::try_from(value).is_ok() {
            IdWidth::Byte
        } else if i16::try_from(value).is_ok() {
            IdWidth::Short
        } else if i32::try_from(value).is_ok() {
            IdWidth::Int
        } else {
            IdWidth::Long
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            IdWidth::Byte => 0,
            IdWidth::Short => 1,
            IdWidth::Int => 2,
            IdWidth::Long => 3,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(IdWidth::Byte),
            1 => Ok(IdWidth::Short),
            2 => Ok(IdWidth::Int),
            3 => Ok(IdWidth::Long),
            other => Err(EventIdError::InvalidWidthTag(other)),
        }
    }

    /// Bytes taken by the value, tag excluded.
    pub fn size(self) -> usize {
        match self {
            IdWidth::Byte => 1,
            IdWidth::Short => 2,
            IdWidth::Int => 4,
            IdWidth::Long => 8,
        }
    }

    fn write(self, out: &mut DataOutput, value: i64) {
        out.write_u8(self.tag());
        match self {
            IdWidth::Byte => out.write_i8(value as i8),
            IdWidth::Short => out.write_i16(value as i16),
            IdWidth::Int => out.write_i32(value as i32),
            IdWidth::Long => out.write_i64(value),
        }
    }

    fn read(self, input: &mut DataInput) -> Result<i64> {
        let value = match self {
            IdWidth::Byte => i64::from(input.read_i8()?),
            IdWidth::Short => i64::from(input.read_i16()?),
            IdWidth::Int => i64::from(input.read_i32()?),
            IdWidth::Long => input.read_i64()?,
        };
        Ok(value)
    }
}

/// Write one tagged value.
pub fn write_compact(out: &mut DataOutput, value: i64) {
    IdWidth::for_value(value).write(out, value);
}

/// Read one tagged value.
pub fn read_compact(input: &mut DataInput) -> Result<i64> {
    let width = IdWidth::from_tag(input.read_u8()?)?;
    width.read(input)
}

/// Encode thread id then sequence id.
pub fn encode_pair(thread_id: i64, sequence_id: i64) -> Bytes {
    let size = 2 + IdWidth::for_value(thread_id).size() + IdWidth::for_value(sequence_id).size();
    let mut out = DataOutput::with_capacity(size, WireVersion::CURRENT);
    write_compact(&mut out, thread_id);
    write_compact(&mut out, sequence_id);
    out.freeze()
}

/// Decode a pair produced by [`encode_pair`].
pub fn decode_pair(bytes: &[u8]) -> Result<(i64, i64)> {
    let mut input = DataInput::new(Bytes::copy_from_slice(bytes), WireVersion::CURRENT);
    let thread_id = read_compact(&mut input)?;
    let sequence_id = read_compact(&mut input)?;
    Ok((thread_id, sequence_id))
}
