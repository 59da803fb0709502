//! Delta payloads.
//!
//! A [`DeltaInfo`] describes one local mutation in a form that replicas can
//! replay without receiving the whole entity.
//!
//! ```text
//! [type: u8]
//!   0 ADDS       [count: i32] count x byte-array
//!   1 REMS       [count: i32] count x byte-array
//!   2 APPEND     [sequence: i32] byte-array
//!   3 TIMESTAMP  [expiration: i64]
//!   4 ZADDS      [count: i32] count x (byte-array, score: f64)
//! ```

use crate::error::{DeltaError, Result};
use basalt_wire::{DataInput, DataOutput, WireError, WireVersion};
use bytes::Bytes;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DeltaType {
    Adds = 0,
    Rems = 1,
    Append = 2,
    Timestamp = 3,
    ZAdds = 4,
}

impl DeltaType {
    pub fn from_u8(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(DeltaType::Adds),
            1 => Ok(DeltaType::Rems),
            2 => Ok(DeltaType::Append),
            3 => Ok(DeltaType::Timestamp),
            4 => Ok(DeltaType::ZAdds),
            other => Err(DeltaError::UnknownDeltaType(other)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DeltaType::Adds => "ADDS",
            DeltaType::Rems => "REMS",
            DeltaType::Append => "APPEND",
            DeltaType::Timestamp => "TIMESTAMP",
            DeltaType::ZAdds => "ZADDS",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DeltaInfo {
    Adds(Vec<Bytes>),
    Rems(Vec<Bytes>),
    Append { sequence: i32, bytes: Bytes },
    Timestamp(i64),
    ZAdds(Vec<(Bytes, f64)>),
}

impl DeltaInfo {
    pub fn delta_type(&self) -> DeltaType {
        match self {
            DeltaInfo::Adds(_) => DeltaType::Adds,
            DeltaInfo::Rems(_) => DeltaType::Rems,
            DeltaInfo::Append { .. } => DeltaType::Append,
            DeltaInfo::Timestamp(_) => DeltaType::Timestamp,
            DeltaInfo::ZAdds(_) => DeltaType::ZAdds,
        }
    }

    pub fn serialize_to(&self, out: &mut DataOutput) {
        out.write_u8(self.delta_type() as u8);
        match self {
            DeltaInfo::Adds(members) | DeltaInfo::Rems(members) => {
                out.write_i32(members.len() as i32);
                for member in members {
                    out.write_byte_array(member);
                }
            }
            DeltaInfo::Append { sequence, bytes } => {
                out.write_i32(*sequence);
                out.write_byte_array(bytes);
            }
            DeltaInfo::Timestamp(timestamp) => out.write_i64(*timestamp),
            DeltaInfo::ZAdds(pairs) => {
                out.write_i32(pairs.len() as i32);
                for (member, score) in pairs {
                    out.write_byte_array(member);
                    out.write_f64(*score);
                }
            }
        }
    }

    pub fn read_from(input: &mut DataInput) -> Result<Self> {
        let delta = match DeltaType::from_u8(input.read_u8()?)? {
            DeltaType::Adds => DeltaInfo::Adds(read_members(input)?),
            DeltaType::Rems => DeltaInfo::Rems(read_members(input)?),
            DeltaType::Append => {
                let sequence = input.read_i32()?;
                let bytes = input.read_byte_array()?;
                DeltaInfo::Append { sequence, bytes }
            }
            DeltaType::Timestamp => DeltaInfo::Timestamp(input.read_i64()?),
            DeltaType::ZAdds => {
                let count = read_count(input)?;
                let mut pairs = Vec::with_capacity(count.min(input.remaining()));
                for _ in 0..count {
                    let member = input.read_byte_array()?;
                    let score = input.read_f64()?;
                    pairs.push((member, score));
                }
                DeltaInfo::ZAdds(pairs)
            }
        };
        Ok(delta)
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut out = DataOutput::new(WireVersion::CURRENT);
        self.serialize_to(&mut out);
        out.freeze()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut input = DataInput::new(Bytes::copy_from_slice(bytes), WireVersion::CURRENT);
        Self::read_from(&mut input)
    }
}

fn read_count(input: &mut DataInput) -> Result<usize> {
    let count = input.read_i32()?;
    usize::try_from(count).map_err(|_| DeltaError::Wire(WireError::InvalidArrayLength(count)))
}

fn read_members(input: &mut DataInput) -> Result<Vec<Bytes>> {
    let count = read_count(input)?;
    let mut members = Vec::with_capacity(count.min(input.remaining()));
    for _ in 0..count {
        members.push(input.read_byte_array()?);
    }
    Ok(members)
}
