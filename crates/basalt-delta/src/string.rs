//! Byte-string values with append deltas.
//!
//! Each append bumps a sequence number that travels with the delta. A replica
//! applies an append only when it is the next one in sequence; a gap means the
//! replica missed an update and needs the full value.

use crate::delta_info::DeltaInfo;
use crate::entity::{DeltaEntity, EntityHeader, EntityKind};
use crate::error::{DeltaError, Result};
use basalt_wire::{DataInput, DataOutput};
use bytes::{Bytes, BytesMut};
use tracing::trace;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StringEntity {
    header: EntityHeader,
    value: BytesMut,
    append_sequence: i32,
}

impl StringEntity {
    pub fn new(value: impl AsRef<[u8]>) -> Self {
        Self {
            header: EntityHeader::new(),
            value: BytesMut::from(value.as_ref()),
            append_sequence: 0,
        }
    }

    pub fn get(&self) -> &[u8] {
        &self.value
    }

    pub fn strlen(&self) -> usize {
        self.value.len()
    }

    pub fn append_sequence(&self) -> i32 {
        self.append_sequence
    }

    /// Replace the value. Replacement ships as a full value, never a delta.
    pub fn set(&mut self, value: impl AsRef<[u8]>) {
        self.value = BytesMut::from(value.as_ref());
    }

    /// Append and return the new length with the delta to ship.
    pub fn append(&mut self, bytes: Bytes) -> (usize, DeltaInfo) {
        self.value.extend_from_slice(&bytes);
        self.append_sequence = self.append_sequence.wrapping_add(1);
        let delta = DeltaInfo::Append {
            sequence: self.append_sequence,
            bytes,
        };
        (self.value.len(), delta)
    }
}

impl DeltaEntity for StringEntity {
    fn header(&self) -> &EntityHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut EntityHeader {
        &mut self.header
    }

    fn kind(&self) -> EntityKind {
        EntityKind::String
    }

    fn apply_data_delta(&mut self, delta: &DeltaInfo) -> Result<()> {
        let DeltaInfo::Append { sequence, bytes } = delta else {
            return Err(DeltaError::invalid(
                self.kind().name(),
                delta.delta_type().name(),
            ));
        };

        let expected = self.append_sequence.wrapping_add(1);
        if *sequence == expected {
            self.value.extend_from_slice(bytes);
            self.append_sequence = *sequence;
            Ok(())
        } else if *sequence == self.append_sequence {
            trace!(sequence, "append already applied");
            Ok(())
        } else {
            Err(DeltaError::invalid(
                self.kind().name(),
                format!(
                    "APPEND (sequence {} but expected {})",
                    sequence, expected
                ),
            ))
        }
    }

    fn is_logically_empty(&self) -> bool {
        false
    }

    fn write_body(&self, out: &mut DataOutput) -> Result<()> {
        out.write_i32(self.append_sequence);
        out.write_byte_array(&self.value);
        Ok(())
    }

    fn read_body(input: &mut DataInput) -> Result<Self> {
        let append_sequence = input.read_i32()?;
        let value = input.read_byte_array()?;
        Ok(Self {
            header: EntityHeader::new(),
            value: BytesMut::from(&value[..]),
            append_sequence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::apply_delta;

    #[test]
    fn test_append_sequence_advances() {
        let mut s = StringEntity::new("ab");
        let (len, delta) = s.append(Bytes::from_static(b"cd"));
        assert_eq!(len, 4);
        assert_eq!(s.get(), b"abcd");
        assert_eq!(
            delta,
            DeltaInfo::Append {
                sequence: 1,
                bytes: Bytes::from_static(b"cd")
            }
        );
    }

    #[test]
    fn test_replica_applies_in_order() {
        let mut primary = StringEntity::new("");
        let mut replica = primary.clone();
        let (_, d1) = primary.append(Bytes::from_static(b"x"));
        let (_, d2) = primary.append(Bytes::from_static(b"y"));
        apply_delta(&mut replica, &d1).unwrap();
        apply_delta(&mut replica, &d2).unwrap();
        assert_eq!(replica, primary);
    }

    #[test]
    fn test_repeated_append_is_ignored() {
        let mut primary = StringEntity::new("");
        let mut replica = primary.clone();
        let (_, d1) = primary.append(Bytes::from_static(b"x"));
        apply_delta(&mut replica, &d1).unwrap();
        apply_delta(&mut replica, &d1).unwrap();
        assert_eq!(replica.get(), b"x");
    }

    #[test]
    fn test_gap_is_invalid_and_leaves_value() {
        let mut primary = StringEntity::new("base");
        let mut replica = primary.clone();
        primary.append(Bytes::from_static(b"1"));
        let (_, d2) = primary.append(Bytes::from_static(b"2"));

        let err = apply_delta(&mut replica, &d2).unwrap_err();
        assert!(matches!(err, DeltaError::InvalidDelta { .. }));
        assert_eq!(replica.get(), b"base");
        assert_eq!(replica.append_sequence(), 0);
    }

    #[test]
    fn test_adds_rejected() {
        let mut s = StringEntity::new("v");
        assert_eq!(
            apply_delta(&mut s, &DeltaInfo::Adds(vec![])),
            Err(DeltaError::invalid("string", "ADDS"))
        );
    }

    #[test]
    fn test_snapshot_carries_sequence() {
        let mut s = StringEntity::new("v");
        s.append(Bytes::from_static(b"w"));
        let back = StringEntity::from_bytes(&s.to_bytes().unwrap()).unwrap();
        assert_eq!(back.append_sequence(), 1);
        assert_eq!(back, s);
    }
}
