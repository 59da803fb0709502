//! Unordered set of byte-string members.

use crate::delta_info::DeltaInfo;
use crate::entity::{DeltaEntity, EntityHeader, EntityKind};
use crate::error::{DeltaError, Result};
use basalt_wire::{DataInput, DataOutput, WireError};
use bytes::Bytes;
use rand::seq::IteratorRandom;
use std::collections::BTreeSet;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SetEntity {
    header: EntityHeader,
    members: BTreeSet<Bytes>,
}

impl SetEntity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_members<I, B>(members: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self {
            header: EntityHeader::new(),
            members: members.into_iter().map(Into::into).collect(),
        }
    }

    /// Add members. The delta lists only the members that were new.
    pub fn sadd(&mut self, members: Vec<Bytes>) -> Option<DeltaInfo> {
        let added: Vec<Bytes> = members
            .into_iter()
            .filter(|m| self.members.insert(m.clone()))
            .collect();
        (!added.is_empty()).then_some(DeltaInfo::Adds(added))
    }

    pub fn srem(&mut self, members: Vec<Bytes>) -> Option<DeltaInfo> {
        let removed: Vec<Bytes> = members
            .into_iter()
            .filter(|m| self.members.remove(m))
            .collect();
        (!removed.is_empty()).then_some(DeltaInfo::Rems(removed))
    }

    /// Remove up to `count` random members.
    pub fn spop(&mut self, count: usize) -> (Vec<Bytes>, Option<DeltaInfo>) {
        if self.members.is_empty() || count == 0 {
            return (Vec::new(), None);
        }
        let popped: Vec<Bytes> = if count >= self.members.len() {
            std::mem::take(&mut self.members).into_iter().collect()
        } else {
            let mut rng = rand::thread_rng();
            let chosen = self
                .members
                .iter()
                .cloned()
                .choose_multiple(&mut rng, count);
            for member in &chosen {
                self.members.remove(member);
            }
            chosen
        };
        let delta = DeltaInfo::Rems(popped.clone());
        (popped, Some(delta))
    }

    pub fn sismember(&self, member: &[u8]) -> bool {
        self.members.contains(member)
    }

    pub fn scard(&self) -> usize {
        self.members.len()
    }

    pub fn members(&self) -> impl Iterator<Item = &Bytes> {
        self.members.iter()
    }
}

impl DeltaEntity for SetEntity {
    fn header(&self) -> &EntityHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut EntityHeader {
        &mut self.header
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Set
    }

    fn apply_data_delta(&mut self, delta: &DeltaInfo) -> Result<()> {
        match delta {
            DeltaInfo::Adds(members) => {
                self.members.extend(members.iter().cloned());
                Ok(())
            }
            DeltaInfo::Rems(members) => {
                for member in members {
                    self.members.remove(member);
                }
                Ok(())
            }
            other => Err(DeltaError::invalid(
                self.kind().name(),
                other.delta_type().name(),
            )),
        }
    }

    fn is_logically_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn write_body(&self, out: &mut DataOutput) -> Result<()> {
        out.write_i32(self.members.len() as i32);
        for member in &self.members {
            out.write_byte_array(member);
        }
        Ok(())
    }

    fn read_body(input: &mut DataInput) -> Result<Self> {
        let count = input.read_i32()?;
        let count = usize::try_from(count)
            .map_err(|_| DeltaError::Wire(WireError::InvalidArrayLength(count)))?;
        let mut members = BTreeSet::new();
        for _ in 0..count {
            members.insert(input.read_byte_array()?);
        }
        Ok(Self {
            header: EntityHeader::new(),
            members,
        })
    }
}
