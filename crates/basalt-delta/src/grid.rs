//! The closed set of entity types a region can hold.

use crate::delta_info::DeltaInfo;
use crate::entity::{DeltaEntity, EntityHeader, EntityKind};
use crate::error::Result;
use crate::set::SetEntity;
use crate::sorted_set::SortedSetEntity;
use crate::string::StringEntity;
use basalt_wire::{DataInput, DataOutput};

/// Any region value. The snapshot is prefixed with the [`EntityKind`] tag.
#[derive(Clone, Debug, PartialEq)]
pub enum GridEntity {
    Set(SetEntity),
    String(StringEntity),
    SortedSet(SortedSetEntity),
}

impl GridEntity {
    pub fn as_set(&self) -> Option<&SetEntity> {
        match self {
            GridEntity::Set(set) => Some(set),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&StringEntity> {
        match self {
            GridEntity::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_sorted_set(&self) -> Option<&SortedSetEntity> {
        match self {
            GridEntity::SortedSet(z) => Some(z),
            _ => None,
        }
    }

    fn inner(&self) -> &dyn DeltaEntity {
        match self {
            GridEntity::Set(e) => e,
            GridEntity::String(e) => e,
            GridEntity::SortedSet(e) => e,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn DeltaEntity {
        match self {
            GridEntity::Set(e) => e,
            GridEntity::String(e) => e,
            GridEntity::SortedSet(e) => e,
        }
    }
}

impl From<SetEntity> for GridEntity {
    fn from(e: SetEntity) -> Self {
        GridEntity::Set(e)
    }
}

impl From<StringEntity> for GridEntity {
    fn from(e: StringEntity) -> Self {
        GridEntity::String(e)
    }
}

impl From<SortedSetEntity> for GridEntity {
    fn from(e: SortedSetEntity) -> Self {
        GridEntity::SortedSet(e)
    }
}

impl DeltaEntity for GridEntity {
    fn header(&self) -> &EntityHeader {
        self.inner().header()
    }

    fn header_mut(&mut self) -> &mut EntityHeader {
        self.inner_mut().header_mut()
    }

    fn kind(&self) -> EntityKind {
        self.inner().kind()
    }

    fn apply_data_delta(&mut self, delta: &DeltaInfo) -> Result<()> {
        self.inner_mut().apply_data_delta(delta)
    }

    fn is_logically_empty(&self) -> bool {
        self.inner().is_logically_empty()
    }

    fn write_body(&self, out: &mut DataOutput) -> Result<()> {
        out.write_u8(self.kind() as u8);
        self.inner().write_body(out)
    }

    fn read_body(input: &mut DataInput) -> Result<Self> {
        let entity = match EntityKind::from_u8(input.read_u8()?)? {
            EntityKind::Set => GridEntity::Set(SetEntity::read_body(input)?),
            EntityKind::String => GridEntity::String(StringEntity::read_body(input)?),
            EntityKind::SortedSet => GridEntity::SortedSet(SortedSetEntity::read_body(input)?),
        };
        Ok(entity)
    }
}
