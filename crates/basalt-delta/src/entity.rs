//! The delta contract every replicated entity implements.

use crate::delta_info::DeltaInfo;
use crate::error::{DeltaError, Result};
use basalt_wire::{DataInput, DataOutput, WireVersion};
use bytes::Bytes;

/// Expiration timestamp of an entity that never expires.
pub const NO_EXPIRATION: i64 = -1;

/// `pttl` result for an entity with no expiration.
pub const TTL_NONE: i64 = -1;
/// `pttl` result for an entity that has already expired.
pub const TTL_EXPIRED: i64 = -2;

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum EntityKind {
    Set = 0,
    String = 1,
    SortedSet = 2,
}

impl EntityKind {
    pub fn from_u8(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(EntityKind::Set),
            1 => Ok(EntityKind::String),
            2 => Ok(EntityKind::SortedSet),
            other => Err(DeltaError::UnknownEntityKind(other)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EntityKind::Set => "set",
            EntityKind::String => "string",
            EntityKind::SortedSet => "sorted set",
        }
    }
}

/// State shared by all entity types.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityHeader {
    expiration_timestamp: i64,
    pending: Option<DeltaInfo>,
}

impl EntityHeader {
    pub fn new() -> Self {
        Self {
            expiration_timestamp: NO_EXPIRATION,
            pending: None,
        }
    }

    pub fn expiration_timestamp(&self) -> i64 {
        self.expiration_timestamp
    }

    pub(crate) fn set_expiration_timestamp(&mut self, timestamp: i64) {
        self.expiration_timestamp = timestamp;
    }

    pub(crate) fn stage(&mut self, delta: DeltaInfo) {
        self.pending = Some(delta);
    }

    pub(crate) fn take_pending(&mut self) -> Option<DeltaInfo> {
        self.pending.take()
    }

    pub(crate) fn clear_pending(&mut self) {
        self.pending = None;
    }

    pub fn pending(&self) -> Option<&DeltaInfo> {
        self.pending.as_ref()
    }
}

impl Default for EntityHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of [`DeltaEntity::pexpireat`].
#[derive(Clone, Debug, PartialEq)]
pub enum ExpireAction {
    /// The timestamp is already in the past; the entry must be removed.
    Remove,
    /// Commit the entity with this delta.
    Commit(DeltaInfo),
}

/// An entity that can ship its mutations as deltas.
///
/// Implementors provide the type-specific parts; staging, capture and
/// expiration come for free.
pub trait DeltaEntity: Send + Sync {
    fn header(&self) -> &EntityHeader;

    fn header_mut(&mut self) -> &mut EntityHeader;

    fn kind(&self) -> EntityKind;

    /// Apply a non-timestamp delta. Must reject an unsuitable delta before
    /// touching any state.
    fn apply_data_delta(&mut self, delta: &DeltaInfo) -> Result<()>;

    /// True when the entity holds nothing and should not be stored.
    fn is_logically_empty(&self) -> bool;

    fn write_body(&self, out: &mut DataOutput) -> Result<()>;

    fn read_body(input: &mut DataInput) -> Result<Self>
    where
        Self: Sized;

    fn has_pending_delta(&self) -> bool {
        self.header().pending().is_some()
    }

    /// Take the staged delta. Calling this with nothing staged is a caller
    /// bug and fails with [`DeltaError::NoPendingDelta`].
    fn capture_delta(&mut self) -> Result<DeltaInfo> {
        self.header_mut()
            .take_pending()
            .ok_or(DeltaError::NoPendingDelta)
    }

    fn expiration_timestamp(&self) -> i64 {
        self.header().expiration_timestamp()
    }

    /// Set the expiration and return the delta that carries it.
    fn set_expiration(&mut self, timestamp: i64) -> DeltaInfo {
        self.header_mut().set_expiration_timestamp(timestamp);
        DeltaInfo::Timestamp(timestamp)
    }

    fn pexpireat(&mut self, timestamp: i64, now: i64) -> ExpireAction {
        if now >= timestamp {
            ExpireAction::Remove
        } else {
            ExpireAction::Commit(self.set_expiration(timestamp))
        }
    }

    /// Clear the expiration. `None` when there was none to clear.
    fn persist(&mut self) -> Option<DeltaInfo> {
        if self.expiration_timestamp() == NO_EXPIRATION {
            return None;
        }
        Some(self.set_expiration(NO_EXPIRATION))
    }

    /// Milliseconds to live, [`TTL_NONE`] or [`TTL_EXPIRED`].
    fn pttl(&self, now: i64) -> i64 {
        match self.expiration_timestamp() {
            NO_EXPIRATION => TTL_NONE,
            timestamp if now >= timestamp => TTL_EXPIRED,
            timestamp => timestamp - now,
        }
    }

    fn has_expired_at(&self, now: i64) -> bool {
        match self.expiration_timestamp() {
            NO_EXPIRATION => false,
            timestamp => now >= timestamp,
        }
    }

    fn has_expired(&self) -> bool {
        self.has_expired_at(now_millis())
    }

    /// Full snapshot: expiration then the type-specific body.
    fn to_data(&self, out: &mut DataOutput) -> Result<()> {
        out.write_i64(self.expiration_timestamp());
        self.write_body(out)
    }

    fn from_data(input: &mut DataInput) -> Result<Self>
    where
        Self: Sized,
    {
        let expiration = input.read_i64()?;
        let mut entity = Self::read_body(input)?;
        entity.header_mut().set_expiration_timestamp(expiration);
        Ok(entity)
    }

    fn to_bytes(&self) -> Result<Bytes> {
        let mut out = DataOutput::new(WireVersion::CURRENT);
        self.to_data(&mut out)?;
        Ok(out.freeze())
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self>
    where
        Self: Sized,
    {
        let mut input = DataInput::new(Bytes::copy_from_slice(bytes), WireVersion::CURRENT);
        Self::from_data(&mut input)
    }
}

/// Apply a received delta to `entity`.
///
/// Timestamp deltas apply to every entity type; the rest are handed to the
/// entity, which rejects anything it does not understand.
pub fn apply_delta<E: DeltaEntity + ?Sized>(entity: &mut E, delta: &DeltaInfo) -> Result<()> {
    match delta {
        DeltaInfo::Timestamp(timestamp) => {
            entity.header_mut().set_expiration_timestamp(*timestamp);
            Ok(())
        }
        other => entity.apply_data_delta(other),
    }
}

/// Decode a serialized delta and apply it.
pub fn apply_delta_bytes<E: DeltaEntity + ?Sized>(entity: &mut E, bytes: &[u8]) -> Result<()> {
    let delta = DeltaInfo::from_bytes(bytes)?;
    apply_delta(entity, &delta)
}
