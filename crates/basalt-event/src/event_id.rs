//! Globally unique event identifiers.
//!
//! An [`EventId`] is the triple (membership id, thread id, sequence id). The
//! triple is the dedup key for every mutation in the grid; the bucket id and
//! breadcrumb counter ride along but take no part in equality.

use crate::compact::{decode_pair, encode_pair};
use crate::error::{EventIdError, Result};
use crate::identity::{EventIdentityCache, SystemConnection};
use crate::membership_id::{equal_membership_ids, membership_id_hash};
use crate::producer::ProducerContext;
use basalt_wire::{DataInput, DataOutput, MemberId, WireVersion};
use bytes::Bytes;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Bucket id of an event that is not bucket-scoped.
pub const NO_BUCKET: i32 = -1;

#[derive(Clone, Debug)]
pub struct EventId {
    membership_id: Bytes,
    thread_id: i64,
    sequence_id: i64,
    bucket_id: i32,
    breadcrumb_counter: u8,
}

impl EventId {
    /// Mint a new id for `producer`, reserving its next sequence id.
    pub fn generate(
        cache: &EventIdentityCache,
        connection: Option<&SystemConnection>,
        producer: &ProducerContext,
    ) -> Result<Self> {
        let membership_id = cache.membership_id(connection)?;
        Ok(Self::from_parts(
            membership_id,
            producer.thread_id(),
            producer.reserve_sequence_id(),
        ))
    }

    pub fn from_parts(membership_id: impl Into<Bytes>, thread_id: i64, sequence_id: i64) -> Self {
        Self {
            membership_id: membership_id.into(),
            thread_id,
            sequence_id,
            bucket_id: NO_BUCKET,
            breadcrumb_counter: 0,
        }
    }

    pub fn with_bucket(mut self, bucket_id: i32) -> Self {
        self.bucket_id = bucket_id;
        self
    }

    /// Id for the `offset`-th entry of a batch whose range starts here.
    ///
    /// The derived id is not bucket-scoped.
    pub fn with_offset(&self, offset: i64) -> Result<Self> {
        let sequence_id = self.sequence_id.checked_add(offset).ok_or(
            EventIdError::SequenceOverflow {
                sequence_id: self.sequence_id,
                offset,
            },
        )?;
        Ok(Self::from_parts(
            self.membership_id.clone(),
            self.thread_id,
            sequence_id,
        ))
    }

    pub fn membership_id(&self) -> &Bytes {
        &self.membership_id
    }

    pub fn thread_id(&self) -> i64 {
        self.thread_id
    }

    pub fn sequence_id(&self) -> i64 {
        self.sequence_id
    }

    pub fn bucket_id(&self) -> i32 {
        self.bucket_id
    }

    pub fn breadcrumb_counter(&self) -> u8 {
        self.breadcrumb_counter
    }

    pub fn inc_breadcrumb(&mut self) {
        self.breadcrumb_counter = self.breadcrumb_counter.wrapping_add(1);
    }

    /// Compact (thread id, sequence id) bytes.
    pub fn calc_bytes(&self) -> Bytes {
        encode_pair(self.thread_id, self.sequence_id)
    }

    /// The member that produced this event.
    pub fn distributed_member(&self) -> Result<MemberId> {
        Ok(MemberId::from_essential_bytes(&self.membership_id)?)
    }

    /// Whether both ids were produced by the same member and thread.
    pub fn is_same_producer(&self, other: &EventId) -> bool {
        self.thread_id == other.thread_id
            && equal_membership_ids(&self.membership_id, &other.membership_id)
    }

    pub fn stable_hash(&self) -> i32 {
        let fold = |v: i64| (v ^ ((v as u64) >> 32) as i64) as i32;
        let mut result = 1i32;
        result = result
            .wrapping_mul(31)
            .wrapping_add(membership_id_hash(&self.membership_id));
        result = result.wrapping_mul(31).wrapping_add(fold(self.sequence_id));
        result.wrapping_mul(31).wrapping_add(fold(self.thread_id))
    }

    pub fn to_data(&self, out: &mut DataOutput) -> Result<()> {
        // Peers before 1.1 only understand the padded member format.
        if out.version().requires_legacy_member_format() {
            out.write_byte_array(&self.legacy_membership_id()?);
        } else {
            out.write_byte_array(&self.membership_id);
        }
        out.write_byte_array(&self.calc_bytes());
        out.write_i32(self.bucket_id);
        out.write_u8(self.breadcrumb_counter);
        Ok(())
    }

    pub fn from_data(input: &mut DataInput) -> Result<Self> {
        let membership_id = input.read_byte_array()?;
        let parts = input.read_byte_array()?;
        let (thread_id, sequence_id) = decode_pair(&parts)?;
        let bucket_id = input.read_i32()?;
        let breadcrumb_counter = input.read_u8()?;
        Ok(Self {
            membership_id,
            thread_id,
            sequence_id,
            bucket_id,
            breadcrumb_counter,
        })
    }

    fn legacy_membership_id(&self) -> Result<Bytes> {
        let member = MemberId::from_essential_bytes(&self.membership_id)?;
        Ok(member.essential_bytes(WireVersion::V0_9)?)
    }

    /// Display form that decodes the member; costs a parse.
    pub fn describe(&self) -> String {
        let member = match MemberId::from_essential_bytes(&self.membership_id) {
            Ok(member) => member.to_string(),
            Err(_) => format!("{:?}", &self.membership_id[..]),
        };
        let mut s = format!(
            "EventID[{};threadID={};sequenceID={}",
            member, self.thread_id, self.sequence_id
        );
        if self.bucket_id >= 0 {
            s.push_str(&format!(";bucketID={}", self.bucket_id));
        }
        s.push(']');
        s
    }
}

impl PartialEq for EventId {
    fn eq(&self, other: &Self) -> bool {
        self.thread_id == other.thread_id
            && self.sequence_id == other.sequence_id
            && equal_membership_ids(&self.membership_id, &other.membership_id)
    }
}

impl Eq for EventId {}

impl Hash for EventId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.stable_hash().hash(state);
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EventID[id={} bytes;threadID={};sequenceID={}",
            self.membership_id.len(),
            self.thread_id,
            self.sequence_id
        )?;
        if self.bucket_id >= 0 {
            write!(f, ";bucketId={}", self.bucket_id)?;
        }
        write!(f, "]")
    }
}
