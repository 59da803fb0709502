//! Replication message carrying one region write to the other members.
//!
//! ```text
//! [processor id: i32][event id: full form][key: byte-array]
//! [payload tag: u8] 0 full value | 1 delta | 2 destroy
//! [payload: byte-array]   for full value and delta
//! ```

use crate::region::{RegionState, UpdateOutcome};
use async_trait::async_trait;
use basalt_event::EventId;
use basalt_messaging::{
    DistributionError, DistributionManager, DistributionMessage, ReplyException, ReplyMessage,
    Result,
};
use basalt_wire::{DataInput, DataOutput, MemberId, WireError};
use bytes::Bytes;
use std::any::Any;
use tracing::debug;

pub const UPDATE_MESSAGE_KIND: u16 = 1001;

const FULL_TAG: u8 = 0;
const DELTA_TAG: u8 = 1;
const DESTROY_TAG: u8 = 2;

#[derive(Clone, Debug, PartialEq)]
pub enum UpdatePayload {
    /// Serialized entity snapshot.
    Full(Bytes),
    /// Serialized delta against the receiver's copy.
    Delta(Bytes),
    Destroy,
}

impl UpdatePayload {
    pub fn is_delta(&self) -> bool {
        matches!(self, UpdatePayload::Delta(_))
    }
}

#[derive(Clone, Debug)]
pub struct UpdateMessage {
    processor_id: i32,
    event_id: EventId,
    key: Bytes,
    payload: UpdatePayload,
}

impl UpdateMessage {
    pub fn new(processor_id: i32, event_id: EventId, key: Bytes, payload: UpdatePayload) -> Self {
        Self {
            processor_id,
            event_id,
            key,
            payload,
        }
    }

    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    pub fn payload(&self) -> &UpdatePayload {
        &self.payload
    }

    pub fn decode(input: &mut DataInput) -> Result<Box<dyn DistributionMessage>> {
        let processor_id = input.read_i32()?;
        let event_id = EventId::from_data(input)?;
        let key = input.read_byte_array()?;
        let payload = match input.read_u8()? {
            FULL_TAG => UpdatePayload::Full(input.read_byte_array()?),
            DELTA_TAG => UpdatePayload::Delta(input.read_byte_array()?),
            DESTROY_TAG => UpdatePayload::Destroy,
            tag => {
                return Err(WireError::MalformedMessage(format!("unknown update payload tag {}", tag)).into())
            }
        };
        Ok(Box::new(Self::new(processor_id, event_id, key, payload)))
    }
}

#[async_trait]
impl DistributionMessage for UpdateMessage {
    fn kind(&self) -> u16 {
        UPDATE_MESSAGE_KIND
    }

    fn processor_id(&self) -> i32 {
        self.processor_id
    }

    fn to_data(&self, out: &mut DataOutput) -> Result<()> {
        out.write_i32(self.processor_id);
        self.event_id.to_data(out)?;
        out.write_byte_array(&self.key);
        match &self.payload {
            UpdatePayload::Full(bytes) => {
                out.write_u8(FULL_TAG);
                out.write_byte_array(bytes);
            }
            UpdatePayload::Delta(bytes) => {
                out.write_u8(DELTA_TAG);
                out.write_byte_array(bytes);
            }
            UpdatePayload::Destroy => out.write_u8(DESTROY_TAG),
        }
        Ok(())
    }

    async fn process(&self, dm: &DistributionManager, sender: &MemberId) -> Result<()> {
        let state = dm
            .cache::<RegionState>()
            .ok_or_else(|| DistributionError::Handler("no region attached to this member".into()))?;

        let outcome = state
            .apply_update(self)
            .map_err(|e| DistributionError::Handler(e.to_string()))?;

        if self.processor_id == 0 {
            return Ok(());
        }
        let reply = match outcome {
            UpdateOutcome::Applied | UpdateOutcome::Duplicate => ReplyMessage::new(self.processor_id),
            UpdateOutcome::NeedsFullValue(reason) => {
                debug!(sender = %sender, event = %self.event_id, reason = %reason, "asking for full value");
                ReplyMessage::new(self.processor_id).ignored().with_exception(
                    ReplyException::invalid_delta(reason).from_member(dm.local_member().clone()),
                )
            }
        };
        ReplyMessage::send(dm, sender, reply).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
