//! Replies to distribution messages.
//!
//! A reply body is a status byte followed only by the fields its flags say
//! are present:
//!
//! ```text
//! [status: u8]
//!   0x01 PROCESSOR_ID   0x02 IGNORED        0x04 EXCEPTION   0x08 CLOSED
//!   0x10 (reserved)     0x20 (reserved)     0x40 OBJECT      0x80 INTERNAL
//! [processor id: i32]            if PROCESSOR_ID
//! [payload: byte-array]          if EXCEPTION or OBJECT
//! ```
//!
//! The payload holds the JSON form of a [`WireObject`]. The payload is
//! serialized before the status byte is computed, so a payload that cannot be
//! serialized turns into an exception reply instead of a failed send.

use crate::error::{DistributionError, ExceptionKind, ReplyException, Result};
use crate::manager::DistributionManager;
use crate::message::{DistributionMessage, Priority, Recipients};
use async_trait::async_trait;
use basalt_wire::{test_flag, DataInput, DataOutput, MemberId, WireError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub const REPLY_MESSAGE_KIND: u16 = 1;

pub const PROCESSOR_ID_FLAG: u8 = 0x01;
pub const IGNORED_FLAG: u8 = 0x02;
pub const EXCEPTION_FLAG: u8 = 0x04;
pub const CLOSED_FLAG: u8 = 0x08;
pub const HAS_TX_CHANGES_FLAG: u8 = 0x10;
pub const TIME_STATS_SET_FLAG: u8 = 0x20;
pub const OBJECT_FLAG: u8 = 0x40;
pub const INTERNAL_FLAG: u8 = 0x80;

const RESERVED_FLAGS: u8 = HAS_TX_CHANGES_FLAG | TIME_STATS_SET_FLAG;

/// A value that can ride in a reply.
pub trait ReplyPayload: fmt::Debug + Send + Sync {
    fn to_json(&self) -> serde_json::Result<serde_json::Value>;
}

impl<T: Serialize + fmt::Debug + Send + Sync> ReplyPayload for T {
    fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

/// What a reply payload decodes to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WireObject {
    Value(serde_json::Value),
    Exception(ReplyException),
}

#[derive(Clone, Debug, Default)]
pub enum ReturnValue {
    #[default]
    None,
    /// Outbound payload, serialized when the reply is written.
    Object(Arc<dyn ReplyPayload>),
    /// Decoded payload.
    Value(serde_json::Value),
    Exception(ReplyException),
}

#[derive(Clone, Debug, Default)]
pub struct ReplyMessage {
    processor_id: i32,
    ignored: bool,
    closed: bool,
    internal: bool,
    return_value: ReturnValue,
    reserved_flags: u8,
}

impl ReplyMessage {
    pub fn new(processor_id: i32) -> Self {
        Self {
            processor_id,
            ..Default::default()
        }
    }

    pub fn with_value<T>(mut self, value: T) -> Self
    where
        T: Serialize + fmt::Debug + Send + Sync + 'static,
    {
        self.return_value = ReturnValue::Object(Arc::new(value));
        self
    }

    pub fn with_json(mut self, value: serde_json::Value) -> Self {
        self.return_value = ReturnValue::Value(value);
        self
    }

    pub fn with_exception(mut self, exception: ReplyException) -> Self {
        self.return_value = ReturnValue::Exception(exception);
        self
    }

    /// The request was not applied; `exception` says why, if anything.
    pub fn ignored(mut self) -> Self {
        self.ignored = true;
        self
    }

    pub fn closed(mut self) -> Self {
        self.closed = true;
        self
    }

    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    pub fn processor_id(&self) -> i32 {
        self.processor_id
    }

    pub fn is_ignored(&self) -> bool {
        self.ignored
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_internal(&self) -> bool {
        self.internal
    }

    pub fn return_value(&self) -> &ReturnValue {
        &self.return_value
    }

    pub fn is_exception(&self) -> bool {
        matches!(self.return_value, ReturnValue::Exception(_))
    }

    pub fn exception(&self) -> Option<&ReplyException> {
        match &self.return_value {
            ReturnValue::Exception(e) => Some(e),
            _ => None,
        }
    }

    /// The payload as JSON. `None` for exceptions and empty replies.
    pub fn value(&self) -> Option<serde_json::Value> {
        match &self.return_value {
            ReturnValue::Value(v) => Some(v.clone()),
            ReturnValue::Object(p) => p.to_json().ok(),
            _ => None,
        }
    }

    /// Deserialize the payload into `T`.
    pub fn value_as<T: DeserializeOwned>(&self) -> Option<serde_json::Result<T>> {
        self.value().map(serde_json::from_value)
    }

    /// Reserved status bits seen on the wire, carried through untouched.
    pub fn reserved_flags(&self) -> u8 {
        self.reserved_flags
    }

    pub fn set_reserved_flags(&mut self, flags: u8) {
        self.reserved_flags = flags & RESERVED_FLAGS;
    }

    /// Serialize the payload, substituting an exception if that fails.
    fn encode_payload(&self) -> Result<Option<(Vec<u8>, bool)>> {
        let value = match &self.return_value {
            ReturnValue::None => return Ok(None),
            ReturnValue::Exception(e) => {
                let bytes = serde_json::to_vec(&WireObject::Exception(e.clone()))?;
                return Ok(Some((bytes, true)));
            }
            ReturnValue::Value(v) => Ok(v.clone()),
            ReturnValue::Object(p) => p.to_json(),
        };

        match value.and_then(|v| serde_json::to_vec(&WireObject::Value(v))) {
            Ok(bytes) => Ok(Some((bytes, false))),
            Err(e) => {
                warn!(
                    processor_id = self.processor_id,
                    error = %e,
                    "Unable to serialize a reply payload, sending the failure instead"
                );
                let exception = ReplyException::new(
                    ExceptionKind::Serialization,
                    format!("Unable to serialize reply payload: {}", e),
                );
                let bytes = serde_json::to_vec(&WireObject::Exception(exception))?;
                Ok(Some((bytes, true)))
            }
        }
    }

    pub fn write_body(&self, out: &mut DataOutput) -> Result<()> {
        let payload = self.encode_payload()?;

        let mut status = self.reserved_flags & RESERVED_FLAGS;
        if self.processor_id != 0 {
            status |= PROCESSOR_ID_FLAG;
        }
        if self.ignored {
            status |= IGNORED_FLAG;
        }
        match &payload {
            Some((_, true)) => status |= EXCEPTION_FLAG,
            Some((_, false)) => status |= OBJECT_FLAG,
            None => {}
        }
        if self.closed {
            status |= CLOSED_FLAG;
        }
        if self.internal {
            status |= INTERNAL_FLAG;
        }

        out.write_u8(status);
        if self.processor_id != 0 {
            out.write_i32(self.processor_id);
        }
        if let Some((bytes, _)) = payload {
            out.write_byte_array(&bytes);
        }
        Ok(())
    }

    pub fn read_body(input: &mut DataInput) -> Result<Self> {
        let status = input.read_u8()?;
        let processor_id = if test_flag(status, PROCESSOR_ID_FLAG) {
            input.read_i32()?
        } else {
            0
        };

        let return_value = if test_flag(status, EXCEPTION_FLAG | OBJECT_FLAG) {
            let bytes = input.read_byte_array()?;
            let object: WireObject = serde_json::from_slice(&bytes).map_err(|e| {
                WireError::MalformedMessage(format!("unreadable reply payload: {}", e))
            })?;
            match object {
                WireObject::Exception(e) => ReturnValue::Exception(e),
                WireObject::Value(_) if test_flag(status, EXCEPTION_FLAG) => {
                    return Err(WireError::MalformedMessage(
                        "exception flag set on a non-exception payload".into(),
                    )
                    .into())
                }
                WireObject::Value(v) => ReturnValue::Value(v),
            }
        } else {
            ReturnValue::None
        };

        Ok(Self {
            processor_id,
            ignored: test_flag(status, IGNORED_FLAG),
            closed: test_flag(status, CLOSED_FLAG),
            internal: test_flag(status, INTERNAL_FLAG),
            return_value,
            reserved_flags: status & RESERVED_FLAGS,
        })
    }

    /// Registry entry point.
    pub fn decode(input: &mut DataInput) -> Result<Box<dyn DistributionMessage>> {
        Ok(Box::new(Self::read_body(input)?))
    }

    /// Send `reply` to the member that asked.
    pub async fn send(
        dm: &DistributionManager,
        recipient: &MemberId,
        reply: ReplyMessage,
    ) -> Result<()> {
        let unreachable = dm.send(&reply, &Recipients::one(recipient.clone())).await?;
        if !unreachable.is_empty() {
            debug!(recipient = %recipient, processor_id = reply.processor_id, "reply recipient unreachable");
        }
        Ok(())
    }

    /// Plain acknowledgement.
    pub async fn send_ack(dm: &DistributionManager, recipient: &MemberId, processor_id: i32) -> Result<()> {
        Self::send(dm, recipient, ReplyMessage::new(processor_id)).await
    }

    pub async fn send_exception(
        dm: &DistributionManager,
        recipient: &MemberId,
        processor_id: i32,
        exception: ReplyException,
    ) -> Result<()> {
        let exception = exception.from_member(dm.local_member().clone());
        Self::send(dm, recipient, ReplyMessage::new(processor_id).with_exception(exception)).await
    }
}

#[async_trait]
impl DistributionMessage for ReplyMessage {
    fn kind(&self) -> u16 {
        REPLY_MESSAGE_KIND
    }

    fn priority(&self) -> Priority {
        Priority::High
    }

    /// Replies only hand a value to a waiting processor.
    fn inline_process(&self) -> bool {
        true
    }

    fn processor_id(&self) -> i32 {
        self.processor_id
    }

    fn is_reply(&self) -> bool {
        true
    }

    fn to_data(&self, out: &mut DataOutput) -> Result<()> {
        self.write_body(out)
    }

    async fn process(&self, dm: &DistributionManager, sender: &MemberId) -> Result<()> {
        if self.is_exception() {
            debug!(sender = %sender, "{}", self);
        }
        if !dm.processor_keeper().process_reply(sender, self) {
            trace!(sender = %sender, processor_id = self.processor_id, "no processor for reply");
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Display for ReplyMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReplyMessage processorId={}", self.processor_id)?;
        if self.ignored {
            write!(f, " ignored")?;
        }
        if self.closed {
            write!(f, " closed")?;
        }
        match self.exception() {
            Some(e) if e.is_invalid_delta() => write!(f, " with request for full value"),
            Some(e) => write!(f, " with exception {}", e),
            None => Ok(()),
        }
    }
}

impl From<ReplyException> for DistributionError {
    fn from(e: ReplyException) -> Self {
        DistributionError::Handler(e.to_string())
    }
}
