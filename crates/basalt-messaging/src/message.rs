//! The distribution message envelope.
//!
//! Every frame on the wire starts with a fixed header followed by the body the
//! message type writes in [`DistributionMessage::to_data`]:
//!
//! ```text
//! [wire version: u16][message kind: u16][body ...]
//! ```
//!
//! Recipients and sender never travel in the body. The sender is stamped on
//! receipt from the connection the frame arrived on.

use crate::error::{DistributionError, Result};
use crate::manager::DistributionManager;
use crate::reply::{ReplyMessage, REPLY_MESSAGE_KIND};
use async_trait::async_trait;
use basalt_wire::{DataInput, DataOutput, MemberId, WireError, WireVersion};
use bytes::Bytes;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

pub const FRAME_HEADER_LEN: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Normal,
    /// Taken from the worker queue ahead of normal traffic.
    High,
}

/// Who a message is addressed to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recipients {
    /// Every current member except the sender.
    All,
    Members(Vec<MemberId>),
}

impl Recipients {
    pub fn one(member: MemberId) -> Self {
        Recipients::Members(vec![member])
    }

    pub fn to(members: impl IntoIterator<Item = MemberId>) -> Self {
        Recipients::Members(members.into_iter().collect())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Recipients::All)
    }
}

/// A message that can be sent between members.
#[async_trait]
pub trait DistributionMessage: Send + Sync + fmt::Debug + 'static {
    /// Wire tag used to find the decoder on the receiving side.
    fn kind(&self) -> u16;

    fn priority(&self) -> Priority {
        Priority::Normal
    }

    /// Process on the receive path instead of handing to a worker. Only for
    /// handlers that never block.
    fn inline_process(&self) -> bool {
        false
    }

    /// Processor awaiting a reply to (or carried by) this message; 0 if none.
    fn processor_id(&self) -> i32 {
        0
    }

    /// Whether this message answers a request. Replies are always addressed
    /// to specific members.
    fn is_reply(&self) -> bool {
        false
    }

    fn to_data(&self, out: &mut DataOutput) -> Result<()>;

    async fn process(&self, dm: &DistributionManager, sender: &MemberId) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
}

/// Reads a message body after the header.
pub type Decoder = fn(&mut DataInput) -> Result<Box<dyn DistributionMessage>>;

/// Maps message kinds to their decoders.
pub struct MessageRegistry {
    decoders: HashMap<u16, Decoder>,
}

impl MessageRegistry {
    /// A registry that already knows [`ReplyMessage`].
    pub fn new() -> Self {
        let mut registry = Self {
            decoders: HashMap::new(),
        };
        registry.register(REPLY_MESSAGE_KIND, ReplyMessage::decode);
        registry
    }

    /// Register a decoder, replacing any previous one for `kind`.
    pub fn register(&mut self, kind: u16, decoder: Decoder) {
        self.decoders.insert(kind, decoder);
    }

    pub fn is_registered(&self, kind: u16) -> bool {
        self.decoders.contains_key(&kind)
    }

    /// Serialize header and body once.
    pub fn encode(&self, message: &dyn DistributionMessage, version: WireVersion) -> Result<Bytes> {
        let mut out = DataOutput::with_capacity(64, version);
        out.write_u16(version.ordinal());
        out.write_u16(message.kind());
        message.to_data(&mut out)?;
        Ok(out.freeze())
    }

    /// Decode a full frame. The body is read at the version in its header.
    pub fn decode(&self, frame: Bytes) -> Result<Box<dyn DistributionMessage>> {
        let mut input = DataInput::new(frame, WireVersion::CURRENT);
        let version = WireVersion::from_ordinal(input.read_u16()?)?;
        input.set_version(version);
        let kind = input.read_u16()?;
        let decoder = self
            .decoders
            .get(&kind)
            .ok_or(DistributionError::Wire(WireError::UnknownMessageKind(kind)))?;
        let message = decoder(&mut input)?;
        if !input.is_empty() {
            return Err(DistributionError::Wire(WireError::MalformedMessage(format!(
                "{} trailing bytes after message kind {}",
                input.remaining(),
                kind
            ))));
        }
        Ok(message)
    }
}

impl Default for MessageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A decoded message together with what the receiver knows about it.
#[derive(Debug)]
pub struct InboundMessage {
    pub sender: MemberId,
    pub received_at: Instant,
    pub message: Box<dyn DistributionMessage>,
}
