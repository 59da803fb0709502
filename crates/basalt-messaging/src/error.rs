//! Error types for message dispatch and reply correlation.

use basalt_event::EventIdError;
use basalt_wire::{MemberId, WireError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while sending or dispatching a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DistributionError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Event(#[from] EventIdError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid recipients: {0}")]
    InvalidRecipients(String),

    #[error("Frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Distribution manager is shut down")]
    Shutdown,
}

impl From<serde_json::Error> for DistributionError {
    fn from(err: serde_json::Error) -> Self {
        DistributionError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DistributionError>;

/// Category of a remote failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExceptionKind {
    EntryNotFound,
    /// The receiver could not apply a delta and wants the full value.
    InvalidDelta,
    ConcurrentModification,
    Cancelled,
    /// The reply payload could not be serialized.
    Serialization,
    Internal,
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExceptionKind::EntryNotFound => "EntryNotFound",
            ExceptionKind::InvalidDelta => "InvalidDelta",
            ExceptionKind::ConcurrentModification => "ConcurrentModification",
            ExceptionKind::Cancelled => "Cancelled",
            ExceptionKind::Serialization => "Serialization",
            ExceptionKind::Internal => "Internal",
        };
        f.write_str(name)
    }
}

/// A failure reported by a remote member in its reply.
#[derive(Error, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ReplyException {
    kind: ExceptionKind,
    message: String,
    sender: Option<MemberId>,
}

impl ReplyException {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            sender: None,
        }
    }

    pub fn invalid_delta(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::InvalidDelta, message)
    }

    /// Tag the exception with the member that raised it.
    pub fn from_member(mut self, sender: MemberId) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn kind(&self) -> ExceptionKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn sender(&self) -> Option<&MemberId> {
        self.sender.as_ref()
    }

    pub fn is_invalid_delta(&self) -> bool {
        self.kind == ExceptionKind::InvalidDelta
    }
}

/// Exceptions from every member that failed, keyed by member.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AggregatedReplyException {
    failures: BTreeMap<MemberId, ReplyException>,
}

impl AggregatedReplyException {
    pub fn new(failures: BTreeMap<MemberId, ReplyException>) -> Self {
        Self { failures }
    }

    pub fn failures(&self) -> &BTreeMap<MemberId, ReplyException> {
        &self.failures
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for AggregatedReplyException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} member(s) failed", self.failures.len())?;
        for (member, exception) in &self.failures {
            write!(f, "; {}: {}", member, exception)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregatedReplyException {}

/// Why a wait for replies did not produce an outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplyError {
    /// The processor stays registered; a later wait may still succeed.
    #[error("Timed out after {waited:?} waiting on processor {processor_id}; pending: {pending:?}")]
    Timeout {
        processor_id: i32,
        waited: Duration,
        pending: Vec<MemberId>,
    },

    #[error("Processor cancelled by {sender}: {cause}")]
    Cancelled { sender: MemberId, cause: String },

    #[error(transparent)]
    Remote(#[from] AggregatedReplyException),
}
