//! Error types for event identity.

use basalt_wire::WireError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventIdError {
    /// No system connection to take a membership identity from.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Sequence id {sequence_id} cannot be offset by {offset}")]
    SequenceOverflow { sequence_id: i64, offset: i64 },

    #[error("Invalid compact width tag: {0}")]
    InvalidWidthTag(u8),

    #[error(transparent)]
    Wire(#[from] WireError),
}

pub type Result<T> = std::result::Result<T, EventIdError>;
