//! Error types for the delta contract.

use basalt_wire::WireError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeltaError {
    /// The delta does not fit the entity it was applied to. Nothing was
    /// mutated; the sender should ship the full value instead.
    #[error("Invalid {delta} delta for {entity}")]
    InvalidDelta { entity: String, delta: String },

    /// `capture_delta` was called with nothing staged.
    #[error("No pending delta to capture")]
    NoPendingDelta,

    #[error("Unknown delta type: {0}")]
    UnknownDeltaType(u8),

    #[error("Unknown entity kind: {0}")]
    UnknownEntityKind(u8),

    #[error("Store error: {0}")]
    Store(String),

    #[error(transparent)]
    Wire(#[from] WireError),
}

impl DeltaError {
    pub fn invalid(entity: impl Into<String>, delta: impl Into<String>) -> Self {
        DeltaError::InvalidDelta {
            entity: entity.into(),
            delta: delta.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeltaError>;
