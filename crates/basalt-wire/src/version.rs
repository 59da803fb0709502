//! Serialization versions.
//!
//! Peers negotiate nothing: every frame carries the sender's version ordinal,
//! and encoders that must talk to older peers branch on it.

use crate::error::{Result, WireError};
use std::fmt;

/// A protocol version, ordered from oldest to newest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WireVersion {
    /// Member identities carry a 16-byte UUID and a weight byte.
    V0_9,
    V1_0,
    /// First version whose member identities drop the UUID suffix.
    V1_1,
    V1_14,
}

impl WireVersion {
    pub const CURRENT: WireVersion = WireVersion::V1_14;

    /// The value written into frame headers.
    pub fn ordinal(self) -> u16 {
        match self {
            WireVersion::V0_9 => 90,
            WireVersion::V1_0 => 100,
            WireVersion::V1_1 => 110,
            WireVersion::V1_14 => 1140,
        }
    }

    pub fn from_ordinal(ordinal: u16) -> Result<Self> {
        match ordinal {
            90 => Ok(WireVersion::V0_9),
            100 => Ok(WireVersion::V1_0),
            110 => Ok(WireVersion::V1_1),
            1140 => Ok(WireVersion::V1_14),
            other => Err(WireError::UnknownVersion(other)),
        }
    }

    pub fn is_older_than(self, other: WireVersion) -> bool {
        self < other
    }

    /// Whether member identities written at this version need the legacy
    /// UUID suffix.
    pub fn requires_legacy_member_format(self) -> bool {
        self.is_older_than(WireVersion::V1_1)
    }
}

impl Default for WireVersion {
    fn default() -> Self {
        WireVersion::CURRENT
    }
}

impl fmt::Display for WireVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WireVersion::V0_9 => "0.9",
            WireVersion::V1_0 => "1.0",
            WireVersion::V1_1 => "1.1",
            WireVersion::V1_14 => "1.14",
        };
        write!(f, "{}", name)
    }
}
