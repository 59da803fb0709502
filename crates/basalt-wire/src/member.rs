//! Member identities.
//!
//! A [`MemberId`] names one process in the cluster. Its *essential data* is
//! the compact byte form embedded in event identifiers; it is computed once
//! per connection and compared byte-wise afterwards.
//!
//! ```text
//! [host: string][port: i32][view id: i32][name: string]
//! [uuid: 16 bytes][weight: u8]      only for versions older than 1.1
//! ```

use crate::codec::{DataInput, DataOutput};
use crate::error::{Result, WireError};
use crate::version::WireVersion;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Size of the UUID + weight suffix written for old peers.
pub const LEGACY_MEMBER_DATA_LENGTH: usize = 17;

/// Identity of a cluster member.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId {
    host: String,
    port: u16,
    view_id: i32,
    name: String,
    uuid: Option<Ulid>,
    weight: u8,
}

impl MemberId {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            view_id: 0,
            name: String::new(),
            uuid: None,
            weight: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_view_id(mut self, view_id: i32) -> Self {
        self.view_id = view_id;
        self
    }

    pub fn with_uuid(mut self, uuid: Ulid) -> Self {
        self.uuid = Some(uuid);
        self
    }

    pub fn with_weight(mut self, weight: u8) -> Self {
        self.weight = weight;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// The membership port. Zero until the member has joined.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn view_id(&self) -> i32 {
        self.view_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> Option<Ulid> {
        self.uuid
    }

    pub fn weight(&self) -> u8 {
        self.weight
    }

    /// Write the essential data using the stream's version.
    pub fn write_essential_data(&self, out: &mut DataOutput) -> Result<()> {
        out.write_string(&self.host)?;
        out.write_i32(i32::from(self.port));
        out.write_i32(self.view_id);
        out.write_string(&self.name)?;
        if out.version().requires_legacy_member_format() {
            let uuid = self.uuid.map(|u| u.to_bytes()).unwrap_or([0u8; 16]);
            out.write_raw(&uuid);
            out.write_u8(self.weight);
        }
        Ok(())
    }

    /// Essential data as a standalone byte string.
    pub fn essential_bytes(&self, version: WireVersion) -> Result<Bytes> {
        let mut out = DataOutput::with_capacity(64, version);
        self.write_essential_data(&mut out)?;
        Ok(out.freeze())
    }

    /// Parse essential data produced at any version.
    ///
    /// The legacy suffix is detected by length; an all-zero UUID reads back
    /// as `None`.
    pub fn from_essential_bytes(bytes: &[u8]) -> Result<Self> {
        let mut input = DataInput::new(Bytes::copy_from_slice(bytes), WireVersion::CURRENT);
        let host = input.read_string()?;
        let port = input.read_i32()?;
        let port = u16::try_from(port)
            .map_err(|_| WireError::MalformedMessage(format!("invalid member port {}", port)))?;
        let view_id = input.read_i32()?;
        let name = input.read_string()?;

        let (uuid, weight) = match input.remaining() {
            0 => (None, 0),
            LEGACY_MEMBER_DATA_LENGTH => {
                let raw = input.read_raw(16)?;
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(&raw);
                let weight = input.read_u8()?;
                let uuid = if uuid == [0u8; 16] {
                    None
                } else {
                    Some(Ulid::from_bytes(uuid))
                };
                (uuid, weight)
            }
            other => {
                return Err(WireError::MalformedMessage(format!(
                    "{} trailing bytes after member identity",
                    other
                )))
            }
        };

        Ok(Self {
            host,
            port,
            view_id,
            name,
            uuid,
            weight,
        })
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.host)?;
        if !self.name.is_empty() {
            write!(f, "({})", self.name)?;
        }
        write!(f, "<v{}>:{}", self.view_id, self.port)
    }
}
