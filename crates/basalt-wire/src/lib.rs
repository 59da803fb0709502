//! # basalt-wire
//!
//! Byte-level building blocks shared by every Basalt message type.
//!
//! This crate provides:
//! - `DataOutput`/`DataInput`: big-endian streams that remember the peer's
//!   wire version
//! - Array framing compatible with the grid's serializer
//! - `MemberId` and its essential-data encoding, including the legacy form
//!   older peers expect
//!
//! ## Example
//!
//! ```rust
//! use basalt_wire::{DataInput, DataOutput, WireVersion};
//!
//! let mut out = DataOutput::new(WireVersion::CURRENT);
//! out.write_i32(42);
//! out.write_byte_array(b"key");
//!
//! let mut input = DataInput::new(out.freeze(), WireVersion::CURRENT);
//! assert_eq!(input.read_i32().unwrap(), 42);
//! assert_eq!(&input.read_byte_array().unwrap()[..], b"key");
//! ```

pub mod codec;
pub mod error;
pub mod member;
pub mod version;

pub use codec::{test_flag, DataInput, DataOutput};
pub use error::{Result, WireError};
pub use member::{MemberId, LEGACY_MEMBER_DATA_LENGTH};
pub use version::WireVersion;
