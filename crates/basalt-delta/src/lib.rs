//! # basalt-delta
//!
//! The delta propagation contract for replicated grid entities.
//!
//! A local mutation produces a [`DeltaInfo`]. Committing the entity stages
//! that delta, lets the store ship it in place of the full value, and clears
//! the stage afterwards whatever happens. Replicas replay deltas with
//! [`apply_delta`]; a delta that does not fit fails with
//! [`DeltaError::InvalidDelta`] before anything changes, and the sender falls
//! back to the full value.
//!
//! ## Example
//!
//! ```rust
//! use basalt_delta::{apply_delta, commit_with_delta, MemoryStore, SetEntity};
//! use bytes::Bytes;
//!
//! let mut store = MemoryStore::new(true);
//! let mut set = SetEntity::new();
//!
//! let delta = set.sadd(vec![Bytes::from_static(b"alice")]).unwrap();
//! commit_with_delta(&mut store, b"users", &mut set, delta).unwrap();
//!
//! let mut replica = SetEntity::new();
//! let delta = set.sadd(vec![Bytes::from_static(b"bob")]).unwrap();
//! apply_delta(&mut replica, &delta).unwrap();
//! assert!(replica.sismember(b"bob"));
//! ```

pub mod delta_info;
pub mod entity;
pub mod error;
pub mod grid;
pub mod set;
pub mod sorted_set;
pub mod store;
pub mod string;

pub use delta_info::{DeltaInfo, DeltaType};
pub use entity::{
    apply_delta, apply_delta_bytes, now_millis, DeltaEntity, EntityHeader, EntityKind,
    ExpireAction, NO_EXPIRATION, TTL_EXPIRED, TTL_NONE,
};
pub use error::{DeltaError, Result};
pub use grid::GridEntity;
pub use set::SetEntity;
pub use sorted_set::SortedSetEntity;
pub use store::{commit_full, commit_with_delta, DeltaStore, MemoryStore, StagedDelta, WriteRecord};
pub use string::StringEntity;
