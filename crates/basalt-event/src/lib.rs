//! # basalt-event
//!
//! Globally unique identifiers for grid mutations.
//!
//! Every mutation carries an [`EventId`] minted from the producing member's
//! identity, a process-unique thread id and a per-thread sequence id. The
//! triple lets every replica drop replays and keep per-producer order.
//!
//! ## Example
//!
//! ```rust
//! use basalt_event::{EventId, EventIdentityCache, ProducerContext, SystemConnection};
//! use basalt_wire::MemberId;
//!
//! let cache = EventIdentityCache::new();
//! let connection = SystemConnection::new(MemberId::new("10.0.0.1", 40404));
//! cache.initialize_on_connect(&connection).unwrap();
//!
//! let producer = ProducerContext::new();
//! let first = EventId::generate(&cache, Some(&connection), &producer).unwrap();
//! let second = EventId::generate(&cache, Some(&connection), &producer).unwrap();
//! assert_eq!(second.sequence_id(), first.sequence_id() + 1);
//! ```

pub mod compact;
pub mod error;
pub mod event_id;
pub mod identity;
pub mod membership_id;
pub mod producer;
pub mod tracker;

pub use compact::{decode_pair, encode_pair, IdWidth};
pub use error::{EventIdError, Result};
pub use event_id::{EventId, NO_BUCKET};
pub use identity::{EventIdentityCache, SystemConnection};
pub use membership_id::{equal_membership_ids, membership_id_hash, strip_legacy_padding};
pub use producer::ProducerContext;
pub use tracker::EventTracker;
