//! # Basalt Messaging
//!
//! Message dispatch and reply correlation between the members of a Basalt
//! grid.
//!
//! A [`DistributionManager`] sends [`DistributionMessage`]s over a
//! [`NetworkTransport`] and dispatches the ones it receives, either inline or
//! through a priority-ordered worker pool. Requests that expect an answer
//! register a [`ReplyProcessor`] first; its id travels with the request and
//! comes back in the [`ReplyMessage`], where the [`ProcessorKeeper`] routes it
//! to the waiting processor.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use basalt_messaging::{
//!     create_network, DistributionConfig, DistributionManager, LocalMembership, NetworkTransport,
//!     ReplyMessage, ReplyProcessor,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let membership = Arc::new(LocalMembership::new());
//! let mut managers = Vec::new();
//! for transport in create_network(2) {
//!     membership.join(transport.local_member().clone());
//!     let dm = DistributionManager::new(Arc::new(transport), membership.clone(), DistributionConfig::default())?;
//!     dm.start()?;
//!     managers.push(dm);
//! }
//!
//! let processor = ReplyProcessor::new(&managers[0], [managers[1].local_member().clone()]);
//! ReplyMessage::send_ack(&managers[1], managers[0].local_member(), processor.id()).await?;
//! processor.wait_for_completion(Some(Duration::from_secs(1))).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod keeper;
pub mod manager;
pub mod membership;
pub mod message;
pub mod network;
pub mod processor;
pub mod queue;
pub mod reply;

pub use config::{DistributionConfig, DistributionConfigBuilder};
pub use error::{
    AggregatedReplyException, DistributionError, ExceptionKind, ReplyError, ReplyException, Result,
};
pub use keeper::ProcessorKeeper;
pub use manager::DistributionManager;
pub use membership::{LocalMembership, MembershipListener, MembershipView};
pub use message::{
    Decoder, DistributionMessage, InboundMessage, MessageRegistry, Priority, Recipients,
    FRAME_HEADER_LEN,
};
pub use network::{create_network, InboundFrame, MemoryTransport, NetworkError, NetworkTransport};
pub use processor::{ProcessorCore, ReplyOutcome, ReplyProcessor};
pub use queue::PriorityTaskQueue;
pub use reply::{ReplyMessage, ReplyPayload, ReturnValue, WireObject, REPLY_MESSAGE_KIND};
