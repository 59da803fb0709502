//! Network transport abstractions for frame delivery.

use async_trait::async_trait;
use basalt_wire::MemberId;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A frame as delivered to the receiving member.
pub type InboundFrame = (MemberId, Bytes);

/// Network error type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkError {
    PeerNotFound(String),
    SendFailed(String),
    AlreadySubscribed,
}

impl std::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkError::PeerNotFound(id) => write!(f, "Peer not found: {}", id),
            NetworkError::SendFailed(e) => write!(f, "Send failed: {}", e),
            NetworkError::AlreadySubscribed => write!(f, "Inbound frames already subscribed"),
        }
    }
}

impl std::error::Error for NetworkError {}

/// Abstract network transport trait.
#[async_trait]
pub trait NetworkTransport: Send + Sync + 'static {
    /// The member this transport sends as.
    fn local_member(&self) -> &MemberId;

    /// Deliver one frame to a peer.
    async fn send(&self, peer: &MemberId, frame: Bytes) -> Result<(), NetworkError>;

    /// Drop the connection to a peer.
    async fn disconnect(&self, peer: &MemberId) -> Result<(), NetworkError>;

    /// Peers this transport can currently reach.
    async fn connected_peers(&self) -> Vec<MemberId>;

    /// Take the inbound frame stream. Only one subscriber is allowed.
    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<InboundFrame>, NetworkError>;
}

type SharedFrameReceiver = Arc<RwLock<Option<mpsc::UnboundedReceiver<InboundFrame>>>>;
type SharedOutgoing = Arc<RwLock<HashMap<MemberId, mpsc::UnboundedSender<InboundFrame>>>>;

/// In-memory transport for testing and simulation.
pub struct MemoryTransport {
    local: MemberId,
    frame_tx: mpsc::UnboundedSender<InboundFrame>,
    frame_rx: SharedFrameReceiver,
    outgoing: SharedOutgoing,
}

impl MemoryTransport {
    pub fn new(local: MemberId) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            local,
            frame_tx: tx,
            frame_rx: Arc::new(RwLock::new(Some(rx))),
            outgoing: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Connect two memory transports in both directions.
    pub fn connect_to(&self, other: &MemoryTransport) {
        self.outgoing
            .write()
            .insert(other.local.clone(), other.frame_tx.clone());
        other
            .outgoing
            .write()
            .insert(self.local.clone(), self.frame_tx.clone());
    }

    /// Cut every link to and from this transport, as a crashed process would.
    pub fn isolate<'a>(&self, others: impl IntoIterator<Item = &'a MemoryTransport>) {
        self.outgoing.write().clear();
        for other in others {
            other.outgoing.write().remove(&self.local);
        }
    }
}

#[async_trait]
impl NetworkTransport for MemoryTransport {
    fn local_member(&self) -> &MemberId {
        &self.local
    }

    async fn send(&self, peer: &MemberId, frame: Bytes) -> Result<(), NetworkError> {
        let tx = {
            let outgoing = self.outgoing.read();
            outgoing.get(peer).cloned()
        };

        if let Some(tx) = tx {
            tx.send((self.local.clone(), frame))
                .map_err(|e| NetworkError::SendFailed(e.to_string()))
        } else {
            Err(NetworkError::PeerNotFound(peer.to_string()))
        }
    }

    async fn disconnect(&self, peer: &MemberId) -> Result<(), NetworkError> {
        self.outgoing.write().remove(peer);
        Ok(())
    }

    async fn connected_peers(&self) -> Vec<MemberId> {
        self.outgoing.read().keys().cloned().collect()
    }

    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<InboundFrame>, NetworkError> {
        self.frame_rx
            .write()
            .take()
            .ok_or(NetworkError::AlreadySubscribed)
    }
}

/// Create a fully connected network of memory transports.
///
/// Members are `127.0.0.1` on consecutive ports from 40400, named
/// `member-<i>`.
pub fn create_network(count: usize) -> Vec<MemoryTransport> {
    let transports: Vec<_> = (0..count)
        .map(|i| {
            MemoryTransport::new(
                MemberId::new("127.0.0.1", 40400 + i as u16).with_name(format!("member-{}", i)),
            )
        })
        .collect();

    for i in 0..count {
        for j in (i + 1)..count {
            transports[i].connect_to(&transports[j]);
        }
    }

    transports
}
