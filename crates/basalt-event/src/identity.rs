//! Cache of the local membership identity, one per distribution manager.
//!
//! Minting an event id needs the essential bytes of the local member. They are
//! computed once per connection and swapped out wholesale when the connection
//! changes.

use crate::error::{EventIdError, Result};
use basalt_wire::{MemberId, WireVersion};
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to the local member's connection to the cluster.
///
/// Every connection gets a fresh id, so a reconnect under the same member
/// identity still invalidates cached bytes.
#[derive(Clone, Debug)]
pub struct SystemConnection {
    connection_id: u64,
    member: MemberId,
}

impl SystemConnection {
    pub fn new(member: MemberId) -> Self {
        Self {
            connection_id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::SeqCst),
            member,
        }
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn member(&self) -> &MemberId {
        &self.member
    }
}

#[derive(Debug)]
struct CachedIdentity {
    connection_id: u64,
    bytes: Bytes,
}

#[derive(Debug, Default)]
pub struct EventIdentityCache {
    current: RwLock<Option<Arc<CachedIdentity>>>,
}

impl EventIdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive and pin the identity for a new connection.
    pub fn initialize_on_connect(&self, connection: &SystemConnection) -> Result<()> {
        self.derive(connection).map(|_| ())
    }

    pub fn clear_on_disconnect(&self) {
        *self.current.write() = None;
    }

    /// Essential bytes of the member behind `connection`.
    pub fn membership_id(&self, connection: Option<&SystemConnection>) -> Result<Bytes> {
        let connection = connection.ok_or_else(|| {
            EventIdError::IllegalState("no distributed system connection is available".into())
        })?;

        if let Some(cached) = self.current.read().as_ref() {
            if cached.connection_id == connection.connection_id {
                return Ok(cached.bytes.clone());
            }
        }
        self.derive(connection)
    }

    /// Whether bytes for `connection` are currently pinned.
    pub fn is_cached_for(&self, connection: &SystemConnection) -> bool {
        self.current
            .read()
            .as_ref()
            .map(|c| c.connection_id == connection.connection_id)
            .unwrap_or(false)
    }

    fn derive(&self, connection: &SystemConnection) -> Result<Bytes> {
        let bytes = connection.member.essential_bytes(WireVersion::CURRENT)?;

        // No port yet means the member has not finished joining.
        if connection.member.port() == 0 {
            debug!(member = %connection.member, "membership identity incomplete, not caching");
            return Ok(bytes);
        }

        *self.current.write() = Some(Arc::new(CachedIdentity {
            connection_id: connection.connection_id,
            bytes: bytes.clone(),
        }));
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_connection_is_illegal_state() {
        let cache = EventIdentityCache::new();
        assert!(matches!(
            cache.membership_id(None),
            Err(EventIdError::IllegalState(_))
        ));
    }

    #[test]
    fn test_cached_per_connection() {
        let cache = EventIdentityCache::new();
        let a = SystemConnection::new(MemberId::new("host-a", 4000));
        let b = SystemConnection::new(MemberId::new("host-b", 4001));

        let bytes_a = cache.membership_id(Some(&a)).unwrap();
        assert!(cache.is_cached_for(&a));

        let bytes_b = cache.membership_id(Some(&b)).unwrap();
        assert_ne!(bytes_a, bytes_b);
        assert!(cache.is_cached_for(&b));
        assert!(!cache.is_cached_for(&a));
    }

    #[test]
    fn test_port_zero_not_pinned() {
        let cache = EventIdentityCache::new();
        let conn = SystemConnection::new(MemberId::new("joining", 0));
        assert!(cache.membership_id(Some(&conn)).is_ok());
        assert!(!cache.is_cached_for(&conn));
    }

    #[test]
    fn test_clear_on_disconnect() {
        let cache = EventIdentityCache::new();
        let conn = SystemConnection::new(MemberId::new("host", 4000));
        cache.initialize_on_connect(&conn).unwrap();
        assert!(cache.is_cached_for(&conn));
        cache.clear_on_disconnect();
        assert!(!cache.is_cached_for(&conn));
    }
}
