//! Replay detection for consumers of event ids.

use crate::event_id::EventId;
use crate::membership_id::{equal_membership_ids, membership_id_hash};
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::hash::{Hash, Hasher};
use tracing::trace;

/// Membership bytes keyed with legacy-tolerant equality.
#[derive(Clone, Debug)]
struct MembershipKey(Bytes);

impl PartialEq for MembershipKey {
    fn eq(&self, other: &Self) -> bool {
        equal_membership_ids(&self.0, &other.0)
    }
}

impl Eq for MembershipKey {}

impl Hash for MembershipKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        membership_id_hash(&self.0).hash(state);
    }
}

/// Highest sequence id seen per producer.
///
/// Producers issue sequence ids in increasing order, so anything at or below
/// the recorded high-water mark is a replay.
#[derive(Debug, Default)]
pub struct EventTracker {
    seen: DashMap<(MembershipKey, i64), i64>,
}

impl EventTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id`. Returns false if it (or a later id from the same
    /// producer) was already recorded.
    pub fn record(&self, id: &EventId) -> bool {
        let key = (MembershipKey(id.membership_id().clone()), id.thread_id());
        match self.seen.entry(key) {
            Entry::Occupied(mut entry) => {
                if id.sequence_id() > *entry.get() {
                    entry.insert(id.sequence_id());
                    true
                } else {
                    trace!(event = %id, highest = *entry.get(), "dropping replayed event");
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(id.sequence_id());
                true
            }
        }
    }

    pub fn has_seen(&self, id: &EventId) -> bool {
        let key = (MembershipKey(id.membership_id().clone()), id.thread_id());
        self.seen
            .get(&key)
            .map(|highest| id.sequence_id() <= *highest)
            .unwrap_or(false)
    }

    /// Number of producers tracked.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_wire::LEGACY_MEMBER_DATA_LENGTH;

    fn id(member: &'static [u8], thread: i64, seq: i64) -> EventId {
        EventId::from_parts(Bytes::from_static(member), thread, seq)
    }

    #[test]
    fn test_duplicates_and_older_dropped() {
        let tracker = EventTracker::new();
        assert!(tracker.record(&id(b"member-a", 1, 5)));
        assert!(!tracker.record(&id(b"member-a", 1, 5)));
        assert!(!tracker.record(&id(b"member-a", 1, 3)));
        assert!(tracker.record(&id(b"member-a", 1, 6)));
        assert!(tracker.has_seen(&id(b"member-a", 1, 2)));
        assert!(!tracker.has_seen(&id(b"member-a", 1, 7)));
    }

    #[test]
    fn test_producers_are_independent() {
        let tracker = EventTracker::new();
        assert!(tracker.record(&id(b"member-a", 1, 5)));
        assert!(tracker.record(&id(b"member-a", 2, 0)));
        assert!(tracker.record(&id(b"member-b", 1, 0)));
        assert_eq!(tracker.len(), 3);
    }

    #[test]
    fn test_legacy_padded_member_is_same_producer() {
        let tracker = EventTracker::new();
        let mut padded = b"member-a".to_vec();
        padded.extend_from_slice(&[0u8; LEGACY_MEMBER_DATA_LENGTH]);

        assert!(tracker.record(&id(b"member-a", 1, 5)));
        assert!(!tracker.record(&EventId::from_parts(padded, 1, 5)));
        assert_eq!(tracker.len(), 1);
    }
}
