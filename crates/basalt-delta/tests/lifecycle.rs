//! Delta staging lifecycle and expiration.

use basalt_delta::{
    commit_with_delta, DeltaEntity, DeltaError, DeltaInfo, DeltaStore, ExpireAction,
    GridEntity, MemoryStore, Result, SetEntity, StagedDelta, StringEntity, NO_EXPIRATION,
    TTL_EXPIRED, TTL_NONE,
};
use bytes::Bytes;

// ============================================================================
// Capture
// ============================================================================

#[test]
fn test_capture_clears_stage() {
    let mut set = SetEntity::new();
    let delta = set.sadd(vec![Bytes::from_static(b"a")]).unwrap();

    let mut staged = StagedDelta::new(&mut set, delta.clone());
    assert!(staged.has_pending_delta());
    assert_eq!(staged.capture_delta(), Ok(delta));
    assert!(!staged.has_pending_delta());
    assert_eq!(staged.capture_delta(), Err(DeltaError::NoPendingDelta));
}

#[test]
fn test_capture_without_stage_fails() {
    let mut s = StringEntity::new("v");
    assert!(!s.has_pending_delta());
    assert_eq!(s.capture_delta(), Err(DeltaError::NoPendingDelta));
}

#[test]
fn test_guard_clears_unconsumed_stage() {
    let mut set = SetEntity::new();
    {
        let staged = StagedDelta::new(&mut set, DeltaInfo::Timestamp(1));
        assert!(staged.has_pending_delta());
    }
    assert!(!set.has_pending_delta());
}

/// Records what the store saw during `put` without capturing it.
#[derive(Default)]
struct PeekingStore {
    seen: Vec<Option<DeltaInfo>>,
}

impl DeltaStore<GridEntity> for PeekingStore {
    fn supports_delta(&self) -> bool {
        true
    }

    fn put(&mut self, _key: &[u8], entity: &mut GridEntity) -> Result<()> {
        self.seen.push(entity.header().pending().cloned());
        Ok(())
    }

    fn remove(&mut self, _key: &[u8]) -> Result<()> {
        self.seen.push(None);
        Ok(())
    }
}

#[test]
fn test_one_delta_per_commit() {
    let mut store = PeekingStore::default();
    let mut entity = GridEntity::from(StringEntity::new(""));

    for chunk in [b"a", b"b"] {
        let delta = match &mut entity {
            GridEntity::String(s) => s.append(Bytes::from_static(chunk)).1,
            _ => unreachable!(),
        };
        commit_with_delta(&mut store, b"k", &mut entity, delta).unwrap();
        assert!(!entity.has_pending_delta());
    }

    assert_eq!(store.seen.len(), 2);
    assert!(matches!(
        store.seen[1],
        Some(DeltaInfo::Append { sequence: 2, .. })
    ));
}

// ============================================================================
// Expiration
// ============================================================================

#[test]
fn test_pexpireat_in_future_commits_timestamp() {
    let mut store = MemoryStore::new(true);
    let mut set = SetEntity::from_members([Bytes::from_static(b"a")]);
    let delta = set.sadd(vec![Bytes::from_static(b"b")]).unwrap();
    commit_with_delta(&mut store, b"k", &mut set, delta).unwrap();

    let now = 1_000;
    match set.pexpireat(5_000, now) {
        ExpireAction::Commit(delta) => {
            assert_eq!(delta, DeltaInfo::Timestamp(5_000));
            commit_with_delta(&mut store, b"k", &mut set, delta).unwrap();
        }
        ExpireAction::Remove => panic!("timestamp is in the future"),
    }

    assert_eq!(set.pttl(now), 4_000);
    assert_eq!(store.get(b"k").unwrap().expiration_timestamp(), 5_000);
    assert!(!set.has_expired_at(4_999));
    assert!(set.has_expired_at(5_000));
}

#[test]
fn test_pexpireat_in_past_removes() {
    let mut set = SetEntity::from_members([Bytes::from_static(b"a")]);
    assert_eq!(set.pexpireat(10, 10), ExpireAction::Remove);
    assert_eq!(set.expiration_timestamp(), NO_EXPIRATION);
}

#[test]
fn test_persist_and_pttl() {
    let mut s = StringEntity::new("v");
    assert_eq!(s.persist(), None);
    assert_eq!(s.pttl(0), TTL_NONE);

    s.set_expiration(100);
    assert_eq!(s.pttl(100), TTL_EXPIRED);
    assert_eq!(s.persist(), Some(DeltaInfo::Timestamp(NO_EXPIRATION)));
    assert_eq!(s.pttl(100), TTL_NONE);
    assert!(!s.has_expired());
}
