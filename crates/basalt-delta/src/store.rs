//! Committing mutated entities to a store.
//!
//! A commit stages the delta on the entity, hands the entity to the store and
//! clears the stage again on every exit path. A delta-aware store captures the
//! staged delta during `put`; any other store serializes the full value.

use crate::delta_info::DeltaInfo;
use crate::entity::{apply_delta, DeltaEntity};
use crate::error::{DeltaError, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use tracing::debug;

pub trait DeltaStore<E: DeltaEntity> {
    /// Whether `put` ships staged deltas instead of full values.
    fn supports_delta(&self) -> bool;

    fn put(&mut self, key: &[u8], entity: &mut E) -> Result<()>;

    fn remove(&mut self, key: &[u8]) -> Result<()>;
}

/// Delta staged on an entity for the length of one commit.
pub struct StagedDelta<'a, E: DeltaEntity> {
    entity: &'a mut E,
}

impl<'a, E: DeltaEntity> StagedDelta<'a, E> {
    pub fn new(entity: &'a mut E, delta: DeltaInfo) -> Self {
        entity.header_mut().stage(delta);
        Self { entity }
    }
}

impl<E: DeltaEntity> Deref for StagedDelta<'_, E> {
    type Target = E;

    fn deref(&self) -> &E {
        self.entity
    }
}

impl<E: DeltaEntity> DerefMut for StagedDelta<'_, E> {
    fn deref_mut(&mut self) -> &mut E {
        self.entity
    }
}

impl<E: DeltaEntity> Drop for StagedDelta<'_, E> {
    fn drop(&mut self) {
        self.entity.header_mut().clear_pending();
    }
}

/// Store `entity` under `key`, shipping `delta` when the store can.
///
/// A logically empty entity is removed instead.
pub fn commit_with_delta<E, S>(
    store: &mut S,
    key: &[u8],
    entity: &mut E,
    delta: DeltaInfo,
) -> Result<()>
where
    E: DeltaEntity,
    S: DeltaStore<E> + ?Sized,
{
    if entity.is_logically_empty() {
        return store.remove(key);
    }
    let mut staged = StagedDelta::new(entity, delta);
    store.put(key, &mut staged)
}

/// Store `entity` as a full value.
pub fn commit_full<E, S>(store: &mut S, key: &[u8], entity: &mut E) -> Result<()>
where
    E: DeltaEntity,
    S: DeltaStore<E> + ?Sized,
{
    if entity.is_logically_empty() {
        return store.remove(key);
    }
    store.put(key, entity)
}

/// One write as seen by [`MemoryStore`].
#[derive(Clone, Debug, PartialEq)]
pub enum WriteRecord {
    Delta { key: Bytes, bytes: Bytes },
    Full { key: Bytes, bytes: Bytes },
    Remove { key: Bytes },
}

/// In-memory store that keeps a replica built only from what was written.
///
/// Useful for checking that the deltas a commit produces are enough to keep a
/// copy in sync.
#[derive(Debug)]
pub struct MemoryStore<E> {
    delta_aware: bool,
    replica: HashMap<Bytes, E>,
    log: Vec<WriteRecord>,
}

impl<E: DeltaEntity> MemoryStore<E> {
    pub fn new(delta_aware: bool) -> Self {
        Self {
            delta_aware,
            replica: HashMap::new(),
            log: Vec::new(),
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&E> {
        self.replica.get(key)
    }

    pub fn log(&self) -> &[WriteRecord] {
        &self.log
    }

    pub fn len(&self) -> usize {
        self.replica.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replica.is_empty()
    }

    fn put_full(&mut self, key: Bytes, entity: &E) -> Result<()> {
        let bytes = entity.to_bytes()?;
        let copy = E::from_bytes(&bytes)?;
        self.replica.insert(key.clone(), copy);
        self.log.push(WriteRecord::Full { key, bytes });
        Ok(())
    }
}

impl<E: DeltaEntity> DeltaStore<E> for MemoryStore<E> {
    fn supports_delta(&self) -> bool {
        self.delta_aware
    }

    fn put(&mut self, key: &[u8], entity: &mut E) -> Result<()> {
        let key = Bytes::copy_from_slice(key);
        if !(self.delta_aware && entity.has_pending_delta()) {
            return self.put_full(key, entity);
        }

        let delta = entity.capture_delta()?;
        let Some(copy) = self.replica.get_mut(&key) else {
            debug!(key = ?key, "no replica copy for delta, storing full value");
            return self.put_full(key, entity);
        };
        match apply_delta(copy, &delta) {
            Ok(()) => {
                self.log.push(WriteRecord::Delta {
                    key,
                    bytes: delta.to_bytes(),
                });
                Ok(())
            }
            Err(DeltaError::InvalidDelta { .. }) => {
                debug!(key = ?key, "replica rejected delta, storing full value");
                self.put_full(key, entity)
            }
            Err(e) => Err(e),
        }
    }

    fn remove(&mut self, key: &[u8]) -> Result<()> {
        self.replica.remove(key);
        self.log.push(WriteRecord::Remove {
            key: Bytes::copy_from_slice(key),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::set::SetEntity;
    use crate::string::StringEntity;

    fn b(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    /// Store whose put always fails after looking at the stage.
    struct FailingStore {
        saw_pending: bool,
    }

    impl DeltaStore<SetEntity> for FailingStore {
        fn supports_delta(&self) -> bool {
            true
        }

        fn put(&mut self, _key: &[u8], entity: &mut SetEntity) -> Result<()> {
            self.saw_pending = entity.has_pending_delta();
            Err(DeltaError::Store("disk full".into()))
        }

        fn remove(&mut self, _key: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_first_write_is_full_then_deltas() {
        let mut store = MemoryStore::new(true);
        let mut set = SetEntity::new();

        let delta = set.sadd(vec![b("a")]).unwrap();
        commit_with_delta(&mut store, b"k", &mut set, delta).unwrap();
        let delta = set.sadd(vec![b("b")]).unwrap();
        commit_with_delta(&mut store, b"k", &mut set, delta).unwrap();

        assert!(matches!(store.log()[0], WriteRecord::Full { .. }));
        assert!(matches!(store.log()[1], WriteRecord::Delta { .. }));
        assert_eq!(store.get(b"k"), Some(&set));
        assert!(!set.has_pending_delta());
    }

    #[test]
    fn test_plain_store_gets_full_values() {
        let mut store = MemoryStore::new(false);
        let mut set = SetEntity::new();
        for member in ["a", "b"] {
            let delta = set.sadd(vec![b(member)]).unwrap();
            commit_with_delta(&mut store, b"k", &mut set, delta).unwrap();
        }
        assert!(store
            .log()
            .iter()
            .all(|r| matches!(r, WriteRecord::Full { .. })));
        assert!(!set.has_pending_delta());
    }

    #[test]
    fn test_empty_entity_removed() {
        let mut store = MemoryStore::new(true);
        let mut set = SetEntity::new();
        let delta = set.sadd(vec![b("a")]).unwrap();
        commit_with_delta(&mut store, b"k", &mut set, delta).unwrap();

        let delta = set.srem(vec![b("a")]).unwrap();
        commit_with_delta(&mut store, b"k", &mut set, delta).unwrap();

        assert_eq!(
            store.log().last(),
            Some(&WriteRecord::Remove { key: b("k") })
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_stage_cleared_when_put_fails() {
        let mut store = FailingStore { saw_pending: false };
        let mut set = SetEntity::new();
        let delta = set.sadd(vec![b("a")]).unwrap();

        let result = commit_with_delta(&mut store, b"k", &mut set, delta);
        assert_eq!(result, Err(DeltaError::Store("disk full".into())));
        assert!(store.saw_pending);
        assert!(!set.has_pending_delta());
    }

    #[test]
    fn test_rejected_delta_falls_back_to_full() {
        let mut store = MemoryStore::new(true);
        let mut s = StringEntity::new("base");
        commit_full(&mut store, b"k", &mut s).unwrap();

        // Skip one append so the replica sees a gap.
        s.append(b("1"));
        let (_, delta) = s.append(b("2"));
        commit_with_delta(&mut store, b"k", &mut s, delta).unwrap();

        assert!(matches!(store.log()[1], WriteRecord::Full { .. }));
        assert_eq!(store.get(b"k"), Some(&s));
    }
}
