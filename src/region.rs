//! A region replicated to every member of the cluster.
//!
//! Each write is applied locally, committed through the delta contract and
//! pushed to the other members as an [`UpdateMessage`]. The writer waits for
//! every member to answer. A member that cannot apply a delta answers
//! "ignored, invalid delta" and receives the full value in a second round.
//!
//! Writes through one region handle are serialized, so each member sees a
//! writer's updates in event-id order. Keys are expected to have a single
//! writing member.

use crate::update::{UpdateMessage, UpdatePayload, UPDATE_MESSAGE_KIND};
use basalt_delta::{
    apply_delta_bytes, commit_full, commit_with_delta, now_millis, DeltaEntity, DeltaError,
    DeltaInfo, DeltaStore, EntityKind, ExpireAction, GridEntity, SetEntity, SortedSetEntity,
    StringEntity, TTL_EXPIRED,
};
use basalt_event::{EventTracker, ProducerContext};
use basalt_messaging::{
    DistributionError, DistributionManager, Recipients, ReplyError, ReplyOutcome, ReplyProcessor,
};
use basalt_wire::MemberId;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum RegionError {
    #[error(transparent)]
    Delta(#[from] DeltaError),

    #[error(transparent)]
    Distribution(#[from] DistributionError),

    #[error(transparent)]
    Reply(#[from] ReplyError),

    #[error("WRONGTYPE {key} holds a {actual}, not a {expected}")]
    WrongType {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, RegionError>;

/// How a member handled an incoming update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// The event id was already seen.
    Duplicate,
    /// The delta could not be applied; the sender should ship the full value.
    NeedsFullValue(String),
}

/// Member-local contents of the region, reachable from message handlers.
#[derive(Debug, Default)]
pub struct RegionState {
    entries: Mutex<HashMap<Bytes, GridEntity>>,
    tracker: EventTracker,
}

impl RegionState {
    /// Apply an update from another member.
    pub fn apply_update(&self, update: &UpdateMessage) -> basalt_delta::Result<UpdateOutcome> {
        if !self.tracker.record(update.event_id()) {
            return Ok(UpdateOutcome::Duplicate);
        }

        let key = update.key();
        let mut entries = self.entries.lock();
        match update.payload() {
            UpdatePayload::Full(bytes) => {
                let entity = GridEntity::from_bytes(bytes)?;
                if entity.is_logically_empty() {
                    entries.remove(key);
                } else {
                    entries.insert(key.clone(), entity);
                }
            }
            UpdatePayload::Delta(bytes) => {
                let Some(entity) = entries.get_mut(key) else {
                    return Ok(UpdateOutcome::NeedsFullValue(format!(
                        "no local copy of {}",
                        String::from_utf8_lossy(key)
                    )));
                };
                match apply_delta_bytes(entity, bytes) {
                    Ok(()) if entity.is_logically_empty() => {
                        entries.remove(key);
                    }
                    Ok(()) => {}
                    Err(e @ DeltaError::InvalidDelta { .. }) => {
                        return Ok(UpdateOutcome::NeedsFullValue(e.to_string()))
                    }
                    Err(e) => return Err(e),
                }
            }
            UpdatePayload::Destroy => {
                entries.remove(key);
            }
        }
        Ok(UpdateOutcome::Applied)
    }

    pub fn get(&self, key: &[u8]) -> Option<GridEntity> {
        self.entries.lock().get(key).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<Bytes, GridEntity> {
        self.entries
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Overwrite the local copy without replicating.
    #[cfg(test)]
    pub(crate) fn replace_local(&self, key: &[u8], entity: Option<GridEntity>) {
        let mut entries = self.entries.lock();
        match entity {
            Some(entity) => entries.insert(Bytes::copy_from_slice(key), entity),
            None => entries.remove(key),
        };
    }
}

/// What a local mutation changed.
enum Change {
    None,
    Delta(DeltaInfo),
    /// The value was replaced wholesale.
    Full,
}

/// Store that turns one commit into the payload to replicate.
#[derive(Default)]
struct UpdateCollector {
    payload: Option<UpdatePayload>,
}

impl DeltaStore<GridEntity> for UpdateCollector {
    fn supports_delta(&self) -> bool {
        true
    }

    fn put(&mut self, _key: &[u8], entity: &mut GridEntity) -> basalt_delta::Result<()> {
        let payload = if entity.has_pending_delta() {
            UpdatePayload::Delta(entity.capture_delta()?.to_bytes())
        } else {
            UpdatePayload::Full(entity.to_bytes()?)
        };
        self.payload = Some(payload);
        Ok(())
    }

    fn remove(&mut self, _key: &[u8]) -> basalt_delta::Result<()> {
        self.payload = Some(UpdatePayload::Destroy);
        Ok(())
    }
}

/// A command ran against a key holding another entity type.
struct TypeMismatch {
    expected: EntityKind,
    actual: EntityKind,
}

impl TypeMismatch {
    fn new(expected: EntityKind, actual: &GridEntity) -> Self {
        Self {
            expected,
            actual: actual.kind(),
        }
    }

    fn into_error(self, key: &[u8]) -> RegionError {
        RegionError::WrongType {
            key: String::from_utf8_lossy(key).into_owned(),
            expected: self.expected.name(),
            actual: self.actual.name(),
        }
    }
}

type Mutated<R> = std::result::Result<(R, Change), TypeMismatch>;

/// Handle to the region on one member. Cheap to clone.
#[derive(Clone)]
pub struct ReplicatedRegion {
    dm: DistributionManager,
    state: Arc<RegionState>,
    producer: Arc<ProducerContext>,
    writes: Arc<tokio::sync::Mutex<()>>,
    full_resends: Arc<AtomicU64>,
}

impl ReplicatedRegion {
    /// Create the region on `dm`'s member and start accepting updates.
    pub fn create(dm: &DistributionManager) -> Self {
        let state = Arc::new(RegionState::default());
        dm.register_message(UPDATE_MESSAGE_KIND, UpdateMessage::decode);
        dm.set_cache(state.clone());
        Self {
            dm: dm.clone(),
            state,
            producer: Arc::new(ProducerContext::new()),
            writes: Arc::new(tokio::sync::Mutex::new(())),
            full_resends: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn local_member(&self) -> &MemberId {
        self.dm.local_member()
    }

    pub fn manager(&self) -> &DistributionManager {
        &self.dm
    }

    pub fn state(&self) -> &Arc<RegionState> {
        &self.state
    }

    /// Members that were sent a full value after rejecting a delta.
    pub fn full_resends(&self) -> u64 {
        self.full_resends.load(Ordering::Relaxed)
    }

    pub fn get(&self, key: &[u8]) -> Option<GridEntity> {
        self.state.get(key)
    }

    pub fn snapshot(&self) -> BTreeMap<Bytes, GridEntity> {
        self.state.snapshot()
    }

    pub fn smembers(&self, key: &[u8]) -> Vec<Bytes> {
        self.state
            .get(key)
            .and_then(|e| e.as_set().map(|s| s.members().cloned().collect()))
            .unwrap_or_default()
    }

    /// Milliseconds to live, `-1` without expiration, `-2` if missing.
    pub fn pttl(&self, key: &[u8]) -> i64 {
        self.state
            .get(key)
            .map(|e| e.pttl(now_millis()))
            .unwrap_or(TTL_EXPIRED)
    }

    pub async fn sadd(&self, key: impl Into<Bytes>, members: Vec<Bytes>) -> Result<usize> {
        self.write(key.into(), move |slot| {
            match slot.get_or_insert_with(|| SetEntity::new().into()) {
                GridEntity::Set(set) => Ok(counted(set.sadd(members))),
                other => Err(TypeMismatch::new(EntityKind::Set, other)),
            }
        })
        .await
    }

    pub async fn srem(&self, key: impl Into<Bytes>, members: Vec<Bytes>) -> Result<usize> {
        self.write(key.into(), move |slot| match slot {
            None => Ok((0, Change::None)),
            Some(GridEntity::Set(set)) => Ok(counted(set.srem(members))),
            Some(other) => Err(TypeMismatch::new(EntityKind::Set, other)),
        })
        .await
    }

    pub async fn spop(&self, key: impl Into<Bytes>, count: usize) -> Result<Vec<Bytes>> {
        self.write(key.into(), move |slot| match slot {
            None => Ok((Vec::new(), Change::None)),
            Some(GridEntity::Set(set)) => {
                let (popped, delta) = set.spop(count);
                Ok((popped, delta.map(Change::Delta).unwrap_or(Change::None)))
            }
            Some(other) => Err(TypeMismatch::new(EntityKind::Set, other)),
        })
        .await
    }

    /// Replace a string value. Always ships the full value.
    pub async fn set(
        &self,
        key: impl Into<Bytes>,
        value: impl AsRef<[u8]> + Send + 'static,
    ) -> Result<()> {
        self.write(key.into(), move |slot| {
            match slot {
                Some(GridEntity::String(s)) => s.set(value),
                _ => *slot = Some(StringEntity::new(value).into()),
            }
            Ok(((), Change::Full))
        })
        .await
    }

    /// Append to a string value and return its new length.
    pub async fn append(&self, key: impl Into<Bytes>, value: Bytes) -> Result<usize> {
        self.write(key.into(), move |slot| {
            match slot.get_or_insert_with(|| StringEntity::default().into()) {
                GridEntity::String(s) => {
                    let (len, delta) = s.append(value);
                    Ok((len, Change::Delta(delta)))
                }
                other => Err(TypeMismatch::new(EntityKind::String, other)),
            }
        })
        .await
    }

    pub async fn zadd(&self, key: impl Into<Bytes>, pairs: Vec<(Bytes, f64)>) -> Result<usize> {
        self.write(key.into(), move |slot| {
            match slot.get_or_insert_with(|| SortedSetEntity::new().into()) {
                GridEntity::SortedSet(z) => Ok(counted(z.zadd(pairs))),
                other => Err(TypeMismatch::new(EntityKind::SortedSet, other)),
            }
        })
        .await
    }

    pub async fn zrem(&self, key: impl Into<Bytes>, members: Vec<Bytes>) -> Result<usize> {
        self.write(key.into(), move |slot| match slot {
            None => Ok((0, Change::None)),
            Some(GridEntity::SortedSet(z)) => Ok(counted(z.zrem(members))),
            Some(other) => Err(TypeMismatch::new(EntityKind::SortedSet, other)),
        })
        .await
    }

    /// Expire `key` at `timestamp` (epoch ms). A timestamp in the past
    /// deletes the key. Returns false if the key does not exist.
    pub async fn pexpireat(&self, key: impl Into<Bytes>, timestamp: i64) -> Result<bool> {
        let now = now_millis();
        self.write(key.into(), move |slot| {
            let Some(entity) = slot.as_mut() else {
                return Ok((false, Change::None));
            };
            match entity.pexpireat(timestamp, now) {
                ExpireAction::Remove => {
                    *slot = None;
                    Ok((true, Change::None))
                }
                ExpireAction::Commit(delta) => Ok((true, Change::Delta(delta))),
            }
        })
        .await
    }

    /// Remove the expiration. Returns false if there was none.
    pub async fn persist(&self, key: impl Into<Bytes>) -> Result<bool> {
        self.write(key.into(), |slot| {
            Ok(match slot.as_mut().and_then(|e| e.persist()) {
                Some(delta) => (true, Change::Delta(delta)),
                None => (false, Change::None),
            })
        })
        .await
    }

    pub async fn del(&self, key: impl Into<Bytes>) -> Result<bool> {
        self.write(key.into(), |slot| Ok((slot.take().is_some(), Change::None)))
            .await
    }

    /// Apply `mutate` to the local copy, then replicate what it changed.
    async fn write<R, F>(&self, key: Bytes, mutate: F) -> Result<R>
    where
        R: Send,
        F: FnOnce(&mut Option<GridEntity>) -> Mutated<R> + Send,
    {
        let _serialized = self.writes.lock().await;
        let (result, payload) = self.apply_local(&key, mutate)?;
        if let Some(payload) = payload {
            self.distribute(&key, payload).await?;
        }
        Ok(result)
    }

    fn apply_local<R, F>(&self, key: &Bytes, mutate: F) -> Result<(R, Option<UpdatePayload>)>
    where
        F: FnOnce(&mut Option<GridEntity>) -> Mutated<R>,
    {
        let mut entries = self.state.entries.lock();
        let mut slot = entries.remove(key);
        let existed = slot.is_some();

        let (result, change) = match mutate(&mut slot) {
            Ok(mutated) => mutated,
            Err(mismatch) => {
                if let Some(entity) = slot.filter(|entity| !entity.is_logically_empty()) {
                    entries.insert(key.clone(), entity);
                }
                return Err(mismatch.into_error(key));
            }
        };

        let Some(mut entity) = slot else {
            return Ok((result, existed.then_some(UpdatePayload::Destroy)));
        };
        if !existed && entity.is_logically_empty() {
            return Ok((result, None));
        }

        let mut collector = UpdateCollector::default();
        let committed = match change {
            Change::None => Ok(()),
            // Nobody else has a copy to apply a delta to.
            Change::Delta(_) if !existed => commit_full(&mut collector, key, &mut entity),
            Change::Delta(delta) => commit_with_delta(&mut collector, key, &mut entity, delta),
            Change::Full => commit_full(&mut collector, key, &mut entity),
        };
        if !entity.is_logically_empty() {
            entries.insert(key.clone(), entity);
        }
        committed?;
        Ok((result, collector.payload))
    }

    fn peers(&self) -> Vec<MemberId> {
        let local = self.dm.local_member();
        self.dm
            .membership()
            .members()
            .into_iter()
            .filter(|m| m != local)
            .collect()
    }

    async fn distribute(&self, key: &Bytes, payload: UpdatePayload) -> Result<()> {
        let peers = self.peers();
        if peers.is_empty() {
            return Ok(());
        }

        let outcome = self.replicate(peers, key, payload.clone()).await?;
        let stale = outcome.needs_full_value();
        if stale.is_empty() || !payload.is_delta() {
            return Ok(());
        }

        debug!(key = ?key, members = ?stale, "resending full value after rejected delta");
        self.full_resends.fetch_add(stale.len() as u64, Ordering::Relaxed);
        let full = match self.state.get(key) {
            Some(entity) => UpdatePayload::Full(entity.to_bytes()?),
            None => UpdatePayload::Destroy,
        };
        let outcome = self.replicate(stale, key, full).await?;
        if !outcome.needs_full_value().is_empty() {
            warn!(key = ?key, members = ?outcome.needs_full_value(), "members rejected a full value");
        }
        Ok(())
    }

    async fn replicate(
        &self,
        recipients: Vec<MemberId>,
        key: &Bytes,
        payload: UpdatePayload,
    ) -> Result<ReplyOutcome> {
        let event_id = self.dm.new_event_id(&self.producer)?;
        let processor = ReplyProcessor::new(&self.dm, recipients.clone());
        let message = UpdateMessage::new(processor.id(), event_id, key.clone(), payload);

        let unreachable = self.dm.send(&message, &Recipients::to(recipients)).await?;
        for member in &unreachable {
            processor.member_departed(member);
        }
        Ok(processor
            .wait_for_completion(Some(self.dm.config().reply_timeout()))
            .await?)
    }
}

/// Number of members a set-like delta touched, with the change it makes.
fn counted(delta: Option<DeltaInfo>) -> (usize, Change) {
    match delta {
        Some(delta) => {
            let count = match &delta {
                DeltaInfo::Adds(members) | DeltaInfo::Rems(members) => members.len(),
                DeltaInfo::ZAdds(pairs) => pairs.len(),
                DeltaInfo::Append { .. } | DeltaInfo::Timestamp(_) => 1,
            };
            (count, Change::Delta(delta))
        }
        None => (0, Change::None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::SimulatedCluster;
    use basalt_delta::TTL_NONE;

    fn b(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[tokio::test]
    async fn test_writes_reach_every_member() {
        let cluster = SimulatedCluster::start(3).unwrap();
        let writer = &cluster.regions()[0];

        assert_eq!(writer.sadd("fruit", vec![b("apple"), b("pear")]).await.unwrap(), 2);
        assert_eq!(writer.sadd("fruit", vec![b("pear"), b("plum")]).await.unwrap(), 1);
        assert_eq!(writer.srem("fruit", vec![b("apple")]).await.unwrap(), 1);
        assert_eq!(writer.append("log", b("a")).await.unwrap(), 1);
        assert_eq!(writer.append("log", b("bc")).await.unwrap(), 3);
        writer.zadd("scores", vec![(b("ann"), 1.5), (b("bob"), 2.0)]).await.unwrap();

        assert!(cluster.converged());
        let reader = &cluster.regions()[2];
        assert_eq!(reader.smembers(b"fruit"), vec![b("pear"), b("plum")]);
        assert_eq!(reader.get(b"log").unwrap().as_string().unwrap().get(), b"abc");
        assert_eq!(writer.full_resends(), 0);
    }

    #[tokio::test]
    async fn test_missing_copy_gets_full_value() {
        let cluster = SimulatedCluster::start(3).unwrap();
        let writer = &cluster.regions()[0];
        writer.sadd("k", vec![b("x")]).await.unwrap();

        cluster.regions()[1].state().replace_local(b"k", None);
        writer.sadd("k", vec![b("y")]).await.unwrap();

        assert_eq!(writer.full_resends(), 1);
        assert!(cluster.converged());
    }

    #[tokio::test]
    async fn test_append_gap_gets_full_value() {
        let cluster = SimulatedCluster::start(2).unwrap();
        let writer = &cluster.regions()[0];
        writer.append("s", b("one")).await.unwrap();
        writer.append("s", b("two")).await.unwrap();

        // A stale copy whose append sequence is behind the writer's.
        cluster.regions()[1]
            .state()
            .replace_local(b"s", Some(StringEntity::new("one").into()));
        writer.append("s", b("three")).await.unwrap();

        assert_eq!(writer.full_resends(), 1);
        assert!(cluster.converged());
        assert_eq!(
            cluster.regions()[1].get(b"s").unwrap().as_string().unwrap().get(),
            b"onetwothree"
        );
    }

    #[tokio::test]
    async fn test_departed_member_does_not_block_writes() {
        let mut cluster = SimulatedCluster::start(3).unwrap();
        cluster.regions()[0].sadd("k", vec![b("a")]).await.unwrap();

        cluster.crash(2).await;
        let writer = &cluster.regions()[0];
        writer.sadd("k", vec![b("b")]).await.unwrap();
        writer.append("log", b("after")).await.unwrap();

        assert!(cluster.converged());
        assert_eq!(cluster.live_regions().count(), 2);
    }

    #[tokio::test]
    async fn test_expiration_replicates() {
        let cluster = SimulatedCluster::start(2).unwrap();
        let writer = &cluster.regions()[0];
        let reader = &cluster.regions()[1];

        writer.set("session", "token").await.unwrap();
        assert_eq!(reader.pttl(b"session"), TTL_NONE);

        let later = now_millis() + 60_000;
        assert!(writer.pexpireat("session", later).await.unwrap());
        assert_eq!(reader.get(b"session").unwrap().expiration_timestamp(), later);

        assert!(writer.persist("session").await.unwrap());
        assert!(!writer.persist("session").await.unwrap());
        assert_eq!(reader.pttl(b"session"), TTL_NONE);

        assert!(writer.pexpireat("session", 1).await.unwrap());
        assert!(reader.get(b"session").is_none());
        assert_eq!(reader.pttl(b"session"), TTL_EXPIRED);
        assert!(!writer.pexpireat("missing", later).await.unwrap());
    }

    #[tokio::test]
    async fn test_emptied_set_is_destroyed_everywhere() {
        let cluster = SimulatedCluster::start(2).unwrap();
        let writer = &cluster.regions()[0];
        writer.sadd("k", vec![b("only")]).await.unwrap();
        writer.srem("k", vec![b("only")]).await.unwrap();

        assert!(writer.get(b"k").is_none());
        assert!(cluster.regions()[1].get(b"k").is_none());
    }

    #[tokio::test]
    async fn test_wrong_type_leaves_value_alone() {
        let cluster = SimulatedCluster::start(1).unwrap();
        let region = &cluster.regions()[0];
        region.append("s", b("text")).await.unwrap();

        let err = region.sadd("s", vec![b("x")]).await.unwrap_err();
        assert!(matches!(err, RegionError::WrongType { expected: "set", .. }));
        assert_eq!(region.get(b"s").unwrap().as_string().unwrap().get(), b"text");
    }

    #[test]
    fn test_duplicate_update_ignored() {
        let state = RegionState::default();
        let event_id = basalt_event::EventId::from_parts(Bytes::from_static(&[1; 20]), 1, 5);
        let full = SetEntity::from_members([b("a")]);
        let update = UpdateMessage::new(
            0,
            event_id,
            b("k"),
            UpdatePayload::Full(GridEntity::from(full).to_bytes().unwrap()),
        );

        assert_eq!(state.apply_update(&update).unwrap(), UpdateOutcome::Applied);
        assert_eq!(state.apply_update(&update).unwrap(), UpdateOutcome::Duplicate);
        assert_eq!(state.len(), 1);
    }
}
