//! Table of live reply processors.
//!
//! The keeper only holds weak references: a processor whose owner has gone
//! away disappears from the table without anyone having to unregister it.

use crate::processor::ProcessorCore;
use crate::reply::ReplyMessage;
use basalt_wire::MemberId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

#[derive(Debug)]
pub struct ProcessorKeeper {
    processors: DashMap<i32, Weak<ProcessorCore>>,
    next_id: AtomicI32,
}

impl ProcessorKeeper {
    pub fn new() -> Self {
        Self {
            processors: DashMap::new(),
            next_id: AtomicI32::new(1),
        }
    }

    /// Next candidate id. Ids are positive and wrap back to 1.
    fn next_candidate(&self) -> i32 {
        match self.next_id.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| {
            Some(if id == i32::MAX { 1 } else { id + 1 })
        }) {
            Ok(id) | Err(id) => id,
        }
    }

    /// Register a processor built by `make` under a fresh id.
    ///
    /// An id is never handed out while a live processor holds it.
    pub(crate) fn register<F>(&self, make: F) -> Arc<ProcessorCore>
    where
        F: FnOnce(i32) -> Arc<ProcessorCore>,
    {
        loop {
            let id = self.next_candidate();
            match self.processors.entry(id) {
                Entry::Vacant(slot) => {
                    let core = make(id);
                    slot.insert(Arc::downgrade(&core));
                    return core;
                }
                Entry::Occupied(mut slot) if slot.get().strong_count() == 0 => {
                    let core = make(id);
                    slot.insert(Arc::downgrade(&core));
                    return core;
                }
                Entry::Occupied(_) => continue,
            }
        }
    }

    pub fn get(&self, processor_id: i32) -> Option<Arc<ProcessorCore>> {
        let core = self.processors.get(&processor_id)?.upgrade();
        if core.is_none() {
            self.processors
                .remove_if(&processor_id, |_, weak| weak.strong_count() == 0);
        }
        core
    }

    /// Remove `core`'s entry, unless the id already belongs to someone else.
    pub(crate) fn unregister(&self, core: &ProcessorCore) {
        self.processors.remove_if(&core.id(), |_, weak| {
            std::ptr::eq(weak.as_ptr(), core as *const ProcessorCore)
        });
    }

    /// Route a reply to its processor. Returns false if the id is unknown.
    pub fn process_reply(&self, sender: &MemberId, reply: &ReplyMessage) -> bool {
        match self.get(reply.processor_id()) {
            Some(core) => {
                core.process_reply(sender, reply);
                true
            }
            None => {
                trace!(processor_id = reply.processor_id(), sender = %sender, "reply for unknown processor");
                false
            }
        }
    }

    /// Tell every live processor that `member` left.
    pub fn member_departed(&self, member: &MemberId) {
        // Snapshot first: a processor that completes unregisters itself.
        let live: Vec<Arc<ProcessorCore>> = self
            .processors
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect();
        for core in live {
            core.member_departed(member);
        }
    }

    pub fn contains(&self, processor_id: i32) -> bool {
        self.get(processor_id).is_some()
    }

    /// Number of table entries, including ones whose owner is gone.
    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl Default for ProcessorKeeper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::LocalMembership;
    use crate::processor::ReplyProcessor;
    use std::time::Duration;

    fn setup() -> (Arc<ProcessorKeeper>, Arc<LocalMembership>, MemberId) {
        let keeper = Arc::new(ProcessorKeeper::new());
        let membership = Arc::new(LocalMembership::new());
        let member = MemberId::new("10.0.0.2", 4000);
        membership.join(member.clone());
        (keeper, membership, member)
    }

    #[test]
    fn test_ids_start_at_one() {
        let (keeper, membership, member) = setup();
        let p = ReplyProcessor::register(&keeper, membership.as_ref(), [member], Duration::from_secs(15));
        assert_eq!(p.id(), 1);
        assert!(keeper.contains(1));
    }

    #[test]
    fn test_wrap_skips_live_ids() {
        let (keeper, membership, member) = setup();
        let first = ReplyProcessor::register(&keeper, membership.as_ref(), [member.clone()], Duration::from_secs(15));
        assert_eq!(first.id(), 1);

        keeper.next_id.store(i32::MAX, Ordering::SeqCst);
        let at_max = ReplyProcessor::register(&keeper, membership.as_ref(), [member.clone()], Duration::from_secs(15));
        assert_eq!(at_max.id(), i32::MAX);

        // 1 is still live, so the wrap lands on 2.
        let wrapped = ReplyProcessor::register(&keeper, membership.as_ref(), [member], Duration::from_secs(15));
        assert_eq!(wrapped.id(), 2);
    }

    #[test]
    fn test_dropped_processor_unregisters() {
        let (keeper, membership, member) = setup();
        let p = ReplyProcessor::register(&keeper, membership.as_ref(), [member.clone()], Duration::from_secs(15));
        let id = p.id();
        drop(p);
        assert!(!keeper.contains(id));
        assert!(!keeper.process_reply(&member, &ReplyMessage::new(id)));
    }

    #[test]
    fn test_unknown_id_ignored() {
        let (keeper, _, member) = setup();
        assert!(!keeper.process_reply(&member, &ReplyMessage::new(12345)));
    }
}
