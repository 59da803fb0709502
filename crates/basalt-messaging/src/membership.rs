//! Membership view consumed by dispatch and reply processors.
//!
//! Failure detection lives elsewhere. This module only tracks who is
//! currently a member and tells listeners when someone leaves.

use basalt_wire::MemberId;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Weak;
use tracing::debug;

/// Notified of membership changes.
pub trait MembershipListener: Send + Sync {
    fn member_joined(&self, _member: &MemberId) {}

    fn member_departed(&self, member: &MemberId, crashed: bool);
}

pub trait MembershipView: Send + Sync {
    fn is_member(&self, member: &MemberId) -> bool;

    fn members(&self) -> Vec<MemberId>;

    /// Listeners are held weakly and dropped once their owner is gone.
    fn add_listener(&self, listener: Weak<dyn MembershipListener>);
}

/// Membership driven by explicit join/depart calls.
#[derive(Default)]
pub struct LocalMembership {
    members: RwLock<BTreeSet<MemberId>>,
    listeners: RwLock<Vec<Weak<dyn MembershipListener>>>,
}

impl LocalMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, member: MemberId) {
        if !self.members.write().insert(member.clone()) {
            return;
        }
        for listener in self.live_listeners() {
            listener.member_joined(&member);
        }
    }

    /// Remove `member` and notify listeners. Returns false if it was not a
    /// member.
    pub fn depart(&self, member: &MemberId, crashed: bool) -> bool {
        if !self.members.write().remove(member) {
            return false;
        }
        debug!(member = %member, crashed, "member departed");
        for listener in self.live_listeners() {
            listener.member_departed(member, crashed);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    fn live_listeners(&self) -> Vec<std::sync::Arc<dyn MembershipListener>> {
        let mut listeners = self.listeners.write();
        listeners.retain(|l| l.strong_count() > 0);
        listeners.iter().filter_map(Weak::upgrade).collect()
    }
}

impl MembershipView for LocalMembership {
    fn is_member(&self, member: &MemberId) -> bool {
        self.members.read().contains(member)
    }

    fn members(&self) -> Vec<MemberId> {
        self.members.read().iter().cloned().collect()
    }

    fn add_listener(&self, listener: Weak<dyn MembershipListener>) {
        self.listeners.write().push(listener);
    }
}
