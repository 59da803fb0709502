//! Reply processors: correlate replies from a set of recipients.
//!
//! A processor is registered before its request is sent and resolves once
//! every expected recipient has either replied or left the membership. Each
//! recipient is resolved at most once; completion fires exactly once and
//! unregisters the processor.
//!
//! ```text
//! Created -> Awaiting --(last reply / departure)--> Completed -> Unregistered
//!               \--(cancel)--> Cancelled -> Unregistered
//! ```
//!
//! A wait that times out leaves the processor registered.

use crate::error::{AggregatedReplyException, ReplyError, ReplyException};
use crate::keeper::ProcessorKeeper;
use crate::manager::DistributionManager;
use crate::membership::MembershipView;
use crate::reply::ReplyMessage;
use basalt_wire::MemberId;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Terminal {
    Completed,
    Cancelled { sender: MemberId, cause: String },
}

#[derive(Debug, Default)]
struct ProcessorState {
    pending: BTreeSet<MemberId>,
    replies: BTreeMap<MemberId, ReplyMessage>,
    exceptions: BTreeMap<MemberId, ReplyException>,
    ignored: BTreeMap<MemberId, Option<ReplyException>>,
    closed: BTreeSet<MemberId>,
    departed: BTreeSet<MemberId>,
    terminal: Option<Terminal>,
}

/// Everything a completed processor collected.
#[derive(Clone, Debug, Default)]
pub struct ReplyOutcome {
    pub replies: BTreeMap<MemberId, ReplyMessage>,
    /// Members that declined the request, with their stated cause.
    pub ignored: BTreeMap<MemberId, Option<ReplyException>>,
    pub closed: BTreeSet<MemberId>,
    /// Members that left before replying.
    pub departed: BTreeSet<MemberId>,
}

impl ReplyOutcome {
    /// Members that could not apply a delta and want the full value.
    pub fn needs_full_value(&self) -> Vec<MemberId> {
        self.ignored
            .iter()
            .filter(|(_, cause)| matches!(cause, Some(c) if c.is_invalid_delta()))
            .map(|(member, _)| member.clone())
            .collect()
    }
}

/// Shared state of one processor. Owned by its [`ReplyProcessor`] handle;
/// the keeper only holds a weak reference.
#[derive(Debug)]
pub struct ProcessorCore {
    id: i32,
    state: Mutex<ProcessorState>,
    done: AtomicBool,
    condvar: Condvar,
    notify: Notify,
    keeper: Weak<ProcessorKeeper>,
}

impl ProcessorCore {
    fn new(id: i32, expected: BTreeSet<MemberId>, keeper: Weak<ProcessorKeeper>) -> Self {
        Self {
            id,
            state: Mutex::new(ProcessorState {
                pending: expected,
                ..Default::default()
            }),
            done: AtomicBool::new(false),
            condvar: Condvar::new(),
            notify: Notify::new(),
            keeper,
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> Vec<MemberId> {
        self.state.lock().pending.iter().cloned().collect()
    }

    /// Record a reply from `sender`. Replies from members that are not
    /// awaited, or that arrive after completion, are dropped.
    pub fn process_reply(&self, sender: &MemberId, reply: &ReplyMessage) {
        let fire = {
            let mut state = self.state.lock();
            if state.terminal.is_some() || !state.pending.remove(sender) {
                trace!(processor_id = self.id, sender = %sender, "reply not awaited");
                return;
            }
            if reply.is_ignored() {
                state.ignored.insert(sender.clone(), reply.exception().cloned());
            } else if let Some(exception) = reply.exception() {
                state.exceptions.insert(sender.clone(), exception.clone());
            } else {
                state.replies.insert(sender.clone(), reply.clone());
            }
            if reply.is_closed() {
                state.closed.insert(sender.clone());
            }
            Self::try_complete(&mut state)
        };
        if fire {
            self.fire();
        }
    }

    /// Treat `member` as having replied if it was still awaited.
    pub fn member_departed(&self, member: &MemberId) {
        let fire = {
            let mut state = self.state.lock();
            if state.terminal.is_some() || !state.pending.remove(member) {
                return;
            }
            debug!(processor_id = self.id, member = %member, "awaited member departed");
            state.departed.insert(member.clone());
            Self::try_complete(&mut state)
        };
        if fire {
            self.fire();
        }
    }

    /// Release every waiter with [`ReplyError::Cancelled`].
    pub fn cancel(&self, sender: &MemberId, cause: impl Into<String>) {
        {
            let mut state = self.state.lock();
            if state.terminal.is_some() {
                return;
            }
            state.terminal = Some(Terminal::Cancelled {
                sender: sender.clone(),
                cause: cause.into(),
            });
        }
        self.fire();
    }

    fn try_complete(state: &mut ProcessorState) -> bool {
        if state.pending.is_empty() && state.terminal.is_none() {
            state.terminal = Some(Terminal::Completed);
            true
        } else {
            false
        }
    }

    fn fire(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            // Waiters check `terminal` under this lock.
            let _state = self.state.lock();
            self.condvar.notify_all();
        }
        self.notify.notify_waiters();
        self.unregister();
    }

    fn unregister(&self) {
        if let Some(keeper) = self.keeper.upgrade() {
            keeper.unregister(self);
        }
    }

    fn outcome(&self) -> Result<ReplyOutcome, ReplyError> {
        let state = self.state.lock();
        match &state.terminal {
            Some(Terminal::Cancelled { sender, cause }) => Err(ReplyError::Cancelled {
                sender: sender.clone(),
                cause: cause.clone(),
            }),
            _ if !state.exceptions.is_empty() => Err(ReplyError::Remote(
                AggregatedReplyException::new(state.exceptions.clone()),
            )),
            _ => Ok(ReplyOutcome {
                replies: state.replies.clone(),
                ignored: state.ignored.clone(),
                closed: state.closed.clone(),
                departed: state.departed.clone(),
            }),
        }
    }

    fn timeout_error(&self, waited: Duration) -> ReplyError {
        ReplyError::Timeout {
            processor_id: self.id,
            waited,
            pending: self.pending(),
        }
    }
}

/// Owning handle to a registered processor. Dropping it unregisters.
#[derive(Debug)]
pub struct ReplyProcessor {
    core: Arc<ProcessorCore>,
    ack_wait_threshold: Duration,
}

impl ReplyProcessor {
    /// Register a processor awaiting `recipients` on `dm`.
    pub fn new(dm: &DistributionManager, recipients: impl IntoIterator<Item = MemberId>) -> Self {
        Self::register(
            dm.processor_keeper(),
            dm.membership().as_ref(),
            recipients,
            dm.config().ack_wait_threshold(),
        )
    }

    /// Register with an explicit keeper and membership view.
    ///
    /// Recipients that are already gone from the view count as departed
    /// straight away, so a processor over only absent members is complete on
    /// return.
    pub fn register(
        keeper: &Arc<ProcessorKeeper>,
        membership: &dyn MembershipView,
        recipients: impl IntoIterator<Item = MemberId>,
        ack_wait_threshold: Duration,
    ) -> Self {
        let expected: BTreeSet<MemberId> = recipients.into_iter().collect();
        let weak_keeper = Arc::downgrade(keeper);
        let core = keeper.register(|id| {
            Arc::new(ProcessorCore::new(id, expected.clone(), weak_keeper))
        });

        for member in &expected {
            if !membership.is_member(member) {
                core.member_departed(member);
            }
        }
        // Covers an empty recipient set.
        let fire = ProcessorCore::try_complete(&mut core.state.lock());
        if fire {
            core.fire();
        }

        Self {
            core,
            ack_wait_threshold,
        }
    }

    pub fn id(&self) -> i32 {
        self.core.id
    }

    pub fn core(&self) -> &Arc<ProcessorCore> {
        &self.core
    }

    pub fn is_done(&self) -> bool {
        self.core.is_done()
    }

    pub fn pending(&self) -> Vec<MemberId> {
        self.core.pending()
    }

    pub fn process_reply(&self, sender: &MemberId, reply: &ReplyMessage) {
        self.core.process_reply(sender, reply);
    }

    pub fn member_departed(&self, member: &MemberId) {
        self.core.member_departed(member);
    }

    pub fn cancel(&self, sender: &MemberId, cause: impl Into<String>) {
        self.core.cancel(sender, cause);
    }

    /// Wait for every recipient to resolve.
    ///
    /// `None` waits forever. On timeout the processor stays registered, so a
    /// later call can pick up replies that arrive in the meantime.
    pub async fn wait_for_completion(
        &self,
        timeout: Option<Duration>,
    ) -> Result<ReplyOutcome, ReplyError> {
        let start = Instant::now();
        let mut warned = false;

        loop {
            let notified = self.core.notify.notified();
            if self.core.is_done() {
                break;
            }

            let elapsed = start.elapsed();
            let until_timeout = timeout.map(|t| t.saturating_sub(elapsed));
            let until_warning = (!warned).then(|| self.ack_wait_threshold.saturating_sub(elapsed));
            let sleep_for = match (until_timeout, until_warning) {
                (Some(t), Some(w)) => Some(t.min(w)),
                (t, w) => t.or(w),
            };

            let Some(sleep_for) = sleep_for else {
                notified.await;
                continue;
            };
            if tokio::time::timeout(sleep_for, notified).await.is_ok() {
                continue;
            }

            let elapsed = start.elapsed();
            if timeout.map(|t| elapsed >= t).unwrap_or(false) {
                if self.core.is_done() {
                    break;
                }
                return Err(self.core.timeout_error(elapsed));
            }
            if !warned && elapsed >= self.ack_wait_threshold {
                warned = true;
                self.warn_slow(elapsed);
            }
        }

        self.core.outcome()
    }

    /// Blocking variant for callers outside the async runtime.
    pub fn wait_for_completion_blocking(
        &self,
        timeout: Option<Duration>,
    ) -> Result<ReplyOutcome, ReplyError> {
        let start = Instant::now();
        let mut warned = false;
        {
            let mut state = self.core.state.lock();
            while state.terminal.is_none() {
                let elapsed = start.elapsed();
                if let Some(t) = timeout {
                    if elapsed >= t {
                        drop(state);
                        return Err(self.core.timeout_error(elapsed));
                    }
                }
                if !warned && elapsed >= self.ack_wait_threshold {
                    warned = true;
                    warn!(
                        processor_id = self.core.id,
                        waited = ?elapsed,
                        pending = ?state.pending,
                        "still waiting for replies past the ack-wait threshold"
                    );
                }

                let until_timeout = timeout.map(|t| t.saturating_sub(elapsed));
                let until_warning = (!warned).then(|| self.ack_wait_threshold.saturating_sub(elapsed));
                match until_timeout.into_iter().chain(until_warning).min() {
                    Some(d) => {
                        self.core.condvar.wait_for(&mut state, d);
                    }
                    None => self.core.condvar.wait(&mut state),
                }
            }
        }
        self.core.outcome()
    }

    fn warn_slow(&self, elapsed: Duration) {
        warn!(
            processor_id = self.core.id,
            waited = ?elapsed,
            pending = ?self.core.pending(),
            "still waiting for replies past the ack-wait threshold"
        );
    }
}

impl Drop for ReplyProcessor {
    fn drop(&mut self) {
        self.core.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExceptionKind;
    use crate::membership::LocalMembership;

    fn members(n: usize) -> Vec<MemberId> {
        (0..n)
            .map(|i| MemberId::new("10.0.0.1", 5000 + i as u16))
            .collect()
    }

    fn setup(n: usize) -> (Arc<ProcessorKeeper>, Arc<LocalMembership>, Vec<MemberId>) {
        let membership = Arc::new(LocalMembership::new());
        let members = members(n);
        for m in &members {
            membership.join(m.clone());
        }
        (Arc::new(ProcessorKeeper::new()), membership, members)
    }

    fn processor(
        keeper: &Arc<ProcessorKeeper>,
        membership: &LocalMembership,
        recipients: &[MemberId],
    ) -> ReplyProcessor {
        ReplyProcessor::register(keeper, membership, recipients.to_vec(), Duration::from_secs(15))
    }

    #[test]
    fn test_completes_after_all_replies() {
        let (keeper, membership, m) = setup(2);
        let p = processor(&keeper, &membership, &m);
        p.process_reply(&m[1], &ReplyMessage::new(p.id()).with_value(1));
        assert!(!p.is_done());
        p.process_reply(&m[0], &ReplyMessage::new(p.id()).with_value(0));
        assert!(p.is_done());
        assert!(!keeper.contains(p.id()));

        let outcome = p.wait_for_completion_blocking(None).unwrap();
        assert_eq!(outcome.replies.len(), 2);
    }

    #[test]
    fn test_absent_recipient_resolved_at_registration() {
        let (keeper, membership, m) = setup(1);
        let stranger = MemberId::new("10.9.9.9", 1);
        let p = processor(&keeper, &membership, &[m[0].clone(), stranger.clone()]);
        assert_eq!(p.pending(), vec![m[0].clone()]);

        p.process_reply(&m[0], &ReplyMessage::new(p.id()));
        let outcome = p.wait_for_completion_blocking(None).unwrap();
        assert!(outcome.departed.contains(&stranger));
    }

    #[test]
    fn test_empty_recipients_complete_immediately() {
        let (keeper, membership, _) = setup(0);
        let p = processor(&keeper, &membership, &[]);
        assert!(p.is_done());
        assert!(p.wait_for_completion_blocking(Some(Duration::ZERO)).is_ok());
    }

    #[test]
    fn test_duplicate_reply_is_noop() {
        let (keeper, membership, m) = setup(2);
        let p = processor(&keeper, &membership, &m);
        p.process_reply(&m[0], &ReplyMessage::new(p.id()));
        p.process_reply(&m[0], &ReplyMessage::new(p.id()));
        p.member_departed(&m[0]);
        assert_eq!(p.pending(), vec![m[1].clone()]);
        assert!(!p.is_done());
    }

    #[test]
    fn test_exceptions_aggregate() {
        let (keeper, membership, m) = setup(2);
        let p = processor(&keeper, &membership, &m);
        let boom = ReplyException::new(ExceptionKind::Internal, "boom");
        p.process_reply(&m[0], &ReplyMessage::new(p.id()).with_exception(boom.clone()));
        p.process_reply(&m[1], &ReplyMessage::new(p.id()));

        match p.wait_for_completion_blocking(None) {
            Err(ReplyError::Remote(agg)) => {
                assert_eq!(agg.len(), 1);
                assert_eq!(agg.failures().get(&m[0]), Some(&boom));
            }
            other => panic!("expected remote failure, got {:?}", other),
        }
    }

    #[test]
    fn test_ignored_with_invalid_delta() {
        let (keeper, membership, m) = setup(2);
        let p = processor(&keeper, &membership, &m);
        p.process_reply(
            &m[0],
            &ReplyMessage::new(p.id())
                .ignored()
                .with_exception(ReplyException::invalid_delta("gap")),
        );
        p.process_reply(&m[1], &ReplyMessage::new(p.id()).ignored());

        let outcome = p.wait_for_completion_blocking(None).unwrap();
        assert_eq!(outcome.ignored.len(), 2);
        assert_eq!(outcome.needs_full_value(), vec![m[0].clone()]);
    }

    #[test]
    fn test_cancel_releases_waiter() {
        let (keeper, membership, m) = setup(1);
        let p = processor(&keeper, &membership, &m);
        p.cancel(&m[0], "handler failed");
        assert!(matches!(
            p.wait_for_completion_blocking(None),
            Err(ReplyError::Cancelled { .. })
        ));
        // Late replies after cancellation change nothing.
        p.process_reply(&m[0], &ReplyMessage::new(p.id()));
        assert!(matches!(
            p.wait_for_completion_blocking(None),
            Err(ReplyError::Cancelled { .. })
        ));
    }

    #[test]
    fn test_blocking_timeout_keeps_registration() {
        let (keeper, membership, m) = setup(1);
        let p = processor(&keeper, &membership, &m);
        match p.wait_for_completion_blocking(Some(Duration::from_millis(20))) {
            Err(ReplyError::Timeout { pending, .. }) => assert_eq!(pending, m),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(keeper.contains(p.id()));

        p.process_reply(&m[0], &ReplyMessage::new(p.id()));
        assert!(p.wait_for_completion_blocking(Some(Duration::from_millis(20))).is_ok());
    }

    #[test]
    fn test_async_wait_from_blocking_context() {
        let (keeper, membership, m) = setup(1);
        let p = processor(&keeper, &membership, &m);
        p.member_departed(&m[0]);
        let outcome = tokio_test::block_on(p.wait_for_completion(Some(Duration::from_secs(1))));
        assert_eq!(outcome.unwrap().departed.len(), 1);
    }
}
