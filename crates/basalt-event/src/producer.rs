//! Per-producer sequence counters.
//!
//! Each [`ProducerContext`] owns a process-unique thread id and a sequence
//! counter. Sequence ids are reserved before use so that a batch can take a
//! contiguous range with one atomic add and derive the rest by offset.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

static NEXT_THREAD_ID: AtomicI64 = AtomicI64::new(0);

thread_local! {
    static CURRENT: Arc<ProducerContext> = Arc::new(ProducerContext::new());
}

#[derive(Debug)]
pub struct ProducerContext {
    thread_id: i64,
    next_sequence: AtomicI64,
}

impl ProducerContext {
    /// Allocate a fresh thread id. The first id handed out is 1.
    pub fn new() -> Self {
        Self {
            thread_id: NEXT_THREAD_ID.fetch_add(1, Ordering::SeqCst) + 1,
            next_sequence: AtomicI64::new(0),
        }
    }

    /// The context bound to the calling OS thread.
    pub fn current() -> Arc<ProducerContext> {
        CURRENT.with(Arc::clone)
    }

    pub fn thread_id(&self) -> i64 {
        self.thread_id
    }

    /// Next sequence id, without reserving it.
    pub fn peek_sequence_id(&self) -> i64 {
        self.next_sequence.load(Ordering::SeqCst)
    }

    /// Reserve a single sequence id.
    pub fn reserve_sequence_id(&self) -> i64 {
        self.next_sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Reserve `count` contiguous ids and return the first.
    ///
    /// Ranges taken concurrently never overlap.
    pub fn reserve_sequence_range(&self, count: u32) -> i64 {
        self.next_sequence
            .fetch_add(i64::from(count), Ordering::SeqCst)
    }
}

impl Default for ProducerContext {
    fn default() -> Self {
        Self::new()
    }
}
