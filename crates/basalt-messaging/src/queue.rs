//! Two-level task queue feeding the dispatch workers.

use crate::message::Priority;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

#[derive(Debug)]
struct Lanes<T> {
    high: VecDeque<T>,
    normal: VecDeque<T>,
    closed: bool,
}

/// FIFO within a priority; high-priority items always leave first.
#[derive(Debug)]
pub struct PriorityTaskQueue<T> {
    lanes: Mutex<Lanes<T>>,
    available: Notify,
}

impl<T> PriorityTaskQueue<T> {
    pub fn new() -> Self {
        Self {
            lanes: Mutex::new(Lanes {
                high: VecDeque::new(),
                normal: VecDeque::new(),
                closed: false,
            }),
            available: Notify::new(),
        }
    }

    /// Enqueue `item`. Returns false once the queue is closed.
    pub fn push(&self, item: T, priority: Priority) -> bool {
        {
            let mut lanes = self.lanes.lock();
            if lanes.closed {
                return false;
            }
            match priority {
                Priority::High => lanes.high.push_back(item),
                Priority::Normal => lanes.normal.push_back(item),
            }
        }
        self.available.notify_one();
        true
    }

    pub fn try_pop(&self) -> Option<T> {
        let mut lanes = self.lanes.lock();
        lanes.high.pop_front().or_else(|| lanes.normal.pop_front())
    }

    /// Wait for the next item. `None` once closed and drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.available.notified();
            {
                let mut lanes = self.lanes.lock();
                if let Some(item) = lanes.high.pop_front().or_else(|| lanes.normal.pop_front()) {
                    return Some(item);
                }
                if lanes.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Stop accepting items and wake every waiter. Queued items still drain.
    pub fn close(&self) {
        self.lanes.lock().closed = true;
        self.available.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lanes.lock().closed
    }

    pub fn len(&self) -> usize {
        let lanes = self.lanes.lock();
        lanes.high.len() + lanes.normal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for PriorityTaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_high_priority_first() {
        let queue = PriorityTaskQueue::new();
        queue.push(1, Priority::Normal);
        queue.push(2, Priority::High);
        queue.push(3, Priority::Normal);
        queue.push(4, Priority::High);

        let drained: Vec<_> = std::iter::from_fn(|| queue.try_pop()).collect();
        assert_eq!(drained, vec![2, 4, 1, 3]);
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(PriorityTaskQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push("hello", Priority::Normal);
        assert_eq!(consumer.await.unwrap(), Some("hello"));
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = Arc::new(PriorityTaskQueue::new());
        queue.push(1, Priority::Normal);
        queue.close();
        assert!(!queue.push(2, Priority::High));

        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn test_close_wakes_waiters() {
        let queue: Arc<PriorityTaskQueue<u8>> = Arc::new(PriorityTaskQueue::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.pop().await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), None);
        }
    }
}
