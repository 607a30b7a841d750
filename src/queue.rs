//! Bounded hand-off queue between the producer and one consumer.
//!
//! `push` never blocks: when the queue is full one item is discarded
//! according to the [`OverflowPolicy`] and the caller is told so it can count
//! the drop. Consumers either poll with `try_pop` (paced, blocking threads) or
//! await `pop` (async tasks).

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam::queue::ArrayQueue;
use serde::Deserialize;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the longest-queued item to admit the new one.
    #[default]
    DropOldest,
    /// Keep what is queued and discard the new item.
    DropNewest,
}

#[derive(Debug)]
pub struct QueueItem<T> {
    value: T,
    enqueued_at: Instant,
}

impl<T> QueueItem<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            enqueued_at: Instant::now(),
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    DroppedOldest,
    RejectedNewest,
    Closed,
}

impl PushOutcome {
    /// True when some item was discarded by this push.
    pub fn dropped(&self) -> bool {
        !matches!(self, PushOutcome::Queued)
    }
}

pub struct DropQueue<T> {
    name: &'static str,
    policy: OverflowPolicy,
    items: ArrayQueue<QueueItem<T>>,
    closed: AtomicBool,
    notify: Notify,
}

impl<T> DropQueue<T> {
    pub fn new(name: &'static str, capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            name,
            policy,
            items: ArrayQueue::new(capacity.max(1)),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&self, value: T) -> PushOutcome {
        if self.is_closed() {
            return PushOutcome::Closed;
        }
        let item = QueueItem::new(value);
        let outcome = match self.policy {
            OverflowPolicy::DropOldest => match self.items.force_push(item) {
                None => PushOutcome::Queued,
                Some(_evicted) => PushOutcome::DroppedOldest,
            },
            OverflowPolicy::DropNewest => match self.items.push(item) {
                Ok(()) => PushOutcome::Queued,
                Err(_rejected) => return PushOutcome::RejectedNewest,
            },
        };
        self.notify.notify_one();
        outcome
    }

    pub fn try_pop(&self) -> Option<QueueItem<T>> {
        self.items.pop()
    }

    /// Waits for the next item. Returns `None` once the queue is closed and
    /// everything queued before the close has been taken.
    pub async fn pop(&self) -> Option<QueueItem<T>> {
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if self.is_closed() {
                return self.try_pop();
            }
            notified.await;
        }
    }

    /// Refuses further pushes and wakes the consumer. Queued items stay
    /// available for draining.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
#[path = "queue_test.rs"]
mod queue_test;
