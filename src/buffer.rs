use crate::error::{PatternError, Result};
use crossbeam::queue::{ArrayQueue, SegQueue};
use crossbeam::utils::Backoff;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Determines how a queue waits when it is empty or full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueMode {
    /// Mutex-protected deque, waiters park on condition variables
    #[default]
    Blocking,
    /// crossbeam lock-free queue, waiters spin with backoff
    LockFree,
}

enum Slots<T> {
    Locked {
        items: Mutex<VecDeque<T>>,
        capacity: Option<usize>,
        not_empty: Condvar,
        not_full: Condvar,
    },
    Bounded(ArrayQueue<T>),
    Unbounded(SegQueue<T>),
}

struct QueueInner<T> {
    slots: Slots<T>,
    closed: AtomicBool,
    block_count: AtomicU64,
}

/// A multi-producer, multi-consumer FIFO connecting two stages.
///
/// `push` blocks while a bounded queue is full and `pop` blocks until an item
/// is available. Both return [`PatternError::QueueClosed`] once the queue has
/// been closed by an invocation teardown.
pub struct Queue<T: Send> {
    inner: Arc<QueueInner<T>>,
}

impl<T: Send> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("mode", &self.mode())
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T: Send> Queue<T> {
    /// Create a queue. `capacity = None` makes it unbounded, zero is raised to one.
    pub fn new(capacity: Option<usize>, mode: QueueMode) -> Self {
        let capacity = capacity.map(|c| c.max(1));
        let slots = match (mode, capacity) {
            (QueueMode::Blocking, capacity) => Slots::Locked {
                items: Mutex::new(VecDeque::with_capacity(capacity.unwrap_or(16).min(1024))),
                capacity,
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
            },
            (QueueMode::LockFree, Some(capacity)) => Slots::Bounded(ArrayQueue::new(capacity)),
            (QueueMode::LockFree, None) => Slots::Unbounded(SegQueue::new()),
        };
        Self {
            inner: Arc::new(QueueInner {
                slots,
                closed: AtomicBool::new(false),
                block_count: AtomicU64::new(0),
            }),
        }
    }

    /// Push an item, waiting for space if the queue is bounded and full
    pub fn push(&self, item: T) -> Result<()> {
        match &self.inner.slots {
            Slots::Locked {
                items,
                capacity,
                not_empty,
                not_full,
            } => {
                let mut items = items.lock();
                if let Some(capacity) = *capacity {
                    if items.len() >= capacity {
                        self.inner.block_count.fetch_add(1, Ordering::Relaxed);
                    }
                    while items.len() >= capacity && !self.is_closed() {
                        not_full.wait(&mut items);
                    }
                }
                if self.is_closed() {
                    return Err(PatternError::QueueClosed);
                }
                items.push_back(item);
                not_empty.notify_one();
                Ok(())
            }
            Slots::Bounded(ring) => self.push_spinning(ring, item),
            Slots::Unbounded(segments) => {
                if self.is_closed() {
                    return Err(PatternError::QueueClosed);
                }
                segments.push(item);
                Ok(())
            }
        }
    }

    fn push_spinning(&self, ring: &ArrayQueue<T>, mut item: T) -> Result<()> {
        let backoff = Backoff::new();
        let mut blocked = false;
        loop {
            if self.is_closed() {
                return Err(PatternError::QueueClosed);
            }
            match ring.push(item) {
                Ok(()) => return Ok(()),
                Err(rejected) => {
                    item = rejected;
                    if !blocked {
                        blocked = true;
                        self.inner.block_count.fetch_add(1, Ordering::Relaxed);
                    }
                    wait(&backoff);
                }
            }
        }
    }

    /// Remove the oldest item, waiting until one is available
    pub fn pop(&self) -> Result<T> {
        match &self.inner.slots {
            Slots::Locked {
                items,
                not_empty,
                not_full,
                ..
            } => {
                let mut items = items.lock();
                loop {
                    if self.is_closed() {
                        return Err(PatternError::QueueClosed);
                    }
                    if let Some(item) = items.pop_front() {
                        not_full.notify_one();
                        return Ok(item);
                    }
                    not_empty.wait(&mut items);
                }
            }
            Slots::Bounded(ring) => self.pop_spinning(|| ring.pop()),
            Slots::Unbounded(segments) => self.pop_spinning(|| segments.pop()),
        }
    }

    fn pop_spinning(&self, mut take: impl FnMut() -> Option<T>) -> Result<T> {
        let backoff = Backoff::new();
        loop {
            if self.is_closed() {
                return Err(PatternError::QueueClosed);
            }
            if let Some(item) = take() {
                return Ok(item);
            }
            wait(&backoff);
        }
    }

    /// Remove the oldest item if one is present, without waiting
    pub fn try_pop(&self) -> Option<T> {
        match &self.inner.slots {
            Slots::Locked {
                items, not_full, ..
            } => {
                let item = items.lock().pop_front();
                if item.is_some() {
                    not_full.notify_one();
                }
                item
            }
            Slots::Bounded(ring) => ring.pop(),
            Slots::Unbounded(segments) => segments.pop(),
        }
    }

    /// Close the queue and wake every waiter.
    ///
    /// Only used to tear down a failed invocation.
    pub fn close(&self) {
        match &self.inner.slots {
            Slots::Locked {
                items,
                not_empty,
                not_full,
                ..
            } => {
                // Set the flag under the lock so no waiter misses the wakeup
                let _items = items.lock();
                self.inner.closed.store(true, Ordering::Release);
                not_empty.notify_all();
                not_full.notify_all();
            }
            Slots::Bounded(_) | Slots::Unbounded(_) => {
                self.inner.closed.store(true, Ordering::Release);
            }
        }
    }

    /// Check whether the queue was closed by teardown
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Get the current number of queued items
    pub fn len(&self) -> usize {
        match &self.inner.slots {
            Slots::Locked { items, .. } => items.lock().len(),
            Slots::Bounded(ring) => ring.len(),
            Slots::Unbounded(segments) => segments.len(),
        }
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the capacity, `None` when unbounded
    pub fn capacity(&self) -> Option<usize> {
        match &self.inner.slots {
            Slots::Locked { capacity, .. } => *capacity,
            Slots::Bounded(ring) => Some(ring.capacity()),
            Slots::Unbounded(_) => None,
        }
    }

    /// Get the queue implementation in use
    pub fn mode(&self) -> QueueMode {
        match &self.inner.slots {
            Slots::Locked { .. } => QueueMode::Blocking,
            Slots::Bounded(_) | Slots::Unbounded(_) => QueueMode::LockFree,
        }
    }

    /// Number of pushes that found the queue full and had to wait
    pub fn block_count(&self) -> u64 {
        self.inner.block_count.load(Ordering::Relaxed)
    }
}

fn wait(backoff: &Backoff) {
    if backoff.is_completed() {
        thread::sleep(Duration::from_micros(1));
    } else {
        backoff.snooze();
    }
}
