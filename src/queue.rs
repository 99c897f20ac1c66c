//! A bounded FIFO queue with blocking and timed operations and a one-way
//! open→closed lifecycle.
//!
//! The queue is the backpressure mechanism of the crate: `push` blocks while
//! the queue is at capacity, so a fast producer is paced by its slowest
//! consumer. Closing is how shutdown propagates — consumers drain whatever
//! remains and then observe [`ContainerError::Closed`] instead of blocking
//! forever.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::container::{Container, Drain};
use crate::error::ContainerError;

/// The default capacity bound. Generous enough that only a badly stalled
/// consumer causes producers to block.
pub const DEFAULT_CAPACITY: usize = 1 << 16;

// -----------------------------------------------------------------------------
// Closable queue

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A bounded multi-producer multi-consumer FIFO queue that can be closed.
///
/// Ownership of pushed values transfers to whichever consumer pops them.
/// All operations are safe to call from any number of threads; the queue
/// owns a single mutex and a condition variable pair.
pub struct ClosableQueue<T> {
    inner: Mutex<Inner<T>>,
    /// Signaled when an item arrives or the queue closes; consumers block here.
    not_empty: Condvar,
    /// Signaled when an item leaves or the queue closes; producers and
    /// `wait`/`wait_for_empty` callers block here.
    not_full: Condvar,
    capacity: usize,
}

impl<T> ClosableQueue<T> {
    /// Creates an open queue with the default capacity bound.
    pub fn new() -> ClosableQueue<T> {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates an open queue holding at most `capacity` items.
    pub fn with_capacity(capacity: usize) -> ClosableQueue<T> {
        ClosableQueue {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Appends `value`, blocking while the queue is at capacity.
    ///
    /// Never blocks on a closed queue: pushing after `close` is a producer
    /// error and reports [`ContainerError::Closed`], returning immediately
    /// even if the push was already blocked when the close happened.
    pub fn push(&self, value: T) -> Result<(), ContainerError> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return Err(ContainerError::Closed);
            }
            if inner.items.len() < self.capacity {
                break;
            }
            self.not_full.wait(&mut inner);
        }
        inner.items.push_back(value);
        drop(inner);
        self.not_empty.notify_all();
        Ok(())
    }

    /// Appends `value`, giving up with [`ContainerError::Timeout`] if no
    /// capacity frees up within `timeout`.
    pub fn push_timeout(&self, value: T, timeout: Duration) -> Result<(), ContainerError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return Err(ContainerError::Closed);
            }
            if inner.items.len() < self.capacity {
                break;
            }
            if self.not_full.wait_until(&mut inner, deadline).timed_out() {
                if inner.closed {
                    return Err(ContainerError::Closed);
                }
                if inner.items.len() >= self.capacity {
                    return Err(ContainerError::Timeout);
                }
                break;
            }
        }
        inner.items.push_back(value);
        drop(inner);
        self.not_empty.notify_all();
        Ok(())
    }

    /// Removes the oldest item, blocking while the queue is empty and open.
    ///
    /// Reports [`ContainerError::Closed`] once the queue is closed and
    /// drained. A successful pop wakes one batch of blocked producers.
    pub fn pop(&self) -> Result<T, ContainerError> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(value) = inner.items.pop_front() {
                drop(inner);
                self.not_full.notify_all();
                return Ok(value);
            }
            if inner.closed {
                drop(inner);
                // Keep the shutdown wave moving: another consumer may be
                // blocked in `wait_for_empty` on the same condvar.
                self.not_full.notify_all();
                return Err(ContainerError::Closed);
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Removes the oldest item, giving up with [`ContainerError::Timeout`]
    /// if nothing arrives within `timeout` while the queue stays open, or
    /// [`ContainerError::Closed`] once the queue is closed and drained.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<T, ContainerError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(value) = inner.items.pop_front() {
                drop(inner);
                self.not_full.notify_all();
                return Ok(value);
            }
            if inner.closed {
                drop(inner);
                self.not_full.notify_all();
                return Err(ContainerError::Closed);
            }
            if self.not_empty.wait_until(&mut inner, deadline).timed_out() {
                return match inner.items.pop_front() {
                    Some(value) => {
                        drop(inner);
                        self.not_full.notify_all();
                        Ok(value)
                    }
                    None if inner.closed => Err(ContainerError::Closed),
                    None => Err(ContainerError::Timeout),
                };
            }
        }
    }

    /// Transitions the queue to closed and wakes every blocked producer,
    /// consumer, and waiter. Idempotent.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Enqueues `sentinel` and closes the queue in one critical section, so
    /// a single blocked `pop` is handed the sentinel rather than an error.
    ///
    /// This is the shutdown path for consumers that must be woken exactly
    /// once without a timeout poll. No-op if the queue is already closed.
    pub fn wake_and_close(&self, sentinel: T) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.items.push_back(sentinel);
            inner.closed = true;
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Blocks until the queue is closed.
    pub fn wait(&self) {
        let mut inner = self.inner.lock();
        while !inner.closed {
            self.not_full.wait(&mut inner);
        }
    }

    /// Blocks until the queue is closed and every item has been popped.
    pub fn wait_for_empty(&self) {
        let mut inner = self.inner.lock();
        while !inner.closed || !inner.items.is_empty() {
            self.not_full.wait(&mut inner);
        }
    }

    /// Returns `true` while the queue is open, or closed but not yet
    /// drained.
    pub fn can_receive(&self) -> bool {
        let inner = self.inner.lock();
        !inner.closed || !inner.items.is_empty()
    }

    /// Returns `true` once the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Returns `true` while the queue has not been closed.
    pub fn is_open(&self) -> bool {
        !self.is_closed()
    }

    /// The number of items currently queued.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Returns `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Returns `true` when the queue is at its capacity bound.
    pub fn is_full(&self) -> bool {
        self.inner.lock().items.len() == self.capacity
    }

    /// The capacity bound enforced on push.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drain-to-completion consumption: pops until the queue is closed and
    /// empty, invoking `f` on each item. Blocks between items while the
    /// queue is open.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(T),
    {
        while self.can_receive() {
            match self.pop() {
                Ok(value) => f(value),
                Err(_) => break,
            }
        }
    }
}

impl<T> Default for ClosableQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Container for ClosableQueue<T> {
    fn close(&self) {
        ClosableQueue::close(self);
    }

    fn wait(&self) {
        ClosableQueue::wait(self);
    }

    fn wait_for_empty(&self) {
        ClosableQueue::wait_for_empty(self);
    }

    fn can_receive(&self) -> bool {
        ClosableQueue::can_receive(self)
    }

    fn len(&self) -> usize {
        ClosableQueue::len(self)
    }
}

impl<T: Send + 'static> Drain for ClosableQueue<T> {
    type Item = T;

    fn drain_each(&self, f: &mut dyn FnMut(T)) {
        self.for_each(f);
    }
}

// -----------------------------------------------------------------------------
// Tests
