//! A counting barrier for detecting "all N producers have finished".
//!
//! A [`WaitGroup`] starts at a fixed count; each producer calls
//! [`finish`](WaitGroup::finish) exactly once, and a waiter blocks in
//! [`wait`](WaitGroup::wait) until the count reaches zero. The group is the
//! mechanism that lets a stage size its producer fan-out independently of
//! the pool's thread count: a dedicated closer task waits on the group and
//! only then closes the stage's output.
//!
//! Groups are single-use. Once the count hits zero it stays there; build a
//! fresh group for each barrier.

use std::sync::Arc;

use log::warn;
use parking_lot::{Condvar, Mutex};

// -----------------------------------------------------------------------------
// Wait group

/// A single-use counting barrier.
pub struct WaitGroup {
    count: Mutex<usize>,
    reached_zero: Condvar,
}

impl WaitGroup {
    /// Creates a group expecting `count` completions. A zero-count group
    /// starts open: `wait` returns immediately.
    pub fn new(count: usize) -> WaitGroup {
        WaitGroup {
            count: Mutex::new(count),
            reached_zero: Condvar::new(),
        }
    }

    /// Records one completion, waking all waiters when the count reaches
    /// zero. Completions beyond the initial count are a caller error; they
    /// saturate at zero rather than underflowing.
    pub fn finish(&self) {
        let mut count = self.count.lock();
        match *count {
            0 => {
                drop(count);
                warn!("wait group finished more times than its count");
            }
            1 => {
                *count = 0;
                drop(count);
                self.reached_zero.notify_all();
            }
            _ => *count -= 1,
        }
    }

    /// Blocks until the count reaches zero.
    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.reached_zero.wait(&mut count);
        }
    }

    /// The number of completions still outstanding.
    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Returns a guard that records this holder's completion when dropped.
    ///
    /// Producer tasks hold one of these for their whole body so the
    /// completion is recorded on every exit path, panics included — a
    /// failing producer must never strand the closer task waiting on the
    /// group.
    pub fn guard(self: &Arc<Self>) -> FinishGuard {
        FinishGuard {
            group: Arc::clone(self),
        }
    }
}

/// Calls [`WaitGroup::finish`] exactly once when dropped.
pub struct FinishGuard {
    group: Arc<WaitGroup>,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.group.finish();
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_returns_after_exactly_n_finishes() {
        let group = Arc::new(WaitGroup::new(4));
        let completions = Arc::new(AtomicUsize::new(0));

        let mut producers = Vec::new();
        for _ in 0..4 {
            let group = Arc::clone(&group);
            let completions = Arc::clone(&completions);
            producers.push(thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                completions.fetch_add(1, Ordering::SeqCst);
                group.finish();
            }));
        }

        group.wait();
        assert_eq!(completions.load(Ordering::SeqCst), 4);
        for producer in producers {
            producer.join().unwrap();
        }
    }

    #[test]
    fn zero_count_group_starts_open() {
        let group = WaitGroup::new(0);
        group.wait();
    }

    #[test]
    fn guard_finishes_on_panic() {
        let group = Arc::new(WaitGroup::new(1));
        let guarded = Arc::clone(&group);
        let worker = thread::spawn(move || {
            let _finish = guarded.guard();
            panic!("producer failed");
        });
        assert!(worker.join().is_err());
        group.wait();
        assert_eq!(group.count(), 0);
    }

    #[test]
    fn extra_finish_saturates() {
        let group = WaitGroup::new(1);
        group.finish();
        group.finish();
        assert_eq!(group.count(), 0);
    }
}
