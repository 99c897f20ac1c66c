use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

// -----------------------------------------------------------------------------
// One-shot blocking promise

// The write half of a one-shot result cell. Fulfilling it (or dropping it
// unfulfilled) wakes the thread blocked on the matching `PromiseHandle`.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
    fulfilled: bool,
}

// The read half; blocks until the promise resolves one way or the other.
pub struct PromiseHandle<T> {
    shared: Arc<Shared<T>>,
}

/// Reported by `PromiseHandle::block` when the promise was dropped without
/// being fulfilled — the task panicked or never ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromiseDropped;

enum State<T> {
    Pending,
    Fulfilled(T),
    Dropped,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    resolved: Condvar,
}

/// Creates a connected promise/handle pair.
pub fn promise<T>() -> (Promise<T>, PromiseHandle<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::Pending),
        resolved: Condvar::new(),
    });
    (
        Promise {
            shared: Arc::clone(&shared),
            fulfilled: false,
        },
        PromiseHandle { shared },
    )
}

impl<T> Promise<T> {
    /// Resolves the promise with `value`, waking the blocked handle.
    pub fn fulfill(mut self, value: T) {
        {
            let mut state = self.shared.state.lock();
            *state = State::Fulfilled(value);
        }
        self.fulfilled = true;
        self.shared.resolved.notify_all();
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if self.fulfilled {
            return;
        }
        // The owning task panicked or was discarded; wake the handle so the
        // caller is never left blocked on a result that cannot arrive.
        {
            let mut state = self.shared.state.lock();
            *state = State::Dropped;
        }
        self.shared.resolved.notify_all();
    }
}

impl<T> PromiseHandle<T> {
    /// Blocks until the promise resolves, returning the fulfilled value or
    /// `PromiseDropped` if the write half was dropped first.
    pub fn block(self) -> Result<T, PromiseDropped> {
        let mut state = self.shared.state.lock();
        loop {
            match std::mem::replace(&mut *state, State::Pending) {
                State::Fulfilled(value) => return Ok(value),
                State::Dropped => return Err(PromiseDropped),
                State::Pending => self.shared.resolved.wait(&mut state),
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fulfilled_promise_delivers_value() {
        let (promise, handle) = promise();
        let producer = thread::spawn(move || promise.fulfill(42));
        assert_eq!(handle.block(), Ok(42));
        producer.join().unwrap();
    }

    #[test]
    fn dropped_promise_unblocks_handle() {
        let (promise, handle) = promise::<i32>();
        drop(promise);
        assert_eq!(handle.block(), Err(PromiseDropped));
    }
}
