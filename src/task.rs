//! The pool's unit of work.
//!
//! A task is either a deferred closure to execute or the shutdown sentinel
//! the pool enqueues to unblock one worker's pop during close. Typed results
//! are folded into a continuation at construction time, so the pool itself
//! only ever deals in no-result bodies.

// -----------------------------------------------------------------------------
// Task

/// A unit of work queued on a [`Pool`](crate::pool::Pool).
pub enum Task {
    /// A deferred closure, run to completion on a worker thread. The queue
    /// slot owns it exclusively until a worker dequeues and executes it.
    Exec(Box<dyn FnOnce() + Send + 'static>),

    /// Unblocks one worker's blocking pop during shutdown without running
    /// anything.
    Shutdown,
}

impl Task {
    /// Wraps a no-result closure.
    pub fn exec<F>(body: F) -> Task
    where
        F: FnOnce() + Send + 'static,
    {
        Task::Exec(Box::new(body))
    }

    /// Wraps a closure whose result is handed to `continuation`, both
    /// executed back to back on the same worker thread.
    pub fn with_continuation<R, F, K>(body: F, continuation: K) -> Task
    where
        R: 'static,
        F: FnOnce() -> R + Send + 'static,
        K: FnOnce(R) + Send + 'static,
    {
        Task::Exec(Box::new(move || continuation(body())))
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Task::Exec(_) => f.write_str("Task::Exec"),
            Task::Shutdown => f.write_str("Task::Shutdown"),
        }
    }
}
