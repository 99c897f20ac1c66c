//! The error taxonomy for the crate. Container operations and pool
//! submissions are the only fallible surfaces; everything else (closing,
//! waiting, draining) is defensive and always completes.

use thiserror::Error;

/// Errors produced by the closable containers.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerError {
    /// The container is closed and holds nothing more to hand out. For a pop
    /// this means the queue was drained after its close; for a push it means
    /// the producer outlived the container's lifecycle.
    #[error("container is closed")]
    Closed,

    /// A timed push or pop ran out its deadline while the container stayed
    /// open. Streaming consumers treat this as a non-fatal signal to re-check
    /// [`can_receive`](crate::container::Container::can_receive).
    #[error("operation timed out")]
    Timeout,
}

/// Errors produced by the worker pool.
#[derive(Error, Debug)]
pub enum PoolError {
    /// Work was submitted after [`Pool::close`](crate::pool::Pool::close).
    #[error("pool is shut down")]
    ShutDown,

    /// A blocking call's task was dropped before it produced a result,
    /// either because the task panicked or because the pool shut down with
    /// the task still queued.
    #[error("task was dropped before producing its result")]
    Canceled,

    /// The operating system refused to start a worker thread.
    #[error("could not spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
