//! An elastic pool of OS worker threads draining one shared task queue.
//!
//! Workers pop with a timeout so they can observe the running flag, execute
//! each task under a panic guard, and keep looping — one task's failure
//! never terminates its worker or the pool. Shutdown is cooperative and
//! idempotent: `close` clears the running flag, unblocks every worker, and
//! joins all threads.
//!
//! The pool grows elastically: when a submission finds little idle headroom
//! it spawns additional workers first. This matters for nested submission —
//! a task running *on* the pool that enqueues more work onto the same pool
//! (stage composition does this constantly) must never find every thread
//! occupied by tasks that are themselves blocked waiting for the new work.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_utils::CachePadded;
use log::{error, trace};
use parking_lot::Mutex;

use crate::error::PoolError;
use crate::queue::{ClosableQueue, DEFAULT_CAPACITY};
use crate::task::Task;
use crate::util::promise;

/// How long a worker blocks in one pop before re-checking the running flag.
const WORKER_POLL: Duration = Duration::from_secs(1);

/// Handles the payload of a panicking task. Installed per pool; the default
/// logs the payload at error level.
pub type PanicHandler = dyn Fn(Box<dyn Any + Send>) + Send + Sync;

// -----------------------------------------------------------------------------
// Configuration

/// Construction-time configuration for a [`Pool`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Initial worker-thread count. Defaults to the hardware concurrency.
    pub threads: usize,
    /// Capacity bound of the shared task queue.
    pub queue_capacity: usize,
    /// Whether submissions may grow the pool when idle headroom runs low.
    pub elastic: bool,
    /// The idle-thread headroom at or below which a submission grows the
    /// pool first.
    pub growth_headroom: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            threads: num_cpus::get(),
            queue_capacity: DEFAULT_CAPACITY,
            elastic: true,
            growth_headroom: 2,
        }
    }
}

// -----------------------------------------------------------------------------
// Pool

/// State shared between the pool handle and its worker threads.
struct Shared {
    /// The task queue every worker drains.
    queue: ClosableQueue<Task>,
    /// Cleared exactly once, by the first `close` call.
    running: CachePadded<AtomicBool>,
    /// Tasks submitted but not yet finished. Subtracted from the thread
    /// count to estimate idle headroom for elastic growth.
    in_flight: CachePadded<AtomicUsize>,
    /// Invoked with the payload of every caught task panic.
    panic_handler: Mutex<Option<Arc<PanicHandler>>>,
}

impl Shared {
    fn run_job(&self, job: Box<dyn FnOnce() + Send>) {
        let result = panic::catch_unwind(AssertUnwindSafe(job));
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        if let Err(payload) = result {
            self.report_panic(payload);
        }
    }

    fn report_panic(&self, payload: Box<dyn Any + Send>) {
        // Take a clone of the handler rather than holding the lock across
        // the call; the handler may touch the pool.
        let handler = self.panic_handler.lock().clone();
        match handler {
            Some(handler) => handler(payload),
            None => error!("pool task panicked: {}", panic_message(&payload)),
        }
    }
}

/// An elastic set of worker threads draining one shared task queue.
///
/// A pool owns its threads exclusively and never shares them with another
/// pool. Cloning the `Arc` handle shares the pool; the last holder's drop
/// closes it.
///
/// `close` (and therefore `drop` of the last handle) joins worker threads
/// and must not be called from a task running on this pool; a worker that
/// does end up closing the pool detaches its own thread instead of joining
/// it.
pub struct Pool {
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    config: Config,
    next_thread_id: AtomicUsize,
}

impl Pool {
    /// Creates a pool with the default configuration: one worker per
    /// hardware thread, elastic growth enabled.
    pub fn new() -> Arc<Pool> {
        Self::with_config(Config::default())
    }

    /// Creates a pool sized by `config`.
    pub fn with_config(config: Config) -> Arc<Pool> {
        let shared = Arc::new(Shared {
            queue: ClosableQueue::with_capacity(config.queue_capacity),
            running: CachePadded::new(AtomicBool::new(true)),
            in_flight: CachePadded::new(AtomicUsize::new(0)),
            panic_handler: Mutex::new(None),
        });

        let pool = Arc::new(Pool {
            shared,
            threads: Mutex::new(Vec::new()),
            config,
            next_thread_id: AtomicUsize::new(0),
        });

        {
            let mut threads = pool.threads.lock();
            for _ in 0..pool.config.threads {
                match pool.spawn_worker() {
                    Ok(handle) => threads.push(handle),
                    Err(err) => error!("could not spawn pool worker: {err}"),
                }
            }
        }

        pool
    }

    /// Returns `true` until the first `close` call.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// The number of threads owned by the pool, workers and dedicated
    /// spawned threads alike.
    pub fn size(&self) -> usize {
        self.threads.lock().len()
    }

    /// Tasks submitted but not yet finished.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Relaxed)
    }

    /// Installs the handler invoked with the payload of every caught task
    /// panic. Replaces any previous handler.
    pub fn set_panic_handler<H>(&self, handler: H)
    where
        H: Fn(Box<dyn Any + Send>) + Send + Sync + 'static,
    {
        *self.shared.panic_handler.lock() = Some(Arc::new(handler));
    }

    /// Enqueues one task.
    pub fn send<F>(&self, body: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Task::exec(body))
    }

    /// Enqueues `replicas` tasks sharing one body — the fan-out primitive
    /// behind stage replica loops.
    pub fn send_replicated<F>(&self, replicas: usize, body: F) -> Result<(), PoolError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let body = Arc::new(body);
        for _ in 0..replicas {
            let body = Arc::clone(&body);
            self.submit(Task::exec(move || (*body)()))?;
        }
        Ok(())
    }

    /// Enqueues a task whose result is handed to `continuation` on the same
    /// worker thread.
    pub fn send_with<R, F, K>(&self, body: F, continuation: K) -> Result<(), PoolError>
    where
        R: 'static,
        F: FnOnce() -> R + Send + 'static,
        K: FnOnce(R) + Send + 'static,
    {
        self.submit(Task::with_continuation(body, continuation))
    }

    /// Enqueues `body` and blocks the calling thread until it completes,
    /// returning its result.
    ///
    /// Reports [`PoolError::Canceled`] when the task panicked or the pool
    /// shut down before running it.
    pub fn call<R, F>(&self, body: F) -> Result<R, PoolError>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (result, handle) = promise();
        self.send(move || result.fulfill(body()))?;
        handle.block().map_err(|_| PoolError::Canceled)
    }

    /// Enqueues an already-built [`Task`].
    pub fn submit(&self, task: Task) -> Result<(), PoolError> {
        if !self.is_running() {
            return Err(PoolError::ShutDown);
        }
        self.ensure_headroom();
        self.shared.in_flight.fetch_add(1, Ordering::Relaxed);
        if self.shared.queue.push(task).is_err() {
            self.shared.in_flight.fetch_sub(1, Ordering::Relaxed);
            return Err(PoolError::ShutDown);
        }
        Ok(())
    }

    /// Starts `body` on its own dedicated thread, outside the shared task
    /// queue. The thread is joined by `close` like any worker. Meant for
    /// long-lived loop bodies that would otherwise occupy a queue worker
    /// for the pool's whole lifetime.
    pub fn spawn<F>(&self, body: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.is_running() {
            return Err(PoolError::ShutDown);
        }
        let shared = Arc::clone(&self.shared);
        let id = self.next_thread_id.fetch_add(1, Ordering::Relaxed);
        let handle = thread::Builder::new()
            .name(format!("conflux-spawn-{id}"))
            .spawn(move || {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(body)) {
                    shared.report_panic(payload);
                }
            })?;
        self.threads.lock().push(handle);
        Ok(())
    }

    /// Adds `added` worker threads, returning the new pool size.
    pub fn grow(&self, added: usize) -> usize {
        let mut threads = self.threads.lock();
        if !self.is_running() {
            return threads.len();
        }
        for _ in 0..added {
            match self.spawn_worker() {
                Ok(handle) => threads.push(handle),
                Err(err) => error!("could not grow pool: {err}"),
            }
        }
        threads.len()
    }

    /// Shuts the pool down: clears the running flag, unblocks every worker
    /// (one shutdown sentinel per thread, then a queue close as backstop),
    /// and joins all threads. Idempotent, never blocks on a full queue, and
    /// never panics. No-op when the pool owns no threads.
    pub fn close(&self) {
        self.shared.running.store(false, Ordering::Release);

        let mut threads = self.threads.lock();
        if threads.is_empty() {
            self.shared.queue.close();
            return;
        }

        for _ in 0..threads.len() {
            if self
                .shared
                .queue
                .push_timeout(Task::Shutdown, Duration::ZERO)
                .is_err()
            {
                break;
            }
        }
        self.shared.queue.close();

        let current = thread::current().id();
        for handle in threads.drain(..) {
            // A worker that ends up running `close` cannot join itself; its
            // handle is detached instead.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("pool thread panicked during shutdown");
            }
        }
    }

    /// Grows the pool when a submission would leave too little idle
    /// headroom. Best-effort: if another thread is resizing or closing, the
    /// submission proceeds without growing.
    fn ensure_headroom(&self) {
        if !self.config.elastic {
            return;
        }
        let Some(mut threads) = self.threads.try_lock() else {
            return;
        };
        if !self.is_running() {
            return;
        }
        let busy = self.shared.in_flight.load(Ordering::Relaxed);
        let idle = threads.len().saturating_sub(busy);
        if idle > self.config.growth_headroom {
            return;
        }
        let wanted = busy + self.config.growth_headroom + 1;
        for _ in threads.len()..wanted {
            match self.spawn_worker() {
                Ok(handle) => threads.push(handle),
                Err(err) => {
                    error!("could not grow pool: {err}");
                    break;
                }
            }
        }
    }

    fn spawn_worker(&self) -> std::io::Result<JoinHandle<()>> {
        let shared = Arc::clone(&self.shared);
        let id = self.next_thread_id.fetch_add(1, Ordering::Relaxed);
        thread::Builder::new()
            .name(format!("conflux-worker-{id}"))
            .spawn(move || worker_loop(&shared))
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.close();
    }
}

// -----------------------------------------------------------------------------
// Worker loop

/// One worker: `Idle → Executing(task) → Idle`, looping until the pool
/// stops. A timed pop bounds how long a worker can miss the running flag;
/// the shutdown sentinel and the queue close both terminate the loop.
fn worker_loop(shared: &Shared) {
    trace!("worker starting");
    loop {
        match shared.queue.pop_timeout(WORKER_POLL) {
            Ok(Task::Exec(job)) => shared.run_job(job),
            Ok(Task::Shutdown) => break,
            Err(crate::error::ContainerError::Closed) => break,
            Err(crate::error::ContainerError::Timeout) => {
                if !shared.running.load(Ordering::Acquire) && shared.queue.is_empty() {
                    break;
                }
            }
        }
    }
    trace!("worker exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

// -----------------------------------------------------------------------------
// Tests
