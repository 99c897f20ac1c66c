//! Composable stream-processing stages.
//!
//! A [`Stage`] wires three things together: a view of an input container
//! (usually the upstream stage's output), a freshly created output container
//! it owns, and a shared [`Pool`] handle. Constructing an operator
//! immediately enqueues its body task(s) on the pool — there is no separate
//! start step. Data flows from container to container through pool-dispatched
//! tasks; control flows from the application, which pushes items and then
//! closes the source, and terminates when every stage's output has closed.
//!
//! Every output container has exactly one logical closer. For streaming
//! operators (map, filter) that closer is a dedicated task waiting on a
//! [`WaitGroup`] sized to the operator's replica count, so the close
//! happens-after every producer replica has finished — replicas record
//! completion through a guard, panics included. Barrier operators (transform,
//! collect, partition, reduce) block on the upstream close instead and close
//! their own output when the drain completes.
//!
//! Fan-out forfeits ordering: with more than one replica, the relative order
//! of items across replicas is not preserved.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::container::{Container, Drain};
use crate::error::{ContainerError, PoolError};
use crate::pool::Pool;
use crate::queue::ClosableQueue;
use crate::store::{SyncMap, SyncMultiMap};
use crate::wait_group::WaitGroup;

/// How long a streaming replica blocks in one pop before re-checking its
/// input's lifecycle. Timeouts are non-fatal; they just bound the wait.
const STAGE_POLL: Duration = Duration::from_millis(500);

// -----------------------------------------------------------------------------
// Stage

/// One operator in a stream-processing graph.
///
/// The stage owns its output container and holds non-owning handles to its
/// input and to the shared pool. Stages are always handled through `Arc`, and
/// the task closures they enqueue capture only the reference-counted
/// container handles they need — never the stage itself.
pub struct Stage<I, O> {
    input: Arc<I>,
    output: Arc<O>,
    pool: Arc<Pool>,
}

impl<I, O> Stage<I, O>
where
    I: Container,
    O: Container,
{
    /// The container this stage consumes.
    pub fn input(&self) -> Arc<I> {
        Arc::clone(&self.input)
    }

    /// The container this stage produces into.
    pub fn output(&self) -> Arc<O> {
        Arc::clone(&self.output)
    }

    /// The pool the stage graph dispatches onto.
    pub fn pool(&self) -> Arc<Pool> {
        Arc::clone(&self.pool)
    }

    /// Blocks until this stage's output is closed, then shuts the shared
    /// pool down. Call on the terminal stage once the source is closed.
    pub fn close(&self) {
        self.output.wait();
        self.pool.close();
    }

    /// Blocks until this stage's output is closed *and* drained, then shuts
    /// the shared pool down.
    pub fn wait_drained(&self) {
        self.output.wait_for_empty();
        self.pool.close();
    }
}

// -----------------------------------------------------------------------------
// Sources

impl<T: Send + 'static> Stage<ClosableQueue<T>, ClosableQueue<T>> {
    /// Creates a source stage: a stage whose input and output are the same
    /// queue. Feed it with [`stream`](Stage::stream) and hang operators off
    /// it.
    pub fn source(pool: Arc<Pool>) -> Arc<Self> {
        Self::source_with_capacity(pool, crate::queue::DEFAULT_CAPACITY)
    }

    /// A source stage with an explicit queue capacity bound.
    pub fn source_with_capacity(pool: Arc<Pool>, capacity: usize) -> Arc<Self> {
        let queue = Arc::new(ClosableQueue::with_capacity(capacity));
        Arc::new(Stage {
            input: Arc::clone(&queue),
            output: queue,
            pool,
        })
    }

    /// A source whose feed loop runs as a pool task: every element of
    /// `items` is pushed and the input is then closed.
    pub fn from_iter<C>(pool: Arc<Pool>, items: C) -> Arc<Self>
    where
        C: IntoIterator<Item = T> + Send + 'static,
    {
        let stage = Self::source(pool);
        let input = Arc::clone(&stage.input);
        let sent = stage.pool.send(move || {
            for item in items {
                if input.push(item).is_err() {
                    debug!("source stage: input closed while streaming");
                    break;
                }
            }
            input.close();
        });
        if sent.is_err() {
            warn!("source feed task rejected; pool is shut down");
            stage.input.close();
        }
        stage
    }

    /// Pushes every element of `items` into this stage's input, then closes
    /// it. The close is what releases downstream barrier stages.
    pub fn stream<C>(&self, items: C)
    where
        C: IntoIterator<Item = T>,
    {
        for item in items {
            if self.input.push(item).is_err() {
                debug!("source stage: input closed while streaming");
                break;
            }
        }
        self.input.close();
    }
}

// -----------------------------------------------------------------------------
// Streaming operators

impl<I, T> Stage<I, ClosableQueue<T>>
where
    I: Container,
    T: Send + 'static,
{
    /// A streaming key/value map into a unique-key store: `replicas` tasks
    /// pop from this stage's output, apply `f`, and insert the resulting
    /// pair. The store closes once every replica has finished.
    pub fn map_kv<K, V, F>(
        &self,
        replicas: usize,
        f: F,
    ) -> Arc<Stage<ClosableQueue<T>, SyncMap<K, V>>>
    where
        K: Ord + Send + 'static,
        V: Send + 'static,
        F: Fn(T) -> (K, V) + Send + Sync + 'static,
    {
        let stage = Arc::new(Stage {
            input: Arc::clone(&self.output),
            output: Arc::new(SyncMap::new()),
            pool: Arc::clone(&self.pool),
        });
        let input = Arc::clone(&stage.input);
        let output = Arc::clone(&stage.output);
        spawn_replicated(&self.pool, replicas, Arc::clone(&stage.output), move || {
            while input.can_receive() {
                match input.pop_timeout(STAGE_POLL) {
                    Ok(item) => {
                        let (key, value) = f(item);
                        output.insert(key, value);
                    }
                    Err(ContainerError::Timeout) => {}
                    Err(ContainerError::Closed) => {
                        debug!("map stage: input closed");
                        break;
                    }
                }
            }
        });
        stage
    }

    /// Like [`map_kv`](Stage::map_kv), but into a multi-key store so
    /// repeated keys accumulate batches — the input side of a partition.
    pub fn map_kv_grouped<K, V, F>(
        &self,
        replicas: usize,
        f: F,
    ) -> Arc<Stage<ClosableQueue<T>, SyncMultiMap<K, V>>>
    where
        K: Ord + Send + 'static,
        V: Send + 'static,
        F: Fn(T) -> (K, V) + Send + Sync + 'static,
    {
        let stage = Arc::new(Stage {
            input: Arc::clone(&self.output),
            output: Arc::new(SyncMultiMap::new()),
            pool: Arc::clone(&self.pool),
        });
        let input = Arc::clone(&stage.input);
        let output = Arc::clone(&stage.output);
        spawn_replicated(&self.pool, replicas, Arc::clone(&stage.output), move || {
            while input.can_receive() {
                match input.pop_timeout(STAGE_POLL) {
                    Ok(item) => {
                        let (key, value) = f(item);
                        output.insert(key, value);
                    }
                    Err(ContainerError::Timeout) => {}
                    Err(ContainerError::Closed) => {
                        debug!("map stage: input closed");
                        break;
                    }
                }
            }
        });
        stage
    }

    /// A streaming filter: `replicas` tasks pop from this stage's output and
    /// forward the items `predicate` accepts.
    pub fn filter<P>(
        &self,
        replicas: usize,
        predicate: P,
    ) -> Arc<Stage<ClosableQueue<T>, ClosableQueue<T>>>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let stage = Arc::new(Stage {
            input: Arc::clone(&self.output),
            output: Arc::new(ClosableQueue::new()),
            pool: Arc::clone(&self.pool),
        });
        let input = Arc::clone(&stage.input);
        let output = Arc::clone(&stage.output);
        spawn_replicated(&self.pool, replicas, Arc::clone(&stage.output), move || {
            while input.can_receive() {
                match input.pop_timeout(STAGE_POLL) {
                    Ok(item) => {
                        if predicate(&item) && output.push(item).is_err() {
                            debug!("filter stage: output closed early");
                            break;
                        }
                    }
                    Err(ContainerError::Timeout) => {}
                    Err(ContainerError::Closed) => {
                        debug!("filter stage: input closed");
                        break;
                    }
                }
            }
        });
        stage
    }

    /// A barrier transform: a single task waits for this stage's output to
    /// fully close, then drains it through `f` into a fresh queue. Unlike
    /// the streaming operators, nothing is produced until the upstream has
    /// finished.
    pub fn transform<U, F>(&self, f: F) -> Arc<Stage<ClosableQueue<T>, ClosableQueue<U>>>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let stage = Arc::new(Stage {
            input: Arc::clone(&self.output),
            output: Arc::new(ClosableQueue::new()),
            pool: Arc::clone(&self.pool),
        });
        let input = Arc::clone(&stage.input);
        let output = Arc::clone(&stage.output);
        spawn_barrier(&self.pool, Arc::clone(&stage.output), move || {
            input.wait();
            input.drain_each(&mut |item| {
                if output.push(f(item)).is_err() {
                    debug!("transform stage: output closed early");
                }
            });
            output.close();
        });
        stage
    }
}

// -----------------------------------------------------------------------------
// Store-input operators

impl<I, K, V> Stage<I, SyncMap<K, V>>
where
    I: Container,
    K: Ord + Send + 'static,
    V: Send + 'static,
{
    /// A barrier collect over a unique-key store: waits for the store to
    /// close, then drains every pair through `f` into a fresh queue.
    pub fn collect<U, F>(&self, f: F) -> Arc<Stage<SyncMap<K, V>, ClosableQueue<U>>>
    where
        U: Send + 'static,
        F: Fn(K, V) -> U + Send + Sync + 'static,
    {
        let stage = Arc::new(Stage {
            input: Arc::clone(&self.output),
            output: Arc::new(ClosableQueue::new()),
            pool: Arc::clone(&self.pool),
        });
        let input = Arc::clone(&stage.input);
        let output = Arc::clone(&stage.output);
        spawn_barrier(&self.pool, Arc::clone(&stage.output), move || {
            input.wait();
            input.drain_each(&mut |(key, value)| {
                if output.push(f(key, value)).is_err() {
                    debug!("collect stage: output closed early");
                }
            });
            output.close();
        });
        stage
    }
}

impl<I, K, V> Stage<I, SyncMultiMap<K, V>>
where
    I: Container,
    K: Ord + Send + 'static,
    V: Send + 'static,
{
    /// A barrier collect over a multi-key store: waits for the store to
    /// close, then drains every key/value pair (batches flattened) through
    /// `f` into a fresh queue.
    pub fn collect<U, F>(&self, f: F) -> Arc<Stage<SyncMultiMap<K, V>, ClosableQueue<U>>>
    where
        K: Clone,
        U: Send + 'static,
        F: Fn(K, V) -> U + Send + Sync + 'static,
    {
        let stage = Arc::new(Stage {
            input: Arc::clone(&self.output),
            output: Arc::new(ClosableQueue::new()),
            pool: Arc::clone(&self.pool),
        });
        let input = Arc::clone(&stage.input);
        let output = Arc::clone(&stage.output);
        spawn_barrier(&self.pool, Arc::clone(&stage.output), move || {
            input.wait();
            input.drain_each(&mut |(key, value)| {
                if output.push(f(key, value)).is_err() {
                    debug!("collect stage: output closed early");
                }
            });
            output.close();
        });
        stage
    }

    /// Groups the store by key once it closes and runs `reducer` inline,
    /// once per key with the key's full value batch, pushing one result per
    /// key. Inherently sequential across keys.
    pub fn partition<R, F>(
        &self,
        reducer: F,
    ) -> Arc<Stage<SyncMultiMap<K, V>, ClosableQueue<R>>>
    where
        R: Send + 'static,
        F: Fn(K, Vec<V>) -> R + Send + Sync + 'static,
    {
        let stage = Arc::new(Stage {
            input: Arc::clone(&self.output),
            output: Arc::new(ClosableQueue::new()),
            pool: Arc::clone(&self.pool),
        });
        let input = Arc::clone(&stage.input);
        let output = Arc::clone(&stage.output);
        spawn_barrier(&self.pool, Arc::clone(&stage.output), move || {
            input.wait();
            input.aggregate(|key, batch| {
                if output.push(reducer(key, batch)).is_err() {
                    debug!("partition stage: output closed early");
                }
            });
            output.close();
        });
        stage
    }

    /// The concurrent partition: each per-key reduction is dispatched back
    /// onto the shared pool, parallelizing across keys while preserving
    /// one-reduction-per-key. The output closes only after every dispatched
    /// reduction has landed — a trailing closer waits on a [`WaitGroup`]
    /// sized to the key count.
    pub fn partition_mt<R, F>(
        &self,
        reducer: F,
    ) -> Arc<Stage<SyncMultiMap<K, V>, ClosableQueue<R>>>
    where
        R: Send + 'static,
        F: Fn(K, Vec<V>) -> R + Send + Sync + 'static,
    {
        let stage = Arc::new(Stage {
            input: Arc::clone(&self.output),
            output: Arc::new(ClosableQueue::new()),
            pool: Arc::clone(&self.pool),
        });
        let input = Arc::clone(&stage.input);
        let output = Arc::clone(&stage.output);
        let pool = Arc::clone(&self.pool);
        let reducer = Arc::new(reducer);
        spawn_barrier(&self.pool, Arc::clone(&stage.output), move || {
            input.wait();
            let mut groups = Vec::new();
            input.aggregate(|key, batch| groups.push((key, batch)));

            let group = Arc::new(WaitGroup::new(groups.len()));
            for (key, batch) in groups {
                let reducer = Arc::clone(&reducer);
                let output = Arc::clone(&output);
                let finish = Arc::clone(&group);
                let sent = pool.send(move || {
                    let _finish = finish.guard();
                    if output.push((*reducer)(key, batch)).is_err() {
                        debug!("partition stage: output closed early");
                    }
                });
                if sent.is_err() {
                    warn!("partition reduction rejected; pool is shut down");
                    group.finish();
                }
            }

            let closer_output = Arc::clone(&output);
            let sent = pool.send(move || {
                group.wait();
                closer_output.close();
            });
            if sent.is_err() {
                warn!("partition closer rejected; closing output immediately");
                output.close();
            }
        });
        stage
    }
}

// -----------------------------------------------------------------------------
// Terminal reduce

impl<I, O> Stage<I, O>
where
    I: Container,
    O: Drain,
{
    /// The terminal fold: a pool task waits for this stage's output to
    /// close, drains it into an accumulator with `fold`, and hands the
    /// accumulator back to the calling thread, which blocks until then.
    ///
    /// This is the one operator that returns a value instead of a new stage.
    pub fn reduce<A, F>(&self, fold: F) -> Result<A, PoolError>
    where
        A: Default + Send + 'static,
        F: Fn(O::Item, &mut A) + Send + Sync + 'static,
    {
        let output = Arc::clone(&self.output);
        self.pool.call(move || {
            output.wait();
            let mut accumulator = A::default();
            output.drain_each(&mut |item| fold(item, &mut accumulator));
            accumulator
        })
    }
}

// -----------------------------------------------------------------------------
// Task wiring

/// Enqueues `replicas` copies of a streaming loop body plus the dedicated
/// closer task that closes `output` once every replica has finished.
///
/// The completion policy: the wait group counts replica *tasks* — never
/// items or threads — and each replica records its completion through a
/// drop guard, so a panicking replica can never strand the closer.
fn spawn_replicated<O, F>(pool: &Arc<Pool>, replicas: usize, output: Arc<O>, body: F)
where
    O: Container,
    F: Fn() + Send + Sync + 'static,
{
    let group = Arc::new(WaitGroup::new(replicas));
    let shared_body = Arc::new(body);
    for _ in 0..replicas {
        let body = Arc::clone(&shared_body);
        let finish = Arc::clone(&group);
        let sent = pool.send(move || {
            let _finish = finish.guard();
            (*body)();
        });
        if sent.is_err() {
            warn!("stage replica rejected; pool is shut down");
            group.finish();
        }
    }

    let closer_output = Arc::clone(&output);
    let sent = pool.send(move || {
        group.wait();
        closer_output.close();
    });
    if sent.is_err() {
        warn!("stage closer rejected; closing output immediately");
        output.close();
    }
}

/// Enqueues a single barrier task. If the pool refuses it, the stage's
/// output is closed on the spot so downstream consumers observe a
/// deterministic shutdown instead of hanging.
fn spawn_barrier<O, F>(pool: &Arc<Pool>, output: Arc<O>, task: F)
where
    O: Container,
    F: FnOnce() + Send + 'static,
{
    if pool.send(task).is_err() {
        warn!("stage task rejected; pool is shut down");
        output.close();
    }
}
