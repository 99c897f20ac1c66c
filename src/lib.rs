//! An in-process concurrency toolkit built around closable containers.
//!
//! Conflux provides a bounded blocking queue and thread-safe associative
//! stores that share a one-way open→closed lifecycle, a counting wait group,
//! and an elastic pool of OS worker threads — and, composed entirely from
//! those parts, a stream-processing pipeline of map, filter, transform,
//! collect, partition, and reduce stages. Backpressure comes from the
//! bounded queues, shutdown from the closing protocol, and fan-out/fan-in
//! synchronization from wait groups; a failing task is isolated to the
//! worker that caught it.
//!
//! The crate is strictly a single-host substrate: no distributed
//! coordination, persistence, or network I/O.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use conflux::prelude::*;
//!
//! let pool = Pool::new();
//! let source = Stage::source(Arc::clone(&pool));
//! let evens = source.filter(2, |value: &u64| value % 2 == 0);
//! let keyed = evens.map_kv(2, |value| (value, value * value));
//!
//! source.stream(0..1_000u64);
//!
//! let count = keyed.reduce(|_, total: &mut u64| *total += 1).unwrap();
//! assert_eq!(count, 500);
//! keyed.close();
//! ```

pub mod container;
pub mod error;
pub mod pool;
pub mod queue;
pub mod stage;
pub mod store;
pub mod task;
pub mod wait_group;

mod util;

pub mod prelude {
    pub use crate::{
        container::{Container, Drain},
        error::{ContainerError, PoolError},
        pool::{Config, Pool},
        queue::ClosableQueue,
        stage::Stage,
        store::{SyncMap, SyncMultiMap},
        wait_group::WaitGroup,
    };
}
