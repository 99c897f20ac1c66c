use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use conflux::prelude::*;

fn small_pool(threads: usize) -> Arc<Pool> {
    Pool::with_config(Config {
        threads,
        ..Config::default()
    })
}

#[test]
fn map_stage_stores_every_distinct_key() {
    let pool = small_pool(4);
    let source = Stage::source(Arc::clone(&pool));
    let mapped = source.map_kv(1, |i: i64| (i, i));

    source.stream(0..1_000);
    mapped.output().wait();
    assert_eq!(mapped.output().len(), 1_000);
    mapped.close();
}

#[test]
fn filter_then_map_keeps_only_matches() {
    let pool = small_pool(4);
    let source = Stage::source(Arc::clone(&pool));
    let kept = source.filter(1, |i: &i64| *i < 50);
    let mapped = kept.map_kv(1, |i| (i, i));

    source.stream(0..1_000);
    mapped.output().wait();
    assert_eq!(mapped.output().len(), 50);
    mapped.close();
}

#[test]
fn from_iter_reduce_folds_the_source() {
    let pool = small_pool(2);
    let source = Stage::from_iter(Arc::clone(&pool), vec![1, 2, 3, 4]);
    let sum = source.reduce(|i, total: &mut i32| *total += i).unwrap();
    assert_eq!(sum, 10);
    source.close();
}

#[test]
fn transform_is_a_barrier() {
    let pool = small_pool(2);
    let source = Stage::source(Arc::clone(&pool));
    let doubled = source.transform(|i: i32| i * 2);

    source.stream(0..100);
    let sum = doubled.reduce(|i, total: &mut i32| *total += i).unwrap();
    assert_eq!(sum, (0..100).map(|i| i * 2).sum::<i32>());
    doubled.close();
}

#[test]
fn grouped_map_then_collect_flattens_batches() {
    let pool = small_pool(4);
    let source = Stage::source(Arc::clone(&pool));
    let grouped = source.map_kv_grouped(2, |i: i64| (i, i));
    let collected = grouped.collect(|key, value| key + value);

    // Every item twice: 1,000 keys with two values each.
    source.stream((0..1_000).chain(0..1_000));
    let pairs = collected.reduce(|_, count: &mut usize| *count += 1).unwrap();
    assert_eq!(pairs, 2_000);
    collected.close();
}

#[test]
fn partition_reduces_each_key_exactly_once() {
    let pool = small_pool(4);
    let source = Stage::source(Arc::clone(&pool));
    let grouped = source.map_kv_grouped(1, |i: i64| (i % 1_000, i));

    let reductions = Arc::new(AtomicUsize::new(0));
    let partitioned = {
        let reductions = Arc::clone(&reductions);
        grouped.partition(move |_, batch| {
            reductions.fetch_add(1, Ordering::SeqCst);
            batch.len()
        })
    };

    source.stream(0..2_000);
    let group_size_total = partitioned
        .reduce(|size, total: &mut usize| *total += size)
        .unwrap();
    assert_eq!(group_size_total, 2_000);
    assert_eq!(reductions.load(Ordering::SeqCst), 1_000);
    partitioned.close();
}

#[test]
fn concurrent_partition_closes_after_every_reduction() {
    // Two threads only: the partition task, its closer, and the per-key
    // reductions all share the pool, so this exercises nested submission
    // under elastic growth.
    let pool = small_pool(2);
    let source = Stage::source(Arc::clone(&pool));
    let grouped = source.map_kv_grouped(1, |i: i64| (i % 100, i));

    let reductions = Arc::new(AtomicUsize::new(0));
    let partitioned = {
        let reductions = Arc::clone(&reductions);
        grouped.partition_mt(move |_, batch| {
            reductions.fetch_add(1, Ordering::SeqCst);
            batch.len()
        })
    };

    source.stream(0..1_000);
    let group_size_total = partitioned
        .reduce(|size, total: &mut usize| *total += size)
        .unwrap();
    assert_eq!(group_size_total, 1_000);
    assert_eq!(reductions.load(Ordering::SeqCst), 100);
    partitioned.close();
}

#[test]
fn fan_out_processes_every_record() {
    #[derive(Clone)]
    struct Record {
        id: i64,
        flagged: bool,
    }

    let records: Vec<Record> = (0..10_000)
        .map(|i| Record {
            id: i,
            flagged: i % 2 == 0,
        })
        .collect();

    let pool = small_pool(4);
    let source = Stage::from_iter(Arc::clone(&pool), records);
    let kept = source.filter(4, |record: &Record| record.flagged);
    let mapped = kept.map_kv(4, |record| (record.id, record));

    mapped.output().wait();
    assert_eq!(mapped.output().len(), 5_000);

    let count = mapped.reduce(|_, count: &mut usize| *count += 1).unwrap();
    assert_eq!(count, 5_000);
    mapped.close();
}

#[test]
fn streaming_loops_survive_replica_panics() {
    // One of two map replicas panics on a poisoned item. The panic is
    // caught by the pool, the replica's wait-group slot is released by its
    // guard, and the closer still closes the store.
    let pool = small_pool(4);
    pool.set_panic_handler(|_| {});

    let source = Stage::source(Arc::clone(&pool));
    let mapped = source.map_kv(2, |i: i64| {
        if i == 13 {
            panic!("poisoned item");
        }
        (i, i)
    });

    source.stream(0..100);
    mapped.output().wait();
    // The surviving replica drains everything the dead one left behind;
    // only the poisoned item itself is lost.
    assert_eq!(mapped.output().len(), 99);
    assert!(mapped.output().is_closed());
    mapped.close();
}
