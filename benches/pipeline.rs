use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use conflux::prelude::*;

fn queue_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue");
    group.throughput(Throughput::Elements(10_000));
    group.bench_function("spsc_10k", |b| {
        b.iter(|| {
            let queue = Arc::new(ClosableQueue::with_capacity(1_024));
            let producer = {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for i in 0..10_000u64 {
                        queue.push(i).unwrap();
                    }
                    queue.close();
                })
            };
            let mut sum = 0u64;
            queue.for_each(|i| sum += i);
            producer.join().unwrap();
            black_box(sum);
        });
    });
    group.finish();
}

fn pipeline_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    group.throughput(Throughput::Elements(10_000));
    group.bench_function("filter_map_reduce_10k", |b| {
        b.iter(|| {
            let pool = Pool::with_config(Config {
                threads: 4,
                ..Config::default()
            });
            let source = Stage::source(Arc::clone(&pool));
            let kept = source.filter(2, |i: &u64| i % 2 == 0);
            let keyed = kept.map_kv(2, |i| (i, i));

            source.stream(0..10_000u64);
            let count = keyed.reduce(|_, count: &mut u64| *count += 1).unwrap();
            black_box(count);
            keyed.close();
        });
    });
    group.finish();
}

criterion_group!(benches, queue_throughput, pipeline_throughput);
criterion_main!(benches);
