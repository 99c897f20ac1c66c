use std::sync::Arc;
use std::thread;
use std::time::Duration;

use conflux::prelude::*;

#[test]
fn push_close_pop_accounting() {
    // N pushes then close: exactly N pops succeed and the next one reports
    // the closed container.
    let queue = ClosableQueue::new();
    for i in 0..100 {
        queue.push(i).unwrap();
    }
    queue.close();

    for i in 0..100 {
        assert_eq!(queue.pop().unwrap(), i);
    }
    assert_eq!(queue.pop(), Err(ContainerError::Closed));
}

#[test]
fn two_items_then_closed() {
    let queue = ClosableQueue::new();
    queue.push(1).unwrap();
    queue.push(2).unwrap();
    queue.close();
    assert_eq!(queue.pop().unwrap(), 1);
    assert_eq!(queue.pop().unwrap(), 2);
    assert_eq!(queue.pop(), Err(ContainerError::Closed));
}

#[test]
fn capacity_two_rejects_timed_third_push() {
    let queue = ClosableQueue::with_capacity(2);
    queue.push("a".to_string()).unwrap();
    queue.push("b".to_string()).unwrap();
    assert_eq!(
        queue.push_timeout("c".to_string(), Duration::from_millis(100)),
        Err(ContainerError::Timeout)
    );
    assert_eq!(queue.len(), 2);
}

#[test]
fn timed_pop_distinguishes_open_and_closed() {
    let queue: ClosableQueue<String> = ClosableQueue::with_capacity(2);
    assert_eq!(
        queue.pop_timeout(Duration::from_millis(100)),
        Err(ContainerError::Timeout)
    );

    queue
        .push_timeout("ok".to_string(), Duration::from_millis(100))
        .unwrap();
    assert_eq!(queue.pop_timeout(Duration::from_millis(100)).unwrap(), "ok");

    queue.close();
    assert_eq!(
        queue.pop_timeout(Duration::from_millis(100)),
        Err(ContainerError::Closed)
    );
}

#[test]
fn fifo_order_under_spsc() {
    let queue = Arc::new(ClosableQueue::with_capacity(8));
    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            for i in 0..1_000 {
                queue.push(i).unwrap();
            }
            queue.close();
        })
    };

    let mut expected = 0;
    loop {
        match queue.pop() {
            Ok(value) => {
                assert_eq!(value, expected);
                expected += 1;
            }
            Err(ContainerError::Closed) => break,
            Err(err) => panic!("unexpected pop error: {err}"),
        }
    }
    assert_eq!(expected, 1_000);
    producer.join().unwrap();
}

#[test]
fn full_queue_blocks_until_a_pop_frees_a_slot() {
    let queue = Arc::new(ClosableQueue::with_capacity(4));
    for i in 0..4 {
        queue.push(i).unwrap();
    }

    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.push(99))
    };
    thread::sleep(Duration::from_millis(30));
    assert_eq!(queue.len(), 4);

    assert_eq!(queue.pop().unwrap(), 0);
    producer.join().unwrap().unwrap();
    assert_eq!(queue.len(), 4);
}

#[test]
fn multiple_consumers_split_the_work() {
    let queue = Arc::new(ClosableQueue::new());
    let mut consumers = Vec::new();
    for _ in 0..4 {
        let queue: Arc<ClosableQueue<u32>> = Arc::clone(&queue);
        consumers.push(thread::spawn(move || {
            let mut seen = 0u32;
            queue.for_each(|_| seen += 1);
            seen
        }));
    }

    for i in 0..10_000 {
        queue.push(i).unwrap();
    }
    queue.close();

    let total: u32 = consumers
        .into_iter()
        .map(|consumer| consumer.join().unwrap())
        .sum();
    assert_eq!(total, 10_000);
}
