extern crate core_affinity;
extern crate env_logger;
extern crate rand;
extern crate rs_lockfree_queue;

use rand::Rng;
use rs_lockfree_queue::lockfree_queue::LockFreeQueue;
use rs_lockfree_queue::util;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time;

fn set_cpu_affinity() {
    if let Some(cpus) = core_affinity::get_core_ids() {
        if !cpus.is_empty() {
            core_affinity::set_for_current(cpus[util::get_thread_id() as usize % cpus.len()]);
        }
    }
}

fn cpu_count() -> usize {
    core_affinity::get_core_ids()
        .map(|cpus| cpus.len())
        .unwrap_or(4)
        .max(2)
        .min(8)
}

struct DropCounter {
    value: i64,
    cnt: Arc<AtomicUsize>,
}

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.cnt.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_single_producer_single_consumer_fifo() {
    let _ = env_logger::try_init();
    let queue = Arc::new(LockFreeQueue::new());
    let loop_cnt = 100_000;

    let producer = {
        let queue = queue.clone();
        thread::spawn(move || {
            set_cpu_affinity();
            for i in 0..loop_cnt {
                queue.enqueue(i);
            }
        })
    };
    let consumer = {
        let queue = queue.clone();
        thread::spawn(move || {
            set_cpu_affinity();
            let mut expect = 0;
            while expect < loop_cnt {
                if let Some(v) = queue.dequeue() {
                    assert_eq!(v, expect);
                    expect += 1;
                }
            }
        })
    };
    producer.join().unwrap();
    consumer.join().unwrap();
    assert!(queue.is_empty());
}

#[test]
fn test_multi_threads() {
    let _ = env_logger::try_init();

    let cpu_count = cpu_count();
    let producer_count = (cpu_count + 1) / 2;
    let consumer_count = cpu_count - producer_count;
    let loop_cnt = 20_000_usize;

    let queue = Arc::new(LockFreeQueue::new());
    let producers_left = Arc::new(AtomicUsize::new(producer_count));

    let producer_threads = (0..producer_count)
        .map(|pid| {
            let queue = queue.clone();
            let producers_left = producers_left.clone();
            thread::spawn(move || {
                set_cpu_affinity();
                for i in 0..loop_cnt {
                    queue.enqueue((pid, i));
                }
                producers_left.fetch_sub(1, Ordering::SeqCst);
            })
        })
        .collect::<Vec<_>>();

    let consumer_threads = (0..consumer_count)
        .map(|_| {
            let queue = queue.clone();
            let producers_left = producers_left.clone();
            thread::spawn(move || {
                set_cpu_affinity();
                let mut got = vec![];
                let mut last_seen = vec![None; producer_count];
                loop {
                    if let Some((pid, i)) = queue.dequeue() {
                        // values of one producer come out in the order it put them in
                        if let Some(last) = last_seen[pid] {
                            assert!(last < i);
                        }
                        last_seen[pid] = Some(i);
                        got.push((pid, i));
                    } else if producers_left.load(Ordering::SeqCst) == 0 {
                        break;
                    }
                }
                got
            })
        })
        .collect::<Vec<_>>();

    for t in producer_threads {
        t.join().unwrap();
    }
    let mut all = consumer_threads
        .into_iter()
        .flat_map(|t| t.join().unwrap())
        .collect::<Vec<_>>();
    while let Some(v) = queue.dequeue() {
        all.push(v);
    }

    all.sort();
    let expect = (0..producer_count)
        .flat_map(|pid| (0..loop_cnt).map(move |i| (pid, i)))
        .collect::<Vec<_>>();
    assert_eq!(all.len(), expect.len());
    assert_eq!(all, expect);
}

#[test]
fn test_stress_trials() {
    let _ = env_logger::try_init();
    let thread_count = 4;
    let op_count = 1000;

    for _ in 0..194 {
        let cnt = Arc::new(AtomicUsize::new(0));
        let produced = Arc::new(AtomicUsize::new(0));
        let queue = Arc::new(LockFreeQueue::new());

        for i in 0..10 {
            queue.enqueue(DropCounter {
                value: i,
                cnt: cnt.clone(),
            });
        }
        for i in 0..10 {
            assert_eq!(queue.dequeue().unwrap().value, i);
        }
        assert!(queue.dequeue().is_none());

        let size = Arc::new(AtomicIsize::new(0));
        let threads = (0..thread_count)
            .map(|tid| {
                let queue = queue.clone();
                let size = size.clone();
                let cnt = cnt.clone();
                let produced = produced.clone();
                thread::spawn(move || {
                    let mut rng = rand::thread_rng();
                    for _ in 0..op_count {
                        if rng.gen::<bool>() || size.load(Ordering::SeqCst) > 100 {
                            queue.enqueue(DropCounter {
                                value: tid,
                                cnt: cnt.clone(),
                            });
                            produced.fetch_add(1, Ordering::SeqCst);
                            size.fetch_add(1, Ordering::SeqCst);
                        } else {
                            size.fetch_sub(1, Ordering::SeqCst);
                            if let Some(v) = queue.dequeue() {
                                assert!(v.value >= 0 && v.value < thread_count);
                            }
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        for t in threads {
            t.join().unwrap();
        }

        match Arc::try_unwrap(queue) {
            Ok(queue) => drop(queue),
            Err(_) => panic!("queue still shared"),
        }
        // every value dropped exactly once, dequeued or drained by drop
        assert_eq!(
            cnt.load(Ordering::SeqCst),
            10 + produced.load(Ordering::SeqCst)
        );
    }
}

#[test]
fn test_slow_producer_does_not_block_others() {
    let _ = env_logger::try_init();
    let queue = Arc::new(LockFreeQueue::new());
    let others_done = Arc::new(AtomicBool::new(false));
    let started = Arc::new(Barrier::new(2));

    let slow = {
        let queue = queue.clone();
        let others_done = others_done.clone();
        let started = started.clone();
        thread::spawn(move || {
            let mut n = 0;
            started.wait();
            loop {
                queue.enqueue(-1);
                n += 1;
                if others_done.load(Ordering::SeqCst) {
                    break n;
                }
                thread::sleep(time::Duration::from_millis(1));
            }
        })
    };

    started.wait();
    let fast = (0..2)
        .map(|_| {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..10_000 {
                    queue.enqueue(i);
                    queue.dequeue();
                }
            })
        })
        .collect::<Vec<_>>();
    for t in fast {
        t.join().unwrap();
    }
    others_done.store(true, Ordering::SeqCst);
    assert!(slow.join().unwrap() > 0);
    assert_eq!(queue.active_operations(), 0);
}
