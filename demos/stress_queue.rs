extern crate core_affinity;
extern crate env_logger;
#[macro_use]
extern crate log;
extern crate rand;
extern crate rs_lockfree_queue;

use rand::Rng;
use rs_lockfree_queue::domain;
use rs_lockfree_queue::lockfree_queue::LockFreeQueue;
use rs_lockfree_queue::util;
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time;
use std::time::SystemTime;

const TRIALS: usize = 194;
const THREADS: usize = 4;
const OPS_PER_THREAD: usize = 1000;
const SIZE_CAP: isize = 100;

struct GlobalControl {
    queue: LockFreeQueue<i64>,
    size: AtomicIsize,
    producer_cnt: AtomicUsize,
    produced: AtomicUsize,
    consumed: AtomicUsize,
}

fn set_cpu_affinity() {
    if let Some(cpus) = core_affinity::get_core_ids() {
        if !cpus.is_empty() {
            let idx = util::get_thread_id() as usize % cpus.len();
            core_affinity::set_for_current(cpus[idx]);
            debug!("set_cpu_affinity {} {}", util::get_thread_id(), idx);
        }
    }
}

/// Four threads each flip a coin per step: enqueue, or dequeue unless the queue looks too big.
fn run_trial() {
    let queue = LockFreeQueue::new();
    for i in 0..10 {
        queue.enqueue(i);
    }
    for i in 0..10 {
        assert_eq!(queue.dequeue(), Some(i));
    }
    assert_eq!(queue.dequeue(), None);

    let global_control = Arc::new(GlobalControl {
        queue,
        size: AtomicIsize::new(0),
        producer_cnt: AtomicUsize::new(0),
        produced: AtomicUsize::new(0),
        consumed: AtomicUsize::new(0),
    });
    let threads = (0..THREADS)
        .map(|v| {
            let global_control = global_control.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..OPS_PER_THREAD {
                    if rng.gen::<bool>() || global_control.size.load(Ordering::SeqCst) > SIZE_CAP {
                        global_control.queue.enqueue(v as i64);
                        global_control.size.fetch_add(1, Ordering::SeqCst);
                        global_control.produced.fetch_add(1, Ordering::Relaxed);
                    } else {
                        global_control.size.fetch_sub(1, Ordering::SeqCst);
                        if global_control.queue.dequeue().is_some() {
                            global_control.consumed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect::<Vec<_>>();
    for t in threads {
        t.join().unwrap();
    }
    let mut left = 0;
    while global_control.queue.dequeue().is_some() {
        left += 1;
    }
    assert_eq!(
        global_control.produced.load(Ordering::Relaxed),
        global_control.consumed.load(Ordering::Relaxed) + left
    );
}

/// Half the cores produce, half consume, until `loop_cnt` values per producer went through.
fn run_throughput(loop_cnt: usize) {
    let cpu_count = core_affinity::get_core_ids()
        .map(|cpus| cpus.len())
        .unwrap_or(2)
        .max(2);
    let producer_count = (cpu_count + 1) / 2;
    let consumer_count = cpu_count - producer_count;
    info!(
        "producer_count {} consumer_count {} loop_cnt {}",
        producer_count, consumer_count, loop_cnt
    );

    let global_control = Arc::new(GlobalControl {
        queue: LockFreeQueue::new(),
        size: AtomicIsize::new(0),
        producer_cnt: AtomicUsize::new(producer_count),
        produced: AtomicUsize::new(0),
        consumed: AtomicUsize::new(0),
    });

    let watch_thread = {
        let global_control = global_control.clone();
        thread::spawn(move || {
            while global_control.producer_cnt.load(Ordering::SeqCst) != 0 {
                info!(
                    "debug_thread produced {} consumed {} retired {}",
                    global_control.produced.load(Ordering::Relaxed),
                    global_control.consumed.load(Ordering::Relaxed),
                    domain::global().retired_count()
                );
                thread::sleep(time::Duration::from_millis(1000));
            }
        })
    };

    let producer_threads = (0..producer_count)
        .map(|_| {
            let global_control = global_control.clone();
            thread::spawn(move || {
                set_cpu_affinity();
                for i in 0..loop_cnt {
                    global_control.queue.enqueue(i as i64);
                    global_control.produced.fetch_add(1, Ordering::Relaxed);
                }
                global_control.producer_cnt.fetch_sub(1, Ordering::SeqCst);
            })
        })
        .collect::<Vec<_>>();

    let consumer_threads = (0..consumer_count)
        .map(|_| {
            let global_control = global_control.clone();
            thread::spawn(move || {
                set_cpu_affinity();
                let mut tol_val = 0_i64;
                let mut idle = false;
                loop {
                    if let Some(v) = global_control.queue.dequeue() {
                        tol_val += v;
                        global_control.consumed.fetch_add(1, Ordering::Relaxed);
                        idle = false;
                    } else if global_control.producer_cnt.load(Ordering::SeqCst) == 0 {
                        if idle {
                            break;
                        }
                        idle = true;
                    }
                }
                tol_val
            })
        })
        .collect::<Vec<_>>();

    for t in producer_threads {
        t.join().unwrap();
    }
    info!("producer_threads joined");
    let tol_val: i64 = consumer_threads.into_iter().map(|t| t.join().unwrap()).sum();
    info!("consumer_threads joined");
    watch_thread.join().unwrap();

    let n = loop_cnt as i64;
    assert_eq!(tol_val, producer_count as i64 * (n - 1) * n / 2);
    assert_eq!(
        global_control.produced.load(Ordering::Relaxed),
        global_control.consumed.load(Ordering::Relaxed)
    );
}

fn elapsed_ms(start: SystemTime) -> u64 {
    SystemTime::now()
        .duration_since(start)
        .map(|t| t.subsec_millis() as u64 + t.as_secs() * 1000)
        .unwrap_or(0)
}

fn main() {
    env_logger::init();

    let start = SystemTime::now();
    for trial in 0..TRIALS {
        run_trial();
        debug!("trial {} done", trial);
    }
    println!("{} trials, time cost {} ms", TRIALS, elapsed_ms(start));

    let start = SystemTime::now();
    run_throughput(1_000_000);
    println!("throughput run, time cost {} ms", elapsed_ms(start));
}
