//! Lock-Free MPMC queue for Rust with `Hazard Pointers` based memory reclamation
//!
//! [`Hazard Pointers`](http://www.cs.otago.ac.nz/cosc440/readings/hazard-pointers.pdf) let a
//! thread publish the address of a shared node before dereferencing it and clear it afterwards.
//! A removed node is freed only when no published pointer refers to it, which rules out both
//! use-after-free and the [`ABA problem`](https://en.wikipedia.org/wiki/ABA_problem).
//!
//! The crate keeps one process wide `HazardDomain`: a fixed size table of hazard slots, each
//! owned by at most one thread, and a lock-free list of retired nodes. A thread claims its slots
//! on first use and gives them back when it exits. Capacity is chosen with the
//! `max_thread_count_*` features.
//!
//! `LockFreeQueue` is an unbounded FIFO (Michael-Scott style, with helping) on top of it. Enqueue
//! and dequeue never take a lock; they retry CAS loops until they succeed.
//!
//! ```
//! use rs_lockfree_queue::lockfree_queue::LockFreeQueue;
//!
//! let queue = LockFreeQueue::new();
//! for i in 0..10 {
//!     queue.enqueue(i);
//! }
//! for i in 0..10 {
//!     assert_eq!(queue.dequeue(), Some(i));
//! }
//! assert_eq!(queue.dequeue(), None);
//! ```
//!

pub mod util;
pub mod error;
pub mod hazard_pointer;
pub mod retire;
pub mod domain;
pub mod lockfree_queue;

pub use error::{EnqueueError, Error};
pub use lockfree_queue::LockFreeQueue;

#[macro_use]
extern crate log;

#[macro_use]
extern crate cfg_if;

#[macro_use]
extern crate lazy_static;
