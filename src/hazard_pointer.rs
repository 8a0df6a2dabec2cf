//! Fixed size hazard pointer table and the per-thread owners of its slots.
//!
//! A slot pairs the id of its owning thread with one published pointer. A thread must publish a
//! pointer before dereferencing it and clear it once it no longer needs protection. Reclaimers
//! scan every slot and never free an address that is still published.

use error::{Error, Result};
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use util;
use util::WrappedAlign64Type;

cfg_if! {
    if #[cfg(feature = "max_thread_count_4096")] {
        pub const MAX_THREAD_COUNT: usize = 4096;
    } else if #[cfg(feature = "max_thread_count_16")] {
        pub const MAX_THREAD_COUNT: usize = 16;
    } else {
        /// Maximum count of threads registered with the global domain at the same time
        pub const MAX_THREAD_COUNT: usize = 128;
    }
}

/// Slots claimed by every thread: dequeue protects `head` and `head.next` at once.
pub const HAZARDS_PER_THREAD: usize = 2;

/// Number of slots in the global hazard pointer table
pub const MAX_HAZARD_POINTERS: usize = MAX_THREAD_COUNT * HAZARDS_PER_THREAD;

pub struct HazardSlot {
    owner: AtomicU64,
    pointer: AtomicPtr<()>,
}

impl Default for HazardSlot {
    fn default() -> Self {
        HazardSlot {
            owner: AtomicU64::new(util::UNSET_THREAD_ID),
            pointer: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

impl HazardSlot {
    #[inline]
    fn owner(&self) -> u64 {
        self.owner.load(Ordering::Acquire)
    }

    #[inline]
    fn try_claim(&self, tid: u64) -> bool {
        self.owner
            .compare_exchange(
                util::UNSET_THREAD_ID,
                tid,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    #[inline]
    fn pointer(&self) -> *mut () {
        self.pointer.load(Ordering::SeqCst)
    }
}

/// Table of `(owning thread id, published pointer)` slots, fixed size after construction.
pub struct HazardPointerTable {
    slots: Box<[WrappedAlign64Type<HazardSlot>]>,
}

impl HazardPointerTable {
    /// Build a table able to hand out `capacity` slots at the same time.
    ///
    /// # Examples
    ///
    /// ```
    /// use rs_lockfree_queue::hazard_pointer::HazardPointerTable;
    ///
    /// let table = HazardPointerTable::with_capacity(4);
    /// assert_eq!(table.capacity(), 4);
    /// ```
    ///
    pub fn with_capacity(capacity: usize) -> HazardPointerTable {
        let slots = (0..capacity)
            .map(|_| WrappedAlign64Type(HazardSlot::default()))
            .collect::<Vec<_>>();
        HazardPointerTable {
            slots: slots.into_boxed_slice(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claim the first unowned slot for the current thread. The slot stays claimed until the
    /// returned owner is dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use rs_lockfree_queue::hazard_pointer::HazardPointerTable;
    /// use rs_lockfree_queue::error::Error;
    ///
    /// let table = HazardPointerTable::with_capacity(1);
    /// let owner = table.acquire().unwrap();
    /// assert_eq!(table.acquire().err(), Some(Error::ThreadNumOverflow { capacity: 1 }));
    /// drop(owner);
    /// assert!(table.acquire().is_ok());
    /// ```
    ///
    pub fn acquire(&self) -> Result<HazardPointerOwner> {
        let tid = util::get_thread_id();
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.owner() == util::UNSET_THREAD_ID && slot.try_claim(tid) {
                return Ok(HazardPointerOwner { slot: &**slot, index });
            }
        }
        warn!(
            "hazard pointer table exhausted, capacity={}, tid={}",
            self.capacity(),
            tid
        );
        Err(Error::ThreadNumOverflow {
            capacity: self.capacity(),
        })
    }

    /// Return true if any slot currently publishes `ptr`. Null is never protected.
    pub fn is_protected<T>(&self, ptr: *const T) -> bool {
        let ptr = ptr as *mut ();
        !ptr.is_null() && self.slots.iter().any(|slot| slot.pointer() == ptr)
    }

    /// Count of slots currently owned by some thread.
    pub fn owned_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.owner() != util::UNSET_THREAD_ID)
            .count()
    }
}

/// Exclusive handle on one slot of a `HazardPointerTable`.
pub struct HazardPointerOwner<'a> {
    slot: &'a HazardSlot,
    index: usize,
}

impl<'a> HazardPointerOwner<'a> {
    #[inline]
    pub fn slot_index(&self) -> usize {
        self.index
    }

    /// Publish `ptr`. It is not safe to dereference until the source it was read from has been
    /// re-validated, see `protect_load`.
    #[inline]
    pub fn protect<T>(&self, ptr: *mut T) {
        self.slot.pointer.store(ptr as *mut (), Ordering::SeqCst);
    }

    /// Publish the current value of `src` and re-read it until the published value is still
    /// current, so the returned pointer can not have been reclaimed in between.
    pub fn protect_load<T>(&self, src: &AtomicPtr<T>) -> *mut T {
        let mut curr = src.load(Ordering::SeqCst);
        loop {
            self.protect(curr);
            let reread = src.load(Ordering::SeqCst);
            if reread == curr {
                return curr;
            }
            curr = reread;
        }
    }

    #[inline]
    pub fn protected(&self) -> *mut () {
        self.slot.pointer()
    }

    #[inline]
    pub fn clear(&self) {
        self.slot.pointer.store(ptr::null_mut(), Ordering::Release);
    }
}

impl<'a> Drop for HazardPointerOwner<'a> {
    fn drop(&mut self) {
        self.clear();
        self.slot
            .owner
            .store(util::UNSET_THREAD_ID, Ordering::Release);
    }
}
