//! Deferred deletion of nodes that may still be referenced through a hazard pointer.
//!
use hazard_pointer::HazardPointerTable;
use std::ptr;
use std::sync::atomic::{AtomicI64, AtomicPtr, AtomicUsize, Ordering};
use util;
use util::WrappedAlign64Type;

/// Record of one retired object. The deleter captures the concrete type of `data`.
struct Retired {
    data: *mut (),
    deleter: unsafe fn(*mut ()),
    next: *mut Retired,
}

impl Retired {
    unsafe fn delete(record: *mut Retired) {
        let record = Box::from_raw(record);
        (record.deleter)(record.data);
    }
}

unsafe fn drop_boxed<T>(data: *mut ()) {
    drop(Box::from_raw(data as *mut T));
}

/// Lock-free stack of retired records, shared by every thread of a domain.
pub struct RetireList {
    head: WrappedAlign64Type<AtomicPtr<Retired>>,
    count: WrappedAlign64Type<AtomicUsize>,
    last_scan_us: AtomicI64,
}

impl Default for RetireList {
    fn default() -> Self {
        RetireList::new()
    }
}

impl RetireList {
    pub fn new() -> RetireList {
        RetireList {
            head: WrappedAlign64Type(AtomicPtr::new(ptr::null_mut())),
            count: WrappedAlign64Type(AtomicUsize::new(0)),
            last_scan_us: AtomicI64::new(0),
        }
    }

    /// Hand a `Box`-allocated object over for deferred deletion.
    ///
    /// # Safety
    ///
    /// `data` must come from `Box::into_raw`, be unreachable for new readers and not be retired
    /// twice.
    pub unsafe fn retire<T>(&self, data: *mut T) {
        self.retire_with(data as *mut (), drop_boxed::<T>);
    }

    /// Same as `retire` with an explicit deleter, which runs exactly once.
    ///
    /// # Safety
    ///
    /// See `retire`; `deleter` must be able to free `data`.
    pub unsafe fn retire_with(&self, data: *mut (), deleter: unsafe fn(*mut ())) {
        let record = Box::into_raw(Box::new(Retired {
            data,
            deleter,
            next: ptr::null_mut(),
        }));
        self.count.fetch_add(1, Ordering::Relaxed);
        self.push(record);
    }

    /// Count of records waiting to be reclaimed.
    #[inline]
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    unsafe fn push(&self, record: *mut Retired) {
        let mut old = self.head.load(Ordering::Relaxed);
        loop {
            (*record).next = old;
            match self
                .head
                .compare_exchange_weak(old, record, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(curr) => old = curr,
            }
        }
    }

    /// Detach the whole stack. Each record is seen by exactly one caller.
    #[inline]
    fn take_all(&self) -> *mut Retired {
        self.head.swap(ptr::null_mut(), Ordering::Acquire)
    }
}

impl Drop for RetireList {
    fn drop(&mut self) {
        let mut curr = self.take_all();
        while !curr.is_null() {
            unsafe {
                let next = (*curr).next;
                Retired::delete(curr);
                curr = next;
            }
        }
    }
}

/// When an opportunistic reclaim pass is worth its `O(retired * slots)` scan.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ReclaimPolicy {
    /// Scan once at least this many records are pending. `0` scans after every retirement.
    pub retired_threshold: usize,
    /// Below the threshold, scan anyway if the last scan is older than this (microseconds).
    pub min_scan_interval_us: i64,
}

impl Default for ReclaimPolicy {
    fn default() -> Self {
        ReclaimPolicy {
            retired_threshold: 0,
            min_scan_interval_us: 0,
        }
    }
}

impl ReclaimPolicy {
    pub fn new(retired_threshold: usize, min_scan_interval_us: i64) -> ReclaimPolicy {
        ReclaimPolicy {
            retired_threshold,
            min_scan_interval_us,
        }
    }
}

/// Frees retired records no hazard pointer refers to, pushes the rest back.
pub struct Reclaimer<'a> {
    table: &'a HazardPointerTable,
    retired: &'a RetireList,
}

impl<'a> Reclaimer<'a> {
    pub fn new(table: &'a HazardPointerTable, retired: &'a RetireList) -> Reclaimer<'a> {
        Reclaimer { table, retired }
    }

    /// Run one pass over every pending record and return how many were freed. Safe to call
    /// from many threads at once.
    ///
    /// # Examples
    ///
    /// ```
    /// use rs_lockfree_queue::hazard_pointer::HazardPointerTable;
    /// use rs_lockfree_queue::retire::{Reclaimer, RetireList};
    ///
    /// let table = HazardPointerTable::with_capacity(1);
    /// let retired = RetireList::new();
    /// let owner = table.acquire().unwrap();
    /// let node = Box::into_raw(Box::new(7));
    /// owner.protect(node);
    /// unsafe { retired.retire(node) };
    ///
    /// let reclaimer = Reclaimer::new(&table, &retired);
    /// assert_eq!(reclaimer.reclaim(), 0);
    /// owner.clear();
    /// assert_eq!(reclaimer.reclaim(), 1);
    /// assert!(retired.is_empty());
    /// ```
    ///
    pub fn reclaim(&self) -> usize {
        if self.retired.is_empty() {
            return 0;
        }
        self.retired
            .last_scan_us
            .store(util::get_cur_microseconds_time(), Ordering::Relaxed);
        let mut curr = self.retired.take_all();
        let mut freed = 0;
        let mut requeued = 0;
        while !curr.is_null() {
            unsafe {
                let next = (*curr).next;
                if self.table.is_protected((*curr).data) {
                    self.retired.push(curr);
                    requeued += 1;
                } else {
                    Retired::delete(curr);
                    freed += 1;
                }
                curr = next;
            }
        }
        self.retired.count.fetch_sub(freed, Ordering::Relaxed);
        trace!("reclaim pass, freed={}, requeued={}", freed, requeued);
        freed
    }

    /// `reclaim` if `policy` says a scan is due, else do nothing and return 0.
    pub fn reclaim_with(&self, policy: &ReclaimPolicy) -> usize {
        let pending = self.retired.len();
        if pending == 0 {
            return 0;
        }
        let due = pending >= policy.retired_threshold
            || self.retired
                .last_scan_us
                .load(Ordering::Relaxed)
                .saturating_add(policy.min_scan_interval_us)
                <= util::get_cur_microseconds_time();
        if due {
            self.reclaim()
        } else {
            0
        }
    }
}
