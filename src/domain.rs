//! Process wide hazard pointer service: one table, one retire list, and the thread local
//! registration that ties each thread to its slots for the thread's lifetime.
//!
use error::{Error, Result};
use hazard_pointer::{HazardPointerOwner, HazardPointerTable, MAX_HAZARD_POINTERS};
use retire::{ReclaimPolicy, Reclaimer, RetireList};
use std::cell::RefCell;
use util;

lazy_static! {
    static ref GLOBAL_DOMAIN: HazardDomain = HazardDomain::with_capacity(MAX_HAZARD_POINTERS);
}

/// The domain every `LockFreeQueue` reclaims through. Initialized on first use.
#[inline]
pub fn global() -> &'static HazardDomain {
    &*GLOBAL_DOMAIN
}

/// A hazard pointer table paired with the retire list its reclaimers scan against.
pub struct HazardDomain {
    table: HazardPointerTable,
    retired: RetireList,
}

impl HazardDomain {
    pub fn with_capacity(capacity: usize) -> HazardDomain {
        HazardDomain {
            table: HazardPointerTable::with_capacity(capacity),
            retired: RetireList::new(),
        }
    }

    #[inline]
    pub fn table(&self) -> &HazardPointerTable {
        &self.table
    }

    #[inline]
    pub fn acquire(&self) -> Result<HazardPointerOwner> {
        self.table.acquire()
    }

    /// Count of retired objects not yet freed.
    #[inline]
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Defer deletion of `data` until no hazard pointer publishes it.
    ///
    /// # Safety
    ///
    /// Same contract as `RetireList::retire`.
    #[inline]
    pub unsafe fn retire<T>(&self, data: *mut T) {
        self.retired.retire(data);
    }

    /// Free `data` right away if nothing protects it, else retire it. Returns true if freed.
    ///
    /// # Safety
    ///
    /// Same contract as `RetireList::retire`.
    pub unsafe fn retire_or_free<T>(&self, data: *mut T) -> bool {
        if self.table.is_protected(data) {
            self.retired.retire(data);
            false
        } else {
            drop(Box::from_raw(data));
            true
        }
    }

    /// One reclaim pass, returns the number of records freed.
    #[inline]
    pub fn reclaim(&self) -> usize {
        Reclaimer::new(&self.table, &self.retired).reclaim()
    }

    #[inline]
    pub fn reclaim_with(&self, policy: &ReclaimPolicy) -> usize {
        Reclaimer::new(&self.table, &self.retired).reclaim_with(policy)
    }
}

/// The slots one thread owns in the global domain.
pub(crate) struct LocalHazards {
    pub primary: HazardPointerOwner<'static>,
    pub secondary: HazardPointerOwner<'static>,
}

impl LocalHazards {
    fn acquire(domain: &'static HazardDomain) -> Result<LocalHazards> {
        let primary = domain.acquire()?;
        let secondary = domain.acquire()?;
        debug!(
            "thread {} registered hazard slots {} and {}",
            util::get_thread_id(),
            primary.slot_index(),
            secondary.slot_index()
        );
        Ok(LocalHazards { primary, secondary })
    }

    pub fn clear(&self) {
        self.primary.clear();
        self.secondary.clear();
    }
}

impl Drop for LocalHazards {
    fn drop(&mut self) {
        debug!(
            "thread {} released hazard slots {} and {}",
            util::get_thread_id(),
            self.primary.slot_index(),
            self.secondary.slot_index()
        );
    }
}

thread_local!(static LOCAL_HAZARDS: RefCell<Option<LocalHazards>> = RefCell::new(None););

/// Run `f` with the current thread's slots of the global domain, claiming them on first use.
pub(crate) fn with_local_hazards<F, R>(f: F) -> Result<R>
where
    F: FnOnce(&LocalHazards) -> R,
{
    LOCAL_HAZARDS
        .try_with(|cell| -> Result<R> {
            if cell.borrow().is_none() {
                let hazards = LocalHazards::acquire(global())?;
                *cell.borrow_mut() = Some(hazards);
            }
            match *cell.borrow() {
                Some(ref hazards) => Ok(f(hazards)),
                None => Err(Error::ThreadExiting),
            }
        })
        .map_err(|_| Error::ThreadExiting)?
}

/// Claim the current thread's hazard slots now instead of on its first queue operation, so that
/// exhaustion surfaces at registration time.
///
/// # Examples
///
/// ```
/// use rs_lockfree_queue::domain;
///
/// domain::register_current_thread().unwrap();
/// assert!(domain::is_current_thread_registered());
/// ```
///
pub fn register_current_thread() -> Result<()> {
    with_local_hazards(|_| ())
}

pub fn is_current_thread_registered() -> bool {
    LOCAL_HAZARDS
        .try_with(|cell| cell.borrow().is_some())
        .unwrap_or(false)
}
