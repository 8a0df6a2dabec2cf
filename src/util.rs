extern crate time;

use std::cell::Cell;
use std::hint;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread id `0` is never handed out, hazard slots use it as "unset".
pub const UNSET_THREAD_ID: u64 = 0;

static GLOBAL_THREAD_ID: AtomicU64 = AtomicU64::new(1);

/// Return a process-unique id for the current thread, assigned on first call.
pub fn get_thread_id() -> u64 {
    thread_local!(static THREAD_ID: Cell<u64> = Cell::new(UNSET_THREAD_ID););
    THREAD_ID
        .try_with(|tid| {
            if UNSET_THREAD_ID == tid.get() {
                tid.set(GLOBAL_THREAD_ID.fetch_add(1, Ordering::Relaxed));
            }
            tid.get()
        })
        // thread local storage already torn down, hand out a fresh id
        .unwrap_or_else(|_| GLOBAL_THREAD_ID.fetch_add(1, Ordering::Relaxed))
}

#[repr(align(64))]
pub struct WrappedAlign64Type<T>(pub T);

impl<T> Default for WrappedAlign64Type<T>
where
    T: Default,
{
    fn default() -> Self {
        WrappedAlign64Type(T::default())
    }
}

impl<T> Deref for WrappedAlign64Type<T> {
    type Target = T;

    fn deref(&self) -> &<Self as Deref>::Target {
        &self.0
    }
}

impl<T> DerefMut for WrappedAlign64Type<T> {
    fn deref_mut(&mut self) -> &mut <Self as Deref>::Target {
        &mut self.0
    }
}

pub fn get_cur_microseconds_time() -> i64 {
    let timespec = time::get_time();
    timespec.sec * 1_000_000 + timespec.nsec as i64 / 1_000
}

#[inline]
pub fn pause() {
    hint::spin_loop();
}
