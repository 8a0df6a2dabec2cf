//! Definition of errors.

use std::error;
use std::fmt;
use std::result;

/// Errors of hazard pointer registration
#[derive(PartialEq, Copy, Clone, Debug)]
pub enum Error {
    /// Every slot of the hazard pointer table is owned by some live thread
    ThreadNumOverflow {
        /// Number of slots in the exhausted table
        capacity: usize,
    },
    /// Current thread is exiting and its thread local storage is gone
    ThreadExiting,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::ThreadNumOverflow { capacity } => write!(
                f,
                "no hazard pointers available, all {} slots are in use",
                capacity
            ),
            Error::ThreadExiting => write!(f, "thread local hazard pointers already released"),
        }
    }
}

impl error::Error for Error {}

pub type Result<T> = result::Result<T, Error>;

/// Returned by `try_enqueue`, gives the rejected value back to the caller.
#[derive(PartialEq, Debug)]
pub struct EnqueueError<T> {
    pub error: Error,
    pub value: T,
}

impl<T> EnqueueError<T> {
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> fmt::Display for EnqueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "enqueue failed: {}", self.error)
    }
}

impl<T: fmt::Debug> error::Error for EnqueueError<T> {}
