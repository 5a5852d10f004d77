//! Lock with a bounded acquisition time.
//!
//! Every shared structure in the transport layer sits behind a
//! [`TimedMutex`].  Callers always state how long they are prepared to
//! wait; an expired wait is reported as [`Error::LockTimeout`] rather
//! than blocking the calling task indefinitely.

use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Back-off between `try_lock` attempts.
const RETRY_INTERVAL: Duration = Duration::from_micros(250);

pub struct TimedMutex<T> {
    inner: Mutex<T>,
}

impl<T> TimedMutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Acquire the lock, waiting at most `timeout`.
    ///
    /// A poisoned lock is recovered: the protected data is plain counters
    /// and state enums that stay consistent across a panicking holder.
    pub fn lock_for(&self, timeout: Duration) -> Result<MutexGuard<'_, T>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.inner.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(p)) => return Ok(p.into_inner()),
                Err(TryLockError::WouldBlock) => {}
            }
            if Instant::now() >= deadline {
                return Err(Error::LockTimeout);
            }
            std::thread::sleep(RETRY_INTERVAL);
        }
    }

    /// Single non-blocking attempt.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        match self.inner.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(p)) => Some(p.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn uncontended_lock_succeeds() {
        let m = TimedMutex::new(5u32);
        *m.lock_for(Duration::from_millis(10)).unwrap() += 1;
        assert_eq!(*m.lock_for(Duration::ZERO).unwrap(), 6);
    }

    #[test]
    fn contended_lock_times_out() {
        let m = Arc::new(TimedMutex::new(()));
        let _held = m.lock_for(Duration::ZERO).unwrap();
        let start = Instant::now();
        assert_eq!(
            m.lock_for(Duration::from_millis(20)).err(),
            Some(Error::LockTimeout)
        );
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(m.try_lock().is_none());
    }
}
