#![forbid(unsafe_code)]

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::trace;

/// Single-writer lock around a value. Every mutating sequence runs while a
/// [`WriteGuard`] is alive; dropping the guard releases the lock on every exit
/// path, including early returns and panics.
pub struct ExclusiveLock<T> {
    inner: Mutex<T>,
    held: AtomicBool,
    acquisitions: AtomicU64,
}

/// Snapshot of lock state for observability.
#[derive(Default, Debug, Clone, Copy)]
pub struct LockSnapshot {
    /// Whether the writer lock is held.
    pub writer: bool,
    /// Number of successful acquisitions since creation.
    pub acquisitions: u64,
}

/// Guard representing a held writer lock.
pub struct WriteGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    held: &'a AtomicBool,
}

impl<T> ExclusiveLock<T> {
    /// Wraps `value` in a new, unheld lock.
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
            held: AtomicBool::new(false),
            acquisitions: AtomicU64::new(0),
        }
    }

    /// Acquires the writer lock, blocking until available.
    pub fn acquire(&self) -> WriteGuard<'_, T> {
        let guard = self.inner.lock();
        self.on_acquired(guard)
    }

    /// Attempts to acquire the writer lock, giving up after `timeout`.
    pub fn try_acquire_for(&self, timeout: Duration) -> Option<WriteGuard<'_, T>> {
        let guard = self.inner.try_lock_for(timeout)?;
        Some(self.on_acquired(guard))
    }

    /// Returns a snapshot of the current lock state.
    pub fn snapshot(&self) -> LockSnapshot {
        LockSnapshot {
            writer: self.held.load(Ordering::Acquire),
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
        }
    }

    /// Consumes the lock and returns the protected value.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    fn on_acquired<'a>(&'a self, guard: MutexGuard<'a, T>) -> WriteGuard<'a, T> {
        self.held.store(true, Ordering::Release);
        let count = self.acquisitions.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(acquisitions = count, "lock.writer.acquired");
        WriteGuard {
            guard,
            held: &self.held,
        }
    }
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
        trace!("lock.writer.released");
    }
}
