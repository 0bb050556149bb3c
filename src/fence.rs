//! Provides `Fence<T>`, an async-spin lock that owns the data it guards.
//!
//! The ring's index block is mutated in very short critical sections from
//! many tasks at once. `Fence` protects it with an `AtomicBool` flag and
//! an async loop that yields to the scheduler via
//! `tokio::task::yield_now()` while the flag is taken, instead of
//! performing a blocking busy-wait.
//!
//! This implementation avoids introducing a heavier `tokio::sync::Mutex`
//! and is suitable for scenarios where lock contention is low and hold
//! times are extremely short. Unlike a bare flag, the guarded value lives
//! inside the fence, so it cannot be reached without holding the lock.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

/// An RAII guard that signifies a `Fence` has been locked.
///
/// Dereferences to the guarded value. When the guard is `drop`ped, the
/// lock is released, even in the event of a panic.
pub(crate) struct Guard<'a, T>(&'a Fence<T>);

impl<T> Deref for Guard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: the flag is held, so this guard has exclusive access.
        unsafe { &*self.0.data.get() }
    }
}

impl<T> DerefMut for Guard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: the flag is held, so this guard has exclusive access.
        unsafe { &mut *self.0.data.get() }
    }
}

impl<T> Drop for Guard<'_, T> {
    fn drop(&mut self) {
        // Release the lock. Release ordering makes the writes performed
        // through this guard visible to the next acquirer.
        self.0.flag.store(false, Ordering::Release);
    }
}

/// A lightweight, asynchronous spin lock owning a value of type `T`.
///
/// A task attempting to acquire the lock enters a loop, using
/// `compare_exchange` to try to set the flag. If the attempt fails, the
/// task calls `tokio::task::yield_now()` to yield execution to the Tokio
/// scheduler, thus avoiding CPU-intensive busy-waiting.
///
/// The internal `AtomicBool` is wrapped in `CachePadded` to reduce
/// performance degradation on multi-core systems due to false sharing.
pub(crate) struct Fence<T> {
    flag: CachePadded<AtomicBool>,
    data: UnsafeCell<T>,
}

// SAFETY: the flag grants exclusive access to `data`, so sharing the
// fence between threads is safe whenever moving `T` between threads is.
unsafe impl<T: Send> Send for Fence<T> {}
unsafe impl<T: Send> Sync for Fence<T> {}

impl<T> Fence<T> {
    pub(crate) fn new(data: T) -> Self {
        Self {
            flag: CachePadded::new(AtomicBool::new(false)),
            data: UnsafeCell::new(data),
        }
    }

    /// Attempts to acquire the lock immediately.
    ///
    /// Returns `Some(Guard)` if the lock was successfully acquired, or
    /// `None` if the lock is currently held elsewhere.
    #[inline]
    pub(crate) fn try_acquire(&self) -> Option<Guard<'_, T>> {
        if self
            .flag
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(Guard(self))
        } else {
            None
        }
    }

    /// Acquires the lock asynchronously.
    ///
    /// Spins, yielding to the scheduler between attempts, until the lock
    /// is acquired. The lock is released when the returned `Guard` is
    /// `drop`ped.
    pub(crate) async fn acquire(&self) -> Guard<'_, T> {
        loop {
            if let Some(guard) = self.try_acquire() {
                return guard;
            }
            // The lock is held by another task; yield and try again later.
            tokio::task::yield_now().await;
        }
    }

    /// Acquires the lock from a synchronous context.
    ///
    /// Critical sections under this fence never span an await point, so
    /// the holder is always actively running on some thread and the spin
    /// is bounded by one critical section. Used by `Drop` impls that must
    /// finish the protocol without an executor.
    pub(crate) fn acquire_blocking(&self) -> Guard<'_, T> {
        loop {
            if let Some(guard) = self.try_acquire() {
                return guard;
            }
            std::hint::spin_loop();
        }
    }

    /// Whether the lock is currently held. Observational only; the answer
    /// may be stale by the time it is returned.
    pub(crate) fn is_held(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_fence_acquire_and_release() {
        let fence = Fence::new(7u32);

        // 1. First acquire: read and mutate through the guard.
        let mut guard1 = fence.acquire().await;
        assert_eq!(*guard1, 7);
        *guard1 += 1;
        assert!(fence.is_held());

        // 2. Release.
        drop(guard1);
        assert!(!fence.is_held());

        // 3. Second acquire observes the mutation.
        let guard2 = fence.acquire().await;
        assert_eq!(*guard2, 8);
    }

    #[tokio::test]
    async fn test_fence_try_acquire_contended() {
        let fence = Fence::new(0u32);

        let held = fence.acquire().await;
        assert!(fence.try_acquire().is_none());
        drop(held);
        assert!(fence.try_acquire().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fence_exclusive_blocking() {
        let fence = Arc::new(Fence::new(0u32));

        // Task 1: acquire the lock and hold it for 100ms.
        let fence_clone = fence.clone();
        let task1 = tokio::spawn(async move {
            let mut guard = fence_clone.acquire().await;
            tokio::time::sleep(Duration::from_millis(100)).await;
            *guard = 1;
        });

        // Wait for task 1 to acquire the lock.
        while !fence.is_held() {
            tokio::task::yield_now().await;
        }

        // Task 2: attempt to acquire the lock; should be blocked.
        let fence_clone = fence.clone();
        let mut task2 = tokio::spawn(async move {
            let guard = fence_clone.acquire().await;
            *guard
        });

        assert!(
            timeout(Duration::from_millis(50), &mut task2).await.is_err(),
            "task 2 should be blocked while task 1 holds the fence"
        );

        task1.await.unwrap();

        // Task 2 now acquires and observes task 1's write.
        let value = timeout(Duration::from_millis(500), task2)
            .await
            .expect("task 2 should be unblocked")
            .unwrap();
        assert_eq!(value, 1);
    }

    #[tokio::test]
    async fn test_fence_acquire_blocking() {
        let fence = Fence::new(5u32);
        let guard = fence.acquire_blocking();
        assert_eq!(*guard, 5);
        drop(guard);
        assert!(!fence.is_held());
    }
}
