// src/cancel.rs

//! Cancellation tokens for blocking waits
//!
//! A [`CancelToken`] cancels the *waiting* phase of
//! [`CatalogCache::acquire`](crate::CatalogCache::acquire): a thread blocked
//! on the cache observes the cancellation and returns an error, while a
//! build already running on another thread is unaffected. Tokens are cheap
//! to clone and safe to trigger from any thread.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Wakes a blocked waiter. Implemented by the cache's shared state so that
/// cancelling a token interrupts its condvar wait instead of leaving the
/// thread asleep until the next unrelated broadcast.
pub(crate) trait Wake: Send + Sync {
    fn wake(&self);
}

/// Cloneable cancellation flag with prompt waiter wake-up
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    next_id: AtomicU64,
    waiters: Mutex<Vec<(u64, Arc<dyn Wake>)>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag the token as cancelled and wake every registered waiter.
    ///
    /// Idempotent; later calls only repeat the wake-up.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        // Snapshot outside the waiters lock; wake() takes the waiter's own
        // lock and must not nest inside ours.
        let waiters: Vec<_> = self.inner.waiters.lock().clone();
        for (_, waiter) in waiters {
            waiter.wake();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Register a waiter to be woken by [`cancel`](Self::cancel). The
    /// registration ends when the returned guard drops.
    pub(crate) fn register(&self, waiter: Arc<dyn Wake>) -> WaiterGuard {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.waiters.lock().push((id, waiter));
        WaiterGuard {
            inner: Arc::clone(&self.inner),
            id,
        }
    }
}

/// Removes the waiter registration on drop
pub(crate) struct WaiterGuard {
    inner: Arc<Inner>,
    id: u64,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        self.inner.waiters.lock().retain(|(id, _)| *id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingWaiter(AtomicUsize);

    impl Wake for CountingWaiter {
        fn wake(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_cancel_sets_flag() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());

        // Clones share the flag.
        let clone = token.clone();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_cancel_wakes_registered_waiters() {
        let token = CancelToken::new();
        let waiter = Arc::new(CountingWaiter(AtomicUsize::new(0)));

        let registration = token.register(Arc::clone(&waiter) as Arc<dyn Wake>);
        token.cancel();
        assert_eq!(waiter.0.load(Ordering::SeqCst), 1);

        // Deregistered waiters stay asleep.
        drop(registration);
        token.cancel();
        assert_eq!(waiter.0.load(Ordering::SeqCst), 1);
    }
}
