//! Concurrency limiting for dispatch batches
//!
//! The [`ConcurrencyLimiter`] caps how many operations of one batch run at once.
//! Waiters are admitted in arrival order (tokio's semaphore is fair), so a
//! steady stream of new arrivals cannot starve an early waiter.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};

/// Default number of concurrent in-flight operations
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Caps the number of simultaneously running operations
///
/// Cloning yields another handle to the same set of slots.
#[derive(Clone, Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A granted slot; the slot returns to the limiter when this is dropped
#[derive(Debug)]
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct Permit {
    _permit: OwnedSemaphorePermit,
}

impl Permit {
    /// Return the slot explicitly, waking the longest-waiting caller if any
    pub fn release(self) {}
}

impl ConcurrencyLimiter {
    /// Create a limiter admitting `capacity` concurrent operations
    ///
    /// A capacity of zero is raised to one so that acquiring can never deadlock.
    /// Capacities above [`Semaphore::MAX_PERMITS`] are lowered to it.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot
    ///
    /// # Errors
    ///
    /// Returns [`Error::LimiterClosed`] if the limiter is closed while waiting.
    pub async fn acquire(&self) -> Result<Permit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::LimiterClosed)?;
        Ok(Permit { _permit: permit })
    }

    /// Take a slot if one is free right now
    pub fn try_acquire(&self) -> Option<Permit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| Permit { _permit: permit })
    }

    /// Close the limiter; pending and future `acquire` calls fail
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Maximum number of concurrent operations
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held
    pub fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test]
    async fn acquire_and_release_track_in_flight() {
        let limiter = ConcurrencyLimiter::new(2);

        let a = limiter.acquire().await.unwrap();
        let b = limiter.acquire().await.unwrap();
        assert_eq!(limiter.in_flight(), 2);
        assert!(limiter.try_acquire().is_none());

        a.release();
        assert_eq!(limiter.in_flight(), 1);
        drop(b);
        assert_eq!(limiter.available(), 2);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let limiter = ConcurrencyLimiter::new(0);
        assert_eq!(limiter.capacity(), 1);
        assert!(limiter.try_acquire().is_some());
    }

    #[test]
    fn waiters_are_admitted_in_arrival_order() {
        let limiter = ConcurrencyLimiter::new(1);
        let held = limiter.try_acquire().unwrap();

        let mut first = task::spawn(limiter.acquire());
        let mut second = task::spawn(limiter.acquire());
        assert_pending!(first.poll());
        assert_pending!(second.poll());

        held.release();

        // The slot goes to the first waiter even if the second is polled first
        assert_pending!(second.poll());
        assert!(first.is_woken());
        let permit = assert_ready!(first.poll()).unwrap();
        assert_pending!(second.poll());

        drop(permit);
        assert!(second.is_woken());
        assert!(assert_ready!(second.poll()).is_ok());
    }

    #[test]
    fn close_fails_pending_waiters() {
        let limiter = ConcurrencyLimiter::new(1);
        let _held = limiter.try_acquire().unwrap();

        let mut waiter = task::spawn(limiter.acquire());
        assert_pending!(waiter.poll());

        limiter.close();

        assert!(matches!(
            assert_ready!(waiter.poll()),
            Err(Error::LimiterClosed)
        ));
    }

    #[test]
    fn huge_capacity_is_lowered_to_semaphore_maximum() {
        let limiter = ConcurrencyLimiter::new(usize::MAX);
        assert_eq!(limiter.capacity(), Semaphore::MAX_PERMITS);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[test]
    fn default_capacity_is_ten() {
        assert_eq!(ConcurrencyLimiter::default().capacity(), DEFAULT_CONCURRENCY);
    }
}
