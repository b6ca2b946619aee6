//! Admission tokens for closest-peer lookups.
//!
//! A fixed pool of tokens; a lookup holds one from before it is issued until
//! its result stream is fully drained. Tokens go back on every exit path
//! because release happens in `Drop`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::ScrapeError;

struct Gauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[derive(Clone)]
pub struct RateLimiter {
    tokens: Arc<Semaphore>,
    capacity: usize,
    gauge: Arc<Gauge>,
}

/// One held token. Dropping it releases the token.
pub struct RatePermit {
    _permit: OwnedSemaphorePermit,
    gauge: Arc<Gauge>,
}

impl RateLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            tokens: Arc::new(Semaphore::new(capacity)),
            capacity,
            gauge: Arc::new(Gauge {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    /// Wait for a token, or fail with `Cancelled` once `cancel` fires.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<RatePermit, ScrapeError> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ScrapeError::Cancelled),
            permit = self.tokens.clone().acquire_owned() => {
                permit.map_err(|_| ScrapeError::Cancelled)?
            }
        };

        let now = self.gauge.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauge.peak.fetch_max(now, Ordering::SeqCst);

        Ok(RatePermit {
            _permit: permit,
            gauge: self.gauge.clone(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tokens currently held.
    pub fn in_flight(&self) -> usize {
        self.gauge.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of tokens ever held at once.
    pub fn peak(&self) -> usize {
        self.gauge.peak.load(Ordering::SeqCst)
    }
}

impl Drop for RatePermit {
    fn drop(&mut self) {
        self.gauge.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn tokens_are_returned_on_drop() {
        let limiter = RateLimiter::new(2);
        let cancel = CancellationToken::new();

        let a = limiter.acquire(&cancel).await.unwrap();
        let b = limiter.acquire(&cancel).await.unwrap();
        assert_eq!(limiter.in_flight(), 2);

        drop(a);
        assert_eq!(limiter.in_flight(), 1);
        drop(b);
        assert_eq!(limiter.in_flight(), 0);
        assert_eq!(limiter.peak(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn saturated_pool_blocks_until_release() {
        let limiter = RateLimiter::new(1);
        let cancel = CancellationToken::new();
        let held = limiter.acquire(&cancel).await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.acquire(&cancel).await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();
        assert_eq!(limiter.peak(), 1);
    }

    #[tokio::test]
    async fn cancelled_wait_fails() {
        let limiter = RateLimiter::new(1);
        let cancel = CancellationToken::new();
        let _held = limiter.acquire(&cancel).await.unwrap();

        cancel.cancel();
        let err = limiter.acquire(&cancel).await.err().unwrap();
        assert!(matches!(err, ScrapeError::Cancelled));
        assert_eq!(limiter.in_flight(), 1);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        assert_eq!(RateLimiter::new(0).capacity(), 1);
    }
}
