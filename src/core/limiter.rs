//! Rate limiting
//!
//! The copy loop asks a [`RateLimiter`] for permission before every chunk and
//! knows nothing about how the limiter paces. [`TokenBucket`] is the pacing
//! policy used by the CLI and by [`TransferOptions::limiter`](crate::TransferOptions::limiter).

use std::num::NonZeroU64;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use log::trace;
use tokio::time::Instant;

use crate::core::context::Context;
use crate::core::error::{Error, Result};

/// Grants permission to move bytes.
///
/// `acquire` may suspend the caller until `n` bytes are allowed through. While
/// suspended it must watch `ctx` and return [`Error::Canceled`] with the
/// context's cause once it is canceled.
pub trait RateLimiter: Send + Sync {
    fn acquire<'a>(&'a self, n: usize, ctx: &'a Context) -> BoxFuture<'a, Result<()>>;
}

impl<L: RateLimiter + ?Sized> RateLimiter for Arc<L> {
    fn acquire<'a>(&'a self, n: usize, ctx: &'a Context) -> BoxFuture<'a, Result<()>> {
        (**self).acquire(n, ctx)
    }
}

#[derive(Debug)]
struct Bucket {
    rate: f64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Token bucket limiter.
///
/// Tokens refill continuously at `rate` bytes per second up to `burst`. A
/// request larger than the tokens on hand goes into debt and the caller sleeps
/// until the debt is repaid, so oversized chunks are paced rather than
/// rejected.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<Bucket>,
}

impl TokenBucket {
    /// Limits to `bytes_per_sec` with one second worth of burst.
    pub fn new(bytes_per_sec: NonZeroU64) -> Self {
        Self::with_burst(bytes_per_sec, None)
    }

    /// Limits to `bytes_per_sec` with an explicit burst size.
    pub fn with_burst(bytes_per_sec: NonZeroU64, burst: Option<NonZeroU64>) -> Self {
        let rate = bytes_per_sec.get() as f64;
        let capacity = burst.map_or(rate, |b| b.get() as f64);

        Self {
            state: Mutex::new(Bucket {
                rate,
                capacity,
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Configured rate in bytes per second.
    pub fn limit(&self) -> u64 {
        self.lock().rate as u64
    }

    /// Configured burst size in bytes.
    pub fn burst(&self) -> u64 {
        self.lock().capacity as u64
    }

    /// Changes the rate. Tokens already earned are kept.
    pub fn set_limit(&self, bytes_per_sec: NonZeroU64) {
        let mut bucket = self.lock();
        bucket.refill(Instant::now());
        bucket.rate = bytes_per_sec.get() as f64;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Bucket> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Takes `n` tokens and returns how long the caller must wait for them.
    fn reserve(&self, n: usize) -> Duration {
        let mut bucket = self.lock();
        bucket.refill(Instant::now());
        bucket.tokens -= n as f64;

        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / bucket.rate)
        }
    }

    /// Returns tokens from a reservation that was never used.
    fn release(&self, n: usize) {
        let mut bucket = self.lock();
        bucket.refill(Instant::now());
        bucket.tokens = (bucket.tokens + n as f64).min(bucket.capacity);
    }

    #[cfg(test)]
    fn tokens(&self) -> f64 {
        let mut bucket = self.lock();
        bucket.refill(Instant::now());
        bucket.tokens
    }
}

impl RateLimiter for TokenBucket {
    fn acquire<'a>(&'a self, n: usize, ctx: &'a Context) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if let Some(cause) = ctx.err() {
                return Err(Error::Canceled(cause));
            }
            if n == 0 {
                return Ok(());
            }

            let wait = self.reserve(n);
            if wait.is_zero() {
                return Ok(());
            }

            trace!("rate limiter: waiting {wait:?} for {n} bytes");
            tokio::select! {
                biased;
                cause = ctx.done() => {
                    self.release(n);
                    Err(Error::Canceled(cause))
                }
                _ = tokio::time::sleep(wait) => Ok(()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::CancelCause;

    fn nz(value: u64) -> NonZeroU64 {
        NonZeroU64::new(value).expect("non-zero value required")
    }

    #[test]
    fn test_defaults_burst_to_rate() {
        let bucket = TokenBucket::new(nz(4096));
        assert_eq!(bucket.limit(), 4096);
        assert_eq!(bucket.burst(), 4096);

        let bucket = TokenBucket::with_burst(nz(4096), Some(nz(512)));
        assert_eq!(bucket.burst(), 512);
    }

    #[tokio::test(start_paused = true)]
    async fn test_within_burst_is_immediate() {
        let bucket = TokenBucket::new(nz(1000));
        let ctx = Context::background();
        let start = Instant::now();

        bucket.acquire(1000, &ctx).await.unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paces_to_rate() {
        let bucket = TokenBucket::new(nz(1000));
        let ctx = Context::background();
        let start = Instant::now();

        // First second comes out of the burst, the next two are paced
        for _ in 0..3 {
            bucket.acquire(1000, &ctx).await.unwrap();
        }

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2), "elapsed: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(2100), "elapsed: {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_request_is_paced_not_rejected() {
        let bucket = TokenBucket::new(nz(1000));
        let ctx = Context::background();
        let start = Instant::now();

        bucket.acquire(3000, &ctx).await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_canceled_context_fails_fast() {
        let bucket = TokenBucket::new(nz(1));
        let ctx = Context::background();
        ctx.cancel();

        let err = bucket.acquire(1_000_000, &ctx).await.unwrap_err();
        assert_eq!(err.cancel_cause(), Some(CancelCause::Canceled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_wait_returns_tokens() {
        let bucket = TokenBucket::new(nz(1000));
        let ctx = Context::background();

        bucket.acquire(1000, &ctx).await.unwrap();

        let canceler = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                ctx.cancel();
            })
        };

        let err = bucket.acquire(5000, &ctx).await.unwrap_err();
        canceler.await.unwrap();

        assert!(err.is_canceled());
        // Only the ~100 ms of refill is left; the canceled 5000 went back
        let tokens = bucket.tokens();
        assert!((0.0..=200.0).contains(&tokens), "tokens: {tokens}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_limit_changes_pace() {
        let bucket = TokenBucket::new(nz(1000));
        let ctx = Context::background();
        bucket.acquire(1000, &ctx).await.unwrap();

        bucket.set_limit(nz(10_000));
        let start = Instant::now();
        bucket.acquire(1000, &ctx).await.unwrap();

        assert_eq!(bucket.limit(), 10_000);
        assert!(start.elapsed() <= Duration::from_millis(110));
    }
}
