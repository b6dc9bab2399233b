//! Per-cluster outbound token bucket. `acquire` is a plain future, so callers
//! cancel it by dropping (e.g. under `tokio::time::timeout` or `select!`).

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket with a fixed refill rate and burst capacity.
#[derive(Debug)]
pub struct RateLimiter {
    rate_per_sec: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            rate_per_sec: rate_per_sec.max(0.1),
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Takes one token if immediately available.
    pub fn try_acquire(&self) -> bool {
        self.take_or_wait().is_none()
    }

    /// Waits until a token is available, then takes it.
    pub async fn acquire(&self) {
        loop {
            match self.take_or_wait() {
                None => return,
                Some(wait) => tokio::time::sleep(wait).await,
            }
        }
    }

    /// `None` when a token was taken; otherwise how long until one exists.
    fn take_or_wait(&self) -> Option<Duration> {
        let mut bucket = self.bucket.lock().unwrap();
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.burst);
        bucket.last_refill = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            None
        } else {
            let missing = 1.0 - bucket.tokens;
            Some(Duration::from_secs_f64(missing / self.rate_per_sec))
        }
    }

    /// Tokens currently available (for status endpoints).
    pub fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().unwrap();
        let elapsed = bucket.last_refill.elapsed().as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.burst);
        bucket.last_refill = Instant::now();
        bucket.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_empty() {
        let limiter = RateLimiter::new(1.0, 3);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn refills_over_time() {
        let limiter = RateLimiter::new(100.0, 1);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(limiter.try_acquire());
    }

    #[tokio::test]
    async fn acquire_is_cancellable() {
        let limiter = RateLimiter::new(0.1, 1);
        assert!(limiter.try_acquire());
        let cancelled = tokio::time::timeout(Duration::from_millis(20), limiter.acquire()).await;
        assert!(cancelled.is_err());
        // Bucket is untouched by the cancelled waiter.
        assert!(limiter.available() < 1.0);
    }
}
