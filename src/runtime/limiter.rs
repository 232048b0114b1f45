// SPDX-License-Identifier: GPL-2.0-or-later

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Process wide token bucket. One token is taken immediately before each
/// wire send; `take` blocks until a token is available.
///
/// The internal lock is never held across the sleep.
pub struct RateLimiter {
    state: Option<Mutex<Bucket>>,
}

struct Bucket {
    tokens: f64,
    capacity: f64,
    per_second: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// A limiter allowing `per_second` requests per second with a burst
    /// of the same size. A rate of 0 disables limiting.
    pub fn new(per_second: usize) -> Self {
        if per_second == 0 {
            return Self { state: None };
        }
        Self {
            state: Some(Mutex::new(Bucket {
                tokens: per_second as f64,
                capacity: per_second as f64,
                per_second: per_second as f64,
                last_refill: Instant::now(),
            })),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Takes one token, waiting for the bucket to refill if necessary.
    pub async fn take(&self) {
        let Some(state) = &self.state else {
            return;
        };
        loop {
            let wait = {
                let mut bucket = state.lock().unwrap();
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * bucket.per_second).min(bucket.capacity);
                bucket.last_refill = now;
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / bucket.per_second)
            };
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_is_not_delayed() {
        let limiter = RateLimiter::new(100);
        let start = Instant::now();
        for _ in 0..50 {
            limiter.take().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_bucket_waits_for_refill() {
        let limiter = RateLimiter::new(10);
        for _ in 0..10 {
            limiter.take().await;
        }
        let start = Instant::now();
        limiter.take().await;
        // the 11th token needs roughly 100ms of refill
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn unlimited_never_blocks() {
        let limiter = RateLimiter::unlimited();
        for _ in 0..1000 {
            limiter.take().await;
        }
    }
}
