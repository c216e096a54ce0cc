//! Token-bucket rate limiting for outgoing Slack calls.
//!
//! Tiers mirror Slack's published rate-limit classes. Every pagination loop
//! that can issue more than one call within a refresh waits on a bucket
//! between pages; waits are plain `await`s, so dropping the future cancels
//! the wait.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Tier {
    /// One token replenished every `period`.
    period: Duration,
    burst: u32,
}

impl Tier {
    pub const fn new(period: Duration, burst: u32) -> Self {
        Self { period, burst }
    }

    pub fn limiter(&self) -> RateLimiter {
        RateLimiter::new(self.period, self.burst)
    }
}

/// Outer channel-list pagination loops.
pub const TIER2_BOOST: Tier = Tier::new(Duration::from_millis(300), 5);
/// Heavier request classes than listing.
pub const TIER3: Tier = Tier::new(Duration::from_millis(1200), 4);

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<BucketState>,
    period: Duration,
    capacity: f64,
}

impl RateLimiter {
    pub fn new(period: Duration, burst: u32) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: burst as f64,
                last_refill: Instant::now(),
            }),
            period,
            capacity: burst as f64,
        }
    }

    /// Take one token, sleeping until one is available.
    pub async fn wait(&self) {
        loop {
            let delay = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.last_refill = now;
                let rate = 1.0 / self.period.as_secs_f64();
                state.tokens = (state.tokens + elapsed * rate).min(self.capacity);

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    Some(Duration::from_secs_f64((1.0 - state.tokens) / rate))
                }
            };

            match delay {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }

    /// Non-blocking variant, used by tests.
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.last_refill = now;
        let rate = 1.0 / self.period.as_secs_f64();
        state.tokens = (state.tokens + elapsed * rate).min(self.capacity);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_is_immediately_available() {
        let limiter = TIER2_BOOST.limiter();
        for _ in 0..5 {
            assert!(limiter.try_acquire().await);
        }
        assert!(!limiter.try_acquire().await);
    }

    #[tokio::test]
    async fn tier3_burst_is_four() {
        let limiter = TIER3.limiter();
        for _ in 0..4 {
            assert!(limiter.try_acquire().await);
        }
        assert!(!limiter.try_acquire().await);
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_replenish_over_time() {
        let limiter = TIER2_BOOST.limiter();
        for _ in 0..5 {
            assert!(limiter.try_acquire().await);
        }
        assert!(!limiter.try_acquire().await);

        tokio::time::advance(Duration::from_millis(301)).await;
        assert!(limiter.try_acquire().await);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_sleeps_until_a_token_is_free() {
        let limiter = RateLimiter::new(Duration::from_millis(100), 1);
        limiter.wait().await;

        let start = Instant::now();
        limiter.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(99));
    }
}
