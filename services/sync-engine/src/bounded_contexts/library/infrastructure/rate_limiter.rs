use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio::time::Instant;

pub const DEFAULT_CAPACITY: f64 = 20.0;
pub const DEFAULT_REFILL_RATE: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    RateLimited,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-user token bucket guarding the play-recording ingress. State is
/// process-local; a multi-process deployment accepts the per-process
/// approximation.
pub struct PlayRateLimiter {
    buckets: RwLock<HashMap<String, Bucket>>,
    capacity: f64,
    refill_rate: f64,
}

impl PlayRateLimiter {
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            capacity: capacity.max(1.0),
            refill_rate: refill_rate.max(0.0),
        }
    }

    /// Refill by elapsed time (capped at capacity), then take one token.
    pub async fn check(&self, user_id: &str) -> RateLimitDecision {
        let mut buckets = self.buckets.write().await;
        let now = Instant::now();

        let bucket = buckets.entry(user_id.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed_ms = now.duration_since(bucket.last_refill).as_millis() as f64;
        bucket.tokens =
            (bucket.tokens + elapsed_ms * self.refill_rate / 1000.0).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateLimitDecision::Allowed
        } else {
            RateLimitDecision::RateLimited
        }
    }

    /// Drop buckets that have fully refilled; they carry no information.
    pub async fn cleanup(&self) {
        let mut buckets = self.buckets.write().await;
        let now = Instant::now();
        let capacity = self.capacity;
        let refill_rate = self.refill_rate;
        buckets.retain(|_, bucket| {
            let elapsed_ms = now.duration_since(bucket.last_refill).as_millis() as f64;
            bucket.tokens + elapsed_ms * refill_rate / 1000.0 < capacity
        });
    }

    pub async fn tracked_users(&self) -> usize {
        self.buckets.read().await.len()
    }
}

impl Default for PlayRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_REFILL_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn burst_up_to_capacity_then_limited() {
        let limiter = PlayRateLimiter::new(5.0, 0.0);
        for _ in 0..5 {
            assert_eq!(limiter.check("u1").await, RateLimitDecision::Allowed);
        }
        assert_eq!(limiter.check("u1").await, RateLimitDecision::RateLimited);
    }

    #[tokio::test]
    async fn users_have_independent_buckets() {
        let limiter = PlayRateLimiter::new(1.0, 0.0);
        assert_eq!(limiter.check("u1").await, RateLimitDecision::Allowed);
        assert_eq!(limiter.check("u1").await, RateLimitDecision::RateLimited);
        assert_eq!(limiter.check("u2").await, RateLimitDecision::Allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_refill_over_time() {
        let limiter = PlayRateLimiter::new(2.0, 10.0);
        assert_eq!(limiter.check("u1").await, RateLimitDecision::Allowed);
        assert_eq!(limiter.check("u1").await, RateLimitDecision::Allowed);
        assert_eq!(limiter.check("u1").await, RateLimitDecision::RateLimited);

        // 10 tokens/sec: 100ms buys one token back.
        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(limiter.check("u1").await, RateLimitDecision::Allowed);
        assert_eq!(limiter.check("u1").await, RateLimitDecision::RateLimited);
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_capped_at_capacity() {
        let limiter = PlayRateLimiter::new(3.0, 10.0);
        for _ in 0..3 {
            limiter.check("u1").await;
        }
        tokio::time::advance(Duration::from_secs(3600)).await;
        for _ in 0..3 {
            assert_eq!(limiter.check("u1").await, RateLimitDecision::Allowed);
        }
        assert_eq!(limiter.check("u1").await, RateLimitDecision::RateLimited);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_drops_full_buckets() {
        let limiter = PlayRateLimiter::new(2.0, 10.0);
        limiter.check("u1").await;
        assert_eq!(limiter.tracked_users().await, 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        limiter.cleanup().await;
        assert_eq!(limiter.tracked_users().await, 0);
    }
}
