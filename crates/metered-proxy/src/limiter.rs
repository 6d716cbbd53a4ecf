use governor::{
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::time::Duration;

const DEFAULT_CAPACITY: NonZeroU32 = match NonZeroU32::new(5) {
    Some(n) => n,
    None => unreachable!(),
};

/// Token bucket parameters shared by every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSettings {
    /// Burst size: tokens available to a fresh bucket.
    pub capacity: NonZeroU32,
    /// Time to regain one token.
    pub refill_interval: Duration,
}

impl Default for BucketSettings {
    /// 5 tokens, refilled at 2 per second.
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            refill_interval: Duration::from_millis(500),
        }
    }
}

/// Non-blocking token bucket owned by a single session.
pub struct TokenBucket<C: Clock = DefaultClock> {
    limiter: RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<C::Instant>>,
}

impl TokenBucket<DefaultClock> {
    pub fn new(settings: BucketSettings) -> Self {
        Self::with_clock(settings, DefaultClock::default())
    }
}

impl<C: Clock> TokenBucket<C> {
    pub fn with_clock(settings: BucketSettings, clock: C) -> Self {
        let quota = Quota::with_period(settings.refill_interval)
            .unwrap_or_else(|| Quota::per_second(settings.capacity))
            .allow_burst(settings.capacity);
        Self {
            limiter: RateLimiter::direct_with_clock(quota, clock),
        }
    }

    /// Take one token if one is available.
    pub fn allow(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl<C: Clock> std::fmt::Debug for TokenBucket<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor::clock::FakeRelativeClock;

    #[test]
    fn test_burst_then_deny() {
        let clock = FakeRelativeClock::default();
        let bucket = TokenBucket::with_clock(BucketSettings::default(), clock.clone());

        for i in 0..5 {
            assert!(bucket.allow(), "request {} should pass", i + 1);
        }
        assert!(!bucket.allow(), "6th request should be denied");
    }

    #[test]
    fn test_half_second_refills_one_token() {
        let clock = FakeRelativeClock::default();
        let bucket = TokenBucket::with_clock(BucketSettings::default(), clock.clone());

        for _ in 0..5 {
            assert!(bucket.allow());
        }
        assert!(!bucket.allow());

        clock.advance(Duration::from_millis(500));
        assert!(bucket.allow());
        assert!(!bucket.allow());
    }

    #[test]
    fn test_refill_caps_at_capacity() {
        let clock = FakeRelativeClock::default();
        let bucket = TokenBucket::with_clock(BucketSettings::default(), clock.clone());

        for _ in 0..5 {
            assert!(bucket.allow());
        }
        clock.advance(Duration::from_secs(60));

        let passed = (0..10).filter(|_| bucket.allow()).count();
        assert_eq!(passed, 5);
    }

    #[test]
    fn test_idle_bucket_bursts_capacity_only() {
        let clock = FakeRelativeClock::default();
        let bucket = TokenBucket::with_clock(BucketSettings::default(), clock.clone());

        for round in 0..3 {
            let passed = (0..10).filter(|_| bucket.allow()).count();
            assert_eq!(passed, 5, "round {round} after idle");
            clock.advance(Duration::from_secs(4));
        }
    }

    #[test]
    fn test_buckets_are_independent() {
        let clock = FakeRelativeClock::default();
        let settings = BucketSettings {
            capacity: NonZeroU32::new(1).unwrap(),
            refill_interval: Duration::from_secs(1),
        };
        let first = TokenBucket::with_clock(settings, clock.clone());
        let second = TokenBucket::with_clock(settings, clock.clone());

        assert!(first.allow());
        assert!(!first.allow());
        assert!(second.allow());
    }
}
