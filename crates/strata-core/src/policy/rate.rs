//! Per-capability token-bucket rate limiting.
//!
//! One bucket per capability id, refilled continuously at the declared rate,
//! with burst capacity equal to the rate. A single mutex covers the map
//! lookup and the bucket update, so concurrent consumptions for the same
//! capability linearize.
//!
//! # Memory
//!
//! Buckets are created lazily on first use. To keep the map bounded, an
//! insert that would grow the map past a threshold first sweeps buckets
//! that have been idle longer than [`STALE_BUCKET_AGE`]; revocation evicts
//! a capability's bucket eagerly via [`RateLimiter::evict`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::PolicyError;

/// Time source for bucket refill arithmetic, injectable for tests.
pub trait Clock: Send + Sync {
    /// Current time as a duration since a fixed arbitrary origin.
    fn now(&self) -> Duration;
}

/// Wall-clock time source used in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    /// Creates a clock at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the clock by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Buckets idle longer than this are dropped during the lazy sweep. A small
/// multiple of the longest plausible token TTL.
pub const STALE_BUCKET_AGE: Duration = Duration::from_secs(4 * 3600);

/// Map size past which an insert triggers the stale sweep.
const SWEEP_THRESHOLD: usize = 1024;

/// Parses a rate string of the form `<positive_number>rps` into
/// tokens/second.
#[must_use]
pub fn parse_rate(s: &str) -> Option<f64> {
    let n: f64 = s.trim().strip_suffix("rps")?.parse().ok()?;
    (n > 0.0 && n.is_finite()).then_some(n)
}

struct Bucket {
    tokens: f64,
    rate: f64,
    last: Duration,
}

/// Token-bucket rate limiter keyed by capability id.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    /// Creates a limiter on the given clock.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Consumes one token from the capability's bucket.
    ///
    /// An empty `rate_limit` means no limit. A non-empty but unparseable
    /// string also passes: enforcement fails open, and issuance is expected
    /// to reject malformed strings so no Strata-minted token carries one.
    ///
    /// # Errors
    ///
    /// Returns `ResourceExhausted` when the bucket is empty.
    pub fn check(&self, capability_id: &str, rate_limit: &str) -> Result<(), PolicyError> {
        if rate_limit.is_empty() {
            return Ok(());
        }
        let Some(rate) = parse_rate(rate_limit) else {
            return Ok(());
        };

        let now = self.clock.now();
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if !buckets.contains_key(capability_id) {
            if buckets.len() >= SWEEP_THRESHOLD {
                buckets.retain(|_, b| now.saturating_sub(b.last) < STALE_BUCKET_AGE);
            }
            buckets.insert(
                capability_id.to_string(),
                Bucket {
                    tokens: rate,
                    rate,
                    last: now,
                },
            );
        }
        let bucket = buckets
            .get_mut(capability_id)
            .expect("bucket inserted above");

        // Refill for the elapsed interval, capped at burst capacity.
        bucket.tokens += now.saturating_sub(bucket.last).as_secs_f64() * bucket.rate;
        if bucket.tokens > bucket.rate {
            bucket.tokens = bucket.rate;
        }
        bucket.last = now;

        if bucket.tokens < 1.0 {
            return Err(PolicyError::resource_exhausted("rate limit exceeded"));
        }
        bucket.tokens -= 1.0;
        Ok(())
    }

    /// Drops the bucket for a revoked capability.
    pub fn evict(&self, capability_id: &str) {
        self.buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(capability_id);
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::ErrorCode;

    fn limiter() -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::new(Arc::clone(&clock) as Arc<dyn Clock>);
        (clock, limiter)
    }

    #[test]
    fn parse_rate_accepts_positive_rps() {
        assert_eq!(parse_rate("50rps"), Some(50.0));
        assert_eq!(parse_rate(" 2rps "), Some(2.0));
        assert_eq!(parse_rate("0.5rps"), Some(0.5));
    }

    #[test]
    fn parse_rate_rejects_malformed() {
        for bad in ["", "rps", "0rps", "-1rps", "2rp", "fastrps", "infrps"] {
            assert_eq!(parse_rate(bad), None, "{bad}");
        }
    }

    #[test]
    fn empty_limit_is_unlimited() {
        let (_, limiter) = limiter();
        for _ in 0..1000 {
            limiter.check("cap", "").unwrap();
        }
        assert_eq!(limiter.tracked(), 0);
    }

    #[test]
    fn unparseable_limit_fails_open() {
        let (_, limiter) = limiter();
        for _ in 0..100 {
            limiter.check("cap", "garbage").unwrap();
        }
    }

    #[test]
    fn burst_then_exhausted() {
        let (_, limiter) = limiter();
        // N calls succeed with no time elapsed, the (N+1)-th is denied.
        for _ in 0..5 {
            limiter.check("cap", "5rps").unwrap();
        }
        let err = limiter.check("cap", "5rps").unwrap_err();
        assert_eq!(err.code, ErrorCode::ResourceExhausted);
    }

    #[test]
    fn refill_after_interval_allows_one() {
        let (clock, limiter) = limiter();
        limiter.check("cap", "2rps").unwrap();
        limiter.check("cap", "2rps").unwrap();
        limiter.check("cap", "2rps").unwrap_err();

        // 1/N seconds refills exactly one token.
        clock.advance(Duration::from_millis(500));
        limiter.check("cap", "2rps").unwrap();
        limiter.check("cap", "2rps").unwrap_err();
    }

    #[test]
    fn refill_caps_at_burst() {
        let (clock, limiter) = limiter();
        limiter.check("cap", "2rps").unwrap();
        clock.advance(Duration::from_secs(3600));
        // A long idle period must not accumulate more than `rate` tokens.
        limiter.check("cap", "2rps").unwrap();
        limiter.check("cap", "2rps").unwrap();
        limiter.check("cap", "2rps").unwrap_err();
    }

    #[test]
    fn buckets_are_independent_per_capability() {
        let (_, limiter) = limiter();
        limiter.check("a", "1rps").unwrap();
        limiter.check("a", "1rps").unwrap_err();
        limiter.check("b", "1rps").unwrap();
    }

    #[test]
    fn evict_frees_the_bucket() {
        let (_, limiter) = limiter();
        limiter.check("cap", "1rps").unwrap();
        assert_eq!(limiter.tracked(), 1);
        limiter.evict("cap");
        assert_eq!(limiter.tracked(), 0);
        // A fresh bucket starts with full burst again.
        limiter.check("cap", "1rps").unwrap();
    }

    #[test]
    fn stale_buckets_swept_on_insert_pressure() {
        let (clock, limiter) = limiter();
        for i in 0..SWEEP_THRESHOLD {
            limiter.check(&format!("cap{i}"), "1rps").unwrap();
        }
        assert_eq!(limiter.tracked(), SWEEP_THRESHOLD);

        clock.advance(STALE_BUCKET_AGE + Duration::from_secs(1));
        limiter.check("fresh", "1rps").unwrap();
        assert_eq!(limiter.tracked(), 1);
    }
}
