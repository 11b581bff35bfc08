//! Requeue delay policies.
//!
//! A [`RateLimiter`] decides how long a failing key waits before it is handed
//! out again. The default controller limiter is the maximum of a per-key
//! exponential backoff and an overall token bucket, so a single hot key backs
//! off on its own while a storm of failures is also throttled as a whole.

use core_async::time::{exponential_delay, Duration, Instant};
use core_runtime::config::RateLimiterConfig;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::queue::QueueKey;

pub trait RateLimiter<K>: Send + Sync {
    /// Delay before `key` may be processed again. Counts as one requeue.
    fn when(&self, key: &K) -> Duration;

    /// Drops all history for `key`.
    fn forget(&self, key: &K);

    /// Requeues recorded for `key` since it was last forgotten.
    fn num_requeues(&self, key: &K) -> u32;
}

/// `base * 2^failures`, capped at `max`.
pub struct ItemExponentialFailureRateLimiter<K> {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<K, u32>>,
}

impl<K: QueueKey> ItemExponentialFailureRateLimiter<K> {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: QueueKey> RateLimiter<K> for ItemExponentialFailureRateLimiter<K> {
    fn when(&self, key: &K) -> Duration {
        let mut failures = self.failures.lock();
        let count = failures.entry(key.clone()).or_insert(0);
        let exponent = *count;
        *count = count.saturating_add(1);
        exponential_delay(self.base, exponent, self.max)
    }

    fn forget(&self, key: &K) {
        self.failures.lock().remove(key);
    }

    fn num_requeues(&self, key: &K) -> u32 {
        self.failures.lock().get(key).copied().unwrap_or(0)
    }
}

struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Overall token bucket: `qps` tokens per second, at most `burst` banked.
///
/// Every `when` reserves a token; the delay is how long until that token
/// exists. Keys are not tracked individually.
pub struct BucketRateLimiter {
    qps: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl BucketRateLimiter {
    pub fn new(qps: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            qps,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }

    fn reserve(&self) -> Duration {
        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.qps).min(self.burst);
        bucket.last = now;
        bucket.tokens -= 1.0;

        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / self.qps)
        }
    }
}

impl<K> RateLimiter<K> for BucketRateLimiter {
    fn when(&self, _key: &K) -> Duration {
        self.reserve()
    }

    fn forget(&self, _key: &K) {}

    fn num_requeues(&self, _key: &K) -> u32 {
        0
    }
}

/// Longest delay across several limiters. Every limiter records the requeue.
pub struct MaxOfRateLimiter<K> {
    limiters: Vec<Box<dyn RateLimiter<K>>>,
}

impl<K> MaxOfRateLimiter<K> {
    pub fn new(limiters: Vec<Box<dyn RateLimiter<K>>>) -> Self {
        Self { limiters }
    }
}

impl<K> RateLimiter<K> for MaxOfRateLimiter<K> {
    fn when(&self, key: &K) -> Duration {
        self.limiters
            .iter()
            .map(|limiter| limiter.when(key))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn forget(&self, key: &K) {
        for limiter in &self.limiters {
            limiter.forget(key);
        }
    }

    fn num_requeues(&self, key: &K) -> u32 {
        self.limiters
            .iter()
            .map(|limiter| limiter.num_requeues(key))
            .max()
            .unwrap_or(0)
    }
}

/// Per-key exponential backoff combined with an overall bucket.
///
/// With the default [`RateLimiterConfig`] this is 5 ms doubling up to 1000 s
/// per key, and 10 requeues per second with a burst of 100 overall.
pub fn default_controller_rate_limiter<K: QueueKey>(
    config: &RateLimiterConfig,
) -> MaxOfRateLimiter<K> {
    MaxOfRateLimiter::new(vec![
        Box::new(ItemExponentialFailureRateLimiter::new(
            config.base_delay,
            config.max_delay,
        )),
        Box::new(BucketRateLimiter::new(config.qps, config.burst)),
    ])
}
