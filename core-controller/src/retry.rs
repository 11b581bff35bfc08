//! What happens to a key after a reconcile attempt.

use core_async::time::Duration;

use crate::error::ReconcileError;
use crate::queue::{QueueKey, RateLimitingQueue};

/// Default number of requeues before a failing key is dropped.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

#[derive(Debug)]
pub enum RetryDecision {
    /// Success. The key's failure history was cleared.
    Forgotten,
    /// Failure within budget. The key comes back after `delay`.
    Requeued { attempt: u32, delay: Duration },
    /// Failure with the budget exhausted. The key is forgotten and stays
    /// out of the queue until the next change notification.
    Dropped { attempts: u32, error: ReconcileError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Applies the outcome of one reconcile of `key` to `queue`.
    ///
    /// A key that keeps failing is attempted `max_retries + 1` times in
    /// total before it is dropped.
    pub fn handle<K: QueueKey>(
        &self,
        queue: &RateLimitingQueue<K>,
        key: &K,
        result: Result<(), ReconcileError>,
    ) -> RetryDecision {
        let error = match result {
            Ok(()) => {
                queue.forget(key);
                return RetryDecision::Forgotten;
            }
            Err(error) => error,
        };

        let requeues = queue.num_requeues(key);
        if requeues < self.max_retries {
            let delay = queue.add_rate_limited(key.clone());
            RetryDecision::Requeued {
                attempt: requeues + 1,
                delay,
            }
        } else {
            queue.forget(key);
            RetryDecision::Dropped {
                attempts: requeues + 1,
                error,
            }
        }
    }
}
