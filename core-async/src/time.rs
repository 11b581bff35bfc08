//! Time-related abstractions.
//!
//! `Instant` is tokio's monotonic instant rather than `std::time::Instant`, so
//! deadlines computed by the work queue follow the runtime clock. Under a
//! paused clock (`test-util` feature) those deadlines advance together with
//! `sleep`.
//!
//! # Examples
//!
//! ```rust
//! use core_async::time::{sleep, Duration, Instant};
//!
//! async fn example() {
//!     let start = Instant::now();
//!     sleep(Duration::from_millis(10)).await;
//!     assert!(start.elapsed() >= Duration::from_millis(10));
//! }
//! ```

pub use tokio::time::{
    error::Elapsed, interval, interval_at, sleep, sleep_until, timeout, Instant, Interval, MissedTickBehavior,
    Sleep, Timeout,
};

pub use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[cfg(feature = "test-util")]
pub use tokio::time::{advance, pause, resume};

/// Returns the current wall-clock time as milliseconds since UNIX_EPOCH.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Multiplies `base` by `2^exponent`, saturating at `max`.
///
/// Shared by every exponential backoff in the workspace (per-item requeue
/// delays, reflector relist backoff) so they all cap the same way and never
/// overflow for large exponents.
///
/// # Examples
///
/// ```rust
/// use core_async::time::{exponential_delay, Duration};
///
/// let base = Duration::from_millis(5);
/// let max = Duration::from_secs(1);
/// assert_eq!(exponential_delay(base, 0, max), Duration::from_millis(5));
/// assert_eq!(exponential_delay(base, 3, max), Duration::from_millis(40));
/// assert_eq!(exponential_delay(base, 40, max), max);
/// ```
pub fn exponential_delay(base: Duration, exponent: u32, max: Duration) -> Duration {
    let factor = match 2u32.checked_pow(exponent) {
        Some(factor) => factor,
        None => return max,
    };
    match base.checked_mul(factor) {
        Some(delay) if delay < max => delay,
        _ => max,
    }
}
