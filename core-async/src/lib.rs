//! Runtime abstraction layer for the reconciler core.
//!
//! Every core-* and bridge-* crate reaches the async runtime through this
//! crate instead of depending on tokio directly. That keeps one place to pin
//! runtime features (paused clocks for tests, multi-thread flavour for the
//! worker pool) and one vocabulary for spawning, timers and synchronization.
//!
//! # Modules
//!
//! - `task`: Task spawning and join sets
//! - `time`: Timers and the monotonic `Instant` used for backoff deadlines
//! - `sync`: Synchronization primitives and cancellation tokens
//! - `stream`: Boxed streams used for watch subscriptions
//! - `runtime`: Entry points that drive a future to completion
//!
//! # Examples
//!
//! ```rust
//! use core_async::task;
//! use core_async::time::{sleep, Duration};
//!
//! async fn example() {
//!     let handle = task::spawn(async {
//!         sleep(Duration::from_millis(5)).await;
//!         42
//!     });
//!     assert_eq!(handle.await.unwrap(), 42);
//! }
//! ```

// Re-export the async entry-point/test macros so downstream crates never need
// direct Tokio dependencies.
pub use core_async_macros::{main, test};

pub mod runtime;
pub mod stream;
pub mod sync;
pub mod task;
pub mod time;

pub use task::spawn;
pub use time::{sleep, Duration, Instant};

/// Waits on several branches at once, see `tokio::select!`.
pub use tokio::select;
