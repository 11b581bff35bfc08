//! Runtime utilities that abstract over the underlying async executor.
//!
//! These are the functions the `#[core_async::test]` and `#[core_async::main]`
//! attribute macros expand to.

pub use tokio::runtime::{Builder, Handle, Runtime};

/// Runs the provided future to completion on a fresh current-thread runtime.
pub fn block_on<F>(future: F) -> F::Output
where
    F: std::future::Future,
{
    Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("core_async::runtime::block_on: failed to build Tokio runtime")
        .block_on(future)
}

/// Runs the provided future on a multi-thread runtime.
///
/// Spawned tasks run in parallel on the worker threads, which is what the
/// controller's worker pool uses in production.
pub fn block_on_multi_thread<F>(future: F) -> F::Output
where
    F: std::future::Future,
{
    Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("core_async::runtime::block_on_multi_thread: failed to build Tokio runtime")
        .block_on(future)
}

/// Runs the provided future on a current-thread runtime whose clock starts
/// paused.
///
/// Timers auto-advance whenever every task is idle, so backoff schedules can
/// be asserted exactly without real sleeping.
#[cfg(feature = "test-util")]
pub fn block_on_paused<F>(future: F) -> F::Output
where
    F: std::future::Future,
{
    Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .expect("core_async::runtime::block_on_paused: failed to build Tokio runtime")
        .block_on(future)
}
