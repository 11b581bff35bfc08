//! Synchronization primitives.
//!
//! Async-aware primitives come from `tokio::sync`; cooperative cancellation
//! uses `tokio_util`'s `CancellationToken`, which every long-running loop in
//! the workspace (reflector, worker pool, sync gate waits) accepts.
//!
//! # Examples
//!
//! ```rust
//! use core_async::sync::{CancellationToken, Notify};
//!
//! async fn example(notify: &Notify, cancel: &CancellationToken) -> bool {
//!     core_async::select! {
//!         _ = notify.notified() => true,
//!         _ = cancel.cancelled() => false,
//!     }
//! }
//! ```

pub use tokio::sync::{
    broadcast, mpsc, oneshot, watch, Barrier, Mutex, MutexGuard, Notify, RwLock, RwLockReadGuard,
    RwLockWriteGuard, Semaphore, SemaphorePermit,
};

pub use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFuture};
