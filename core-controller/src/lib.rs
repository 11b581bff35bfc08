//! # Reconciliation Controller Core
//!
//! Event-driven control loop that mirrors a remote collection locally and
//! reconciles each object whenever it changes.
//!
//! ## Overview
//!
//! ```text
//! ResourceSource ──list/watch──> Reflector ──apply──> Store
//!                                    │
//!                                    └──notify──> ChangeRouter ──add──> RateLimitingQueue
//!                                                                            │
//!                        ┌──────────── retry / forget ───────────────────────┤
//!                        │                                                   v
//!                   RetryPolicy <── reconcile(key, object) <── Controller workers
//! ```
//!
//! ## Components
//!
//! - **Store** (`store`): key to object mirror with a namespace index
//! - **Informer** (`informer`): owns the store, sync gate and handlers; runs
//!   the reflector (`reflector`)
//! - **Change Router** (`router`): turns store notifications into queue keys
//! - **Work Queue** (`queue`, `rate_limiter`): deduplicating, single-flight,
//!   rate-limited
//! - **Controller** (`controller`, `retry`): worker pool plus retry budget
//! - **Sync Gate** (`sync_gate`): blocks workers until the first snapshot is in

pub mod controller;
pub mod error;
pub mod informer;
pub mod key;
pub mod queue;
pub mod rate_limiter;
mod reflector;
pub mod retry;
pub mod router;
pub mod store;
pub mod sync_gate;

pub use controller::{Controller, Reconciler};
pub use error::{ControllerError, ReconcileError, Result};
pub use informer::{EventHandler, Informer};
pub use key::{deletion_handling_key, ObjectKey};
pub use queue::{QueueKey, QueueStats, RateLimitingQueue, WorkQueue};
pub use rate_limiter::{
    default_controller_rate_limiter, BucketRateLimiter, ItemExponentialFailureRateLimiter,
    MaxOfRateLimiter, RateLimiter,
};
pub use retry::{RetryDecision, RetryPolicy};
pub use router::{ChangeRouter, ResourceVersionChanged, UpdateFilter};
pub use store::{Store, StoreEvent};
pub use sync_gate::{wait_for_cache_sync, SyncGate};
