//! # Host Bridge Traits
//!
//! Contracts between the reconciler core and the outside world.
//!
//! ## Overview
//!
//! The core never talks to an orchestration API directly. Everything it
//! consumes from its environment is expressed as a trait here, and concrete
//! adapters live in separate crates (`bridge-memory` ships an in-process
//! implementation used for local runs and tests).
//!
//! ## Traits
//!
//! - [`ResourceSource`](source::ResourceSource) - Bulk listing plus a resumable
//!   change stream for one resource collection
//! - [`Resource`](resource::Resource) - Anything carrying [`ObjectMeta`]
//!   (name, namespace, version token)
//! - [`LoggerSink`](log_sink::LoggerSink) - Forward structured logs to host
//!   logging
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Adapters should
//! map "the requested version is no longer retained" to
//! [`BridgeError::Expired`] so the core knows to relist instead of resuming.
//!
//! ## Thread Safety
//!
//! Every trait requires `Send + Sync` so implementations can be shared across
//! the reflector task and the worker pool.
//!
//! ## Example
//!
//! ```ignore
//! use bridge_traits::{ListParams, ObjectList, ResourceSource, ResourceVersion, WatchStream};
//! use async_trait::async_trait;
//!
//! struct ApiSource { client: ApiClient }
//!
//! #[async_trait]
//! impl ResourceSource<Deployment> for ApiSource {
//!     async fn list(&self, params: &ListParams) -> bridge_traits::Result<ObjectList<Deployment>> {
//!         todo!()
//!     }
//!
//!     async fn watch(
//!         &self,
//!         params: &ListParams,
//!         since: ResourceVersion,
//!     ) -> bridge_traits::Result<WatchStream<Deployment>> {
//!         todo!()
//!     }
//! }
//! ```

pub mod error;
pub mod log_sink;
pub mod resource;
pub mod source;

pub use error::{BridgeError, Result};

pub use log_sink::{ConsoleLogger, LogEntry, LogLevel, LoggerSink};
pub use resource::{ObjectMeta, Resource, ResourceVersion};
pub use source::{DeletedObject, ListParams, ObjectList, ResourceSource, WatchEvent, WatchStream};
