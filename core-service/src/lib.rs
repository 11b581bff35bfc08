//! Core service façade and bootstrap helpers.
//!
//! This crate wires a host-provided [`ResourceSource`](bridge_traits::ResourceSource)
//! and a [`Reconciler`](core_controller::Reconciler) into a running control
//! loop. One [`ControllerService`] owns one informer and one worker pool;
//! hosts that watch several kinds build one service per kind and share an
//! [`EventBus`](core_runtime::events::EventBus) between them.
//!
//! ```ignore
//! core_service::init_logging(LoggingConfig::default())?;
//!
//! let deployments = ControllerService::builder(deployment_config)
//!     .source(Arc::new(deployment_source))
//!     .reconciler(Arc::new(DeploymentReconciler))
//!     .build()?;
//! let services = ControllerService::builder(service_config)
//!     .source(Arc::new(service_source))
//!     .reconciler(Arc::new(ServiceReconciler))
//!     .event_bus(deployments.events().clone())
//!     .build()?;
//!
//! deployments.start()?;
//! services.start()?;
//! let cancel = CancellationToken::new();
//! wait_for_cache_sync(&[deployments.sync_gate(), services.sync_gate()], &cancel).await;
//! ```

pub mod error;
pub mod service;

pub use error::{CoreError, Result};
pub use service::{ControllerService, ControllerServiceBuilder};

pub use core_runtime::config::ControllerConfig;
pub use core_runtime::logging::{init_logging, LoggingConfig};
