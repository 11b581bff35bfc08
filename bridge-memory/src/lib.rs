//! # In-Memory Bridge Implementation
//!
//! A [`ResourceSource`](bridge_traits::ResourceSource) that lives entirely in
//! process, for local runs, demos and tests.
//!
//! ## Components
//!
//! - **Source** (`source`): versioned object map with a bounded change log,
//!   live watch fan-out and fault injection hooks
//! - **Resources** (`resources`): sample `Deployment` and `Service` kinds
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_memory::{Deployment, InMemorySource};
//!
//! let source = InMemorySource::new();
//! source.create(Deployment::new("default", "web", 1))?;
//!
//! // Hand a clone to the controller and keep one to drive changes.
//! let informer = Informer::new(Arc::new(source.clone()), &config, events);
//! source.delete(Some("default"), "web")?;
//! ```

pub mod resources;
pub mod source;

pub use resources::{Deployment, Service, DEFAULT_IMAGE};
pub use source::{InMemorySource, DEFAULT_HISTORY_LIMIT};
