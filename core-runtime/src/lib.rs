//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by the controller crates:
//! - Logging and tracing setup
//! - Controller configuration (worker pool, retry budget, backoff shape,
//!   reflector timings)
//! - Event bus for cache and reconcile lifecycle events
//!
//! Nothing in here reads ambient globals; every setting travels inside an
//! explicit [`config::ControllerConfig`].

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
