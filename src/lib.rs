//! Workspace umbrella crate.
//!
//! Host applications can depend on `reconciler-workspace` and pick features
//! instead of wiring each crate individually:
//!
//! - `service` (default): the controller core and the service façade.
//! - `memory-source`: the in-process `ResourceSource` used for local runs and
//!   tests.

#[cfg(feature = "service")]
pub use core_controller as controller;
#[cfg(feature = "service")]
pub use core_service as service;

#[cfg(feature = "memory-source")]
pub use bridge_memory as memory;
