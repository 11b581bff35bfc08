//! # Informer
//!
//! Owns the local mirror of one collection, the sync gate that reports when
//! the mirror is first complete, and the event handlers that are told about
//! every change.
//!
//! ## Usage
//!
//! ```ignore
//! let informer = Arc::new(Informer::new(source, &config, events.clone()));
//! informer.add_event_handler(ChangeRouter::new(Arc::clone(&queue)));
//!
//! let cancel = CancellationToken::new();
//! let task = core_async::spawn({
//!     let informer = Arc::clone(&informer);
//!     let cancel = cancel.clone();
//!     async move { informer.run(cancel).await }
//! });
//!
//! informer.sync_gate().wait_until_synced(&cancel).await;
//! let deployments = informer.store().list_namespace("default");
//! ```
//!
//! Handlers run on the reflector task, in the order changes were applied.
//! They must not block; anything slow belongs behind the work queue.

use bridge_traits::{ListParams, Resource, ResourceSource};
use core_async::sync::CancellationToken;
use core_runtime::config::{ControllerConfig, ReflectorConfig};
use core_runtime::events::EventBus;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::error::Result;
use crate::reflector::Reflector;
use crate::store::{Store, StoreEvent};
use crate::sync_gate::SyncGate;

/// Receives store notifications.
pub trait EventHandler<R>: Send + Sync {
    fn handle(&self, event: &StoreEvent<R>);
}

impl<R, F> EventHandler<R> for F
where
    F: Fn(&StoreEvent<R>) + Send + Sync,
{
    fn handle(&self, event: &StoreEvent<R>) {
        self(event)
    }
}

/// Registered handlers, shared between the informer and its reflector.
pub(crate) struct Handlers<R> {
    handlers: RwLock<Vec<Arc<dyn EventHandler<R>>>>,
}

impl<R> Handlers<R> {
    fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn dispatch(&self, events: &[StoreEvent<R>]) {
        if events.is_empty() {
            return;
        }
        let handlers = self.handlers.read().clone();
        for event in events {
            for handler in &handlers {
                handler.handle(event);
            }
        }
    }
}

pub struct Informer<R: Resource> {
    name: String,
    source: Arc<dyn ResourceSource<R>>,
    params: ListParams,
    config: ReflectorConfig,
    store: Store<R>,
    sync_gate: SyncGate,
    handlers: Arc<Handlers<R>>,
    events: EventBus,
}

impl<R: Resource> Informer<R> {
    pub fn new(
        source: Arc<dyn ResourceSource<R>>,
        config: &ControllerConfig,
        events: EventBus,
    ) -> Self {
        Self {
            name: config.name.clone(),
            source,
            params: config.list_params(),
            config: config.reflector.clone(),
            store: Store::new(),
            sync_gate: SyncGate::new(),
            handlers: Arc::new(Handlers::new()),
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read-only view of the mirror. Clones share the same data.
    pub fn store(&self) -> Store<R> {
        self.store.clone()
    }

    pub fn sync_gate(&self) -> SyncGate {
        self.sync_gate.clone()
    }

    pub fn has_synced(&self) -> bool {
        self.sync_gate.has_synced()
    }

    /// Registers a handler. Handlers added after the initial sync only see
    /// later changes.
    pub fn add_event_handler(&self, handler: impl EventHandler<R> + 'static) {
        self.handlers.handlers.write().push(Arc::new(handler));
    }

    /// Runs list/watch until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        Reflector {
            name: self.name.clone(),
            source: Arc::clone(&self.source),
            params: self.params.clone(),
            config: self.config.clone(),
            store: self.store.clone(),
            sync_gate: self.sync_gate.clone(),
            handlers: Arc::clone(&self.handlers),
            events: self.events.clone(),
        }
        .run(cancel)
        .await
    }
}

impl<R: Resource> std::fmt::Debug for Informer<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Informer")
            .field("name", &self.name)
            .field("kind", &R::KIND)
            .field("params", &self.params)
            .field("store", &self.store)
            .field("synced", &self.has_synced())
            .finish()
    }
}
