//! # Reflector
//!
//! The list/watch loop that keeps a [`Store`] equal to the remote collection.
//!
//! ## Protocol
//!
//! 1. **List** the collection and install the snapshot with
//!    [`Store::replace`]. Dispatch the resulting notifications, then open
//!    the sync gate (first time only).
//! 2. **Watch** from the store's version. Each change goes through
//!    [`Store::apply`]; applied changes are dispatched in order.
//! 3. When the stream **ends** (server timeout, connection reset), watch
//!    again from the store's current version.
//! 4. When the source reports the version **expired**, go back to 1.
//! 5. Failed list or watch calls are retried with exponential backoff.
//!
//! With a resync period configured, every cached object is re-delivered as
//! an `Updated { old, new }` pair where `old` and `new` are the same object.
//!
//! Cancellation is checked at every await point; in-flight source calls are
//! dropped.

use bridge_traits::{BridgeError, ListParams, Resource, ResourceSource, ResourceVersion};
use core_async::stream::StreamExt;
use core_async::sync::CancellationToken;
use core_async::time::{exponential_delay, interval_at, sleep, Duration, Instant, Interval, MissedTickBehavior};
use core_runtime::config::ReflectorConfig;
use core_runtime::events::{CacheEvent, ControllerEvent, EventBus};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::informer::Handlers;
use crate::store::{Store, StoreEvent};
use crate::sync_gate::SyncGate;

pub(crate) struct Reflector<R: Resource> {
    pub(crate) name: String,
    pub(crate) source: Arc<dyn ResourceSource<R>>,
    pub(crate) params: ListParams,
    pub(crate) config: ReflectorConfig,
    pub(crate) store: Store<R>,
    pub(crate) sync_gate: SyncGate,
    pub(crate) handlers: Arc<Handlers<R>>,
    pub(crate) events: EventBus,
}

enum WatchOutcome {
    Cancelled,
    Relist,
}

impl<R: Resource> Reflector<R> {
    #[instrument(name = "reflector", skip_all, fields(controller = %self.name, kind = R::KIND))]
    pub(crate) async fn run(self, cancel: CancellationToken) -> Result<()> {
        // A period too long to schedule never fires, so it means no resync.
        let mut resync = self.config.resync_period.and_then(|period| {
            let first = Instant::now().checked_add(period)?;
            let mut ticker = interval_at(first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(ticker)
        });
        let mut list_failures = 0u32;

        loop {
            let listed = core_async::select! {
                _ = cancel.cancelled() => return Ok(()),
                listed = self.source.list(&self.params) => listed,
            };

            let snapshot = match listed {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    let delay = self.backoff(list_failures);
                    list_failures = list_failures.saturating_add(1);
                    warn!(error = %err, retry_in_ms = delay.as_millis() as u64, "List failed");
                    self.emit(CacheEvent::ListFailed {
                        controller: self.name.clone(),
                        message: err.to_string(),
                        retry_in_ms: delay.as_millis() as u64,
                    });
                    if !self.pause(delay, &cancel).await {
                        return Ok(());
                    }
                    continue;
                }
            };
            list_failures = 0;

            let objects = snapshot.items.len();
            let version = snapshot.resource_version;
            let changes = self.store.replace(snapshot.items, version);
            debug!(objects, changes = changes.len(), version = %version, "Installed snapshot");
            self.handlers.dispatch(&changes);

            if self.sync_gate.has_synced() {
                info!(objects, version = %version, "Relisted");
                self.emit(CacheEvent::Relisted {
                    controller: self.name.clone(),
                    objects,
                    resource_version: version.get(),
                });
            } else {
                self.sync_gate.mark_synced();
                info!(objects, version = %version, "Cache synced");
                self.emit(CacheEvent::Synced {
                    controller: self.name.clone(),
                    objects,
                    resource_version: version.get(),
                });
            }

            match self.watch(&cancel, &mut resync).await {
                WatchOutcome::Cancelled => return Ok(()),
                WatchOutcome::Relist => continue,
            }
        }
    }

    /// Follows the change stream until it has to relist or is cancelled.
    async fn watch(&self, cancel: &CancellationToken, resync: &mut Option<Interval>) -> WatchOutcome {
        let mut failures = 0u32;

        loop {
            let since = self.store.resource_version();
            let opened = core_async::select! {
                _ = cancel.cancelled() => return WatchOutcome::Cancelled,
                opened = self.source.watch(&self.params, since) => opened,
            };

            let mut stream = match opened {
                Ok(stream) => stream,
                Err(err) if err.requires_relist() => {
                    self.expired(since, &err);
                    return WatchOutcome::Relist;
                }
                Err(err) => {
                    let delay = self.backoff(failures);
                    failures = failures.saturating_add(1);
                    warn!(error = %err, since = %since, retry_in_ms = delay.as_millis() as u64, "Watch failed");
                    if !self.pause(delay, cancel).await {
                        return WatchOutcome::Cancelled;
                    }
                    continue;
                }
            };
            debug!(since = %since, "Watch started");

            loop {
                core_async::select! {
                    biased;
                    _ = cancel.cancelled() => return WatchOutcome::Cancelled,
                    _ = tick(resync) => self.resync(),
                    next = stream.next() => match next {
                        Some(Ok(event)) => {
                            failures = 0;
                            if let Some(change) = self.store.apply(event) {
                                self.handlers.dispatch(std::slice::from_ref(&change));
                            }
                        }
                        Some(Err(err)) if err.requires_relist() => {
                            self.expired(self.store.resource_version(), &err);
                            return WatchOutcome::Relist;
                        }
                        Some(Err(err)) => {
                            let delay = self.backoff(failures);
                            failures = failures.saturating_add(1);
                            warn!(error = %err, retry_in_ms = delay.as_millis() as u64, "Watch stream error");
                            if !self.pause(delay, cancel).await {
                                return WatchOutcome::Cancelled;
                            }
                            break;
                        }
                        None => {
                            let version = self.store.resource_version();
                            debug!(version = %version, "Watch stream ended, resuming");
                            self.emit(CacheEvent::WatchRestarted {
                                controller: self.name.clone(),
                                resource_version: version.get(),
                            });
                            break;
                        }
                    },
                }
            }
        }
    }

    fn resync(&self) {
        let objects = self.store.list();
        debug!(objects = objects.len(), "Resync");
        let changes: Vec<StoreEvent<R>> = objects
            .into_iter()
            .map(|object| StoreEvent::Updated {
                old: Arc::clone(&object),
                new: object,
            })
            .collect();
        self.handlers.dispatch(&changes);
    }

    fn expired(&self, requested: ResourceVersion, err: &BridgeError) {
        warn!(error = %err, requested = %requested, "Watch history expired, relisting");
        self.emit(CacheEvent::WatchExpired {
            controller: self.name.clone(),
            requested: requested.get(),
        });
    }

    fn backoff(&self, failures: u32) -> Duration {
        exponential_delay(self.config.min_backoff, failures, self.config.max_backoff)
    }

    /// Sleeps for `delay`. Returns `false` if cancelled first.
    async fn pause(&self, delay: Duration, cancel: &CancellationToken) -> bool {
        core_async::select! {
            _ = cancel.cancelled() => false,
            _ = sleep(delay) => true,
        }
    }

    fn emit(&self, event: CacheEvent) {
        self.events.emit(ControllerEvent::Cache(event)).ok();
    }
}

async fn tick(resync: &mut Option<Interval>) {
    match resync {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
