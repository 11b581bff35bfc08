//! Start/shutdown lifecycle for one informer plus its controller.

use bridge_traits::{Resource, ResourceSource};
use core_async::sync::CancellationToken;
use core_async::task::JoinHandle;
use core_controller::{
    ChangeRouter, Controller, ControllerError, Informer, ObjectKey, RateLimitingQueue, Reconciler,
    Store, SyncGate, UpdateFilter,
};
use core_runtime::config::ControllerConfig;
use core_runtime::events::{EventBus, EventStream};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info};

use crate::error::{CoreError, Result};

struct SharedFilter<R>(Arc<dyn UpdateFilter<R>>);

impl<R> UpdateFilter<R> for SharedFilter<R> {
    fn changed(&self, old: &R, new: &R) -> bool {
        self.0.changed(old, new)
    }
}

struct RunningTasks {
    informer: JoinHandle<core_controller::Result<()>>,
    controller: JoinHandle<core_controller::Result<()>>,
}

pub struct ControllerServiceBuilder<R: Resource> {
    config: ControllerConfig,
    source: Option<Arc<dyn ResourceSource<R>>>,
    reconciler: Option<Arc<dyn Reconciler<R>>>,
    filter: Option<Arc<dyn UpdateFilter<R>>>,
    events: Option<EventBus>,
}

impl<R: Resource> ControllerServiceBuilder<R> {
    pub fn source(mut self, source: Arc<dyn ResourceSource<R>>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn reconciler(mut self, reconciler: Arc<dyn Reconciler<R>>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    /// Skips updates the filter reports as unchanged. Adds and deletes are
    /// always enqueued.
    pub fn update_filter(mut self, filter: impl UpdateFilter<R> + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Publishes on an existing bus instead of creating one sized by
    /// `event_buffer_size`.
    pub fn event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<ControllerService<R>> {
        self.config.validate()?;

        let source = self.source.ok_or_else(|| CoreError::CapabilityMissing {
            capability: "resource_source".to_string(),
            message: format!("controller '{}' has no source to list and watch", self.config.name),
        })?;
        let reconciler = self.reconciler.ok_or_else(|| CoreError::CapabilityMissing {
            capability: "reconciler".to_string(),
            message: format!("controller '{}' has no reconcile function", self.config.name),
        })?;
        let events = self
            .events
            .unwrap_or_else(|| EventBus::new(self.config.event_buffer_size));

        let informer = Arc::new(Informer::new(source, &self.config, events.clone()));
        let queue = Arc::new(RateLimitingQueue::from_config(&self.config.rate_limiter));
        let router = ChangeRouter::new(Arc::clone(&queue));
        match self.filter {
            Some(filter) => informer.add_event_handler(router.with_filter(SharedFilter(filter))),
            None => informer.add_event_handler(router),
        }
        let controller = Arc::new(Controller::new(
            &self.config,
            &informer,
            queue,
            reconciler,
            events.clone(),
        ));

        Ok(ControllerService {
            config: self.config,
            informer,
            controller,
            events,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(None),
        })
    }
}

/// A running (or runnable) controller: informer, change router, work queue
/// and worker pool wired together from one [`ControllerConfig`].
///
/// ```ignore
/// let service = ControllerService::builder(config)
///     .source(Arc::new(source))
///     .reconciler(Arc::new(MyReconciler))
///     .update_filter(ResourceVersionChanged)
///     .build()?;
///
/// service.start()?;
/// service.wait_until_synced().await;
/// // ...
/// service.shutdown().await?;
/// ```
pub struct ControllerService<R: Resource> {
    config: ControllerConfig,
    informer: Arc<Informer<R>>,
    controller: Arc<Controller<R>>,
    events: EventBus,
    cancel: CancellationToken,
    tasks: Mutex<Option<RunningTasks>>,
}

impl<R: Resource> ControllerService<R> {
    pub fn builder(config: ControllerConfig) -> ControllerServiceBuilder<R> {
        ControllerServiceBuilder {
            config,
            source: None,
            reconciler: None,
            filter: None,
            events: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Spawns the reflector and the worker pool on the current runtime.
    ///
    /// # Errors
    ///
    /// Fails if the service is already running or has been shut down.
    pub fn start(&self) -> Result<()> {
        let mut tasks = self.tasks.lock();
        if tasks.is_some() {
            return Err(CoreError::InitializationFailed(format!(
                "controller '{}' is already running",
                self.config.name
            )));
        }
        if self.cancel.is_cancelled() {
            return Err(CoreError::InitializationFailed(format!(
                "controller '{}' has been shut down",
                self.config.name
            )));
        }

        let informer = Arc::clone(&self.informer);
        let cancel = self.cancel.clone();
        let informer_task = core_async::spawn(async move { informer.run(cancel).await });

        let controller = Arc::clone(&self.controller);
        let cancel = self.cancel.clone();
        let controller_task = core_async::spawn(async move { controller.run(cancel).await });

        *tasks = Some(RunningTasks {
            informer: informer_task,
            controller: controller_task,
        });
        info!(
            controller = %self.config.name,
            workers = self.config.worker_count,
            namespace = self.config.namespace.as_deref().unwrap_or("*"),
            "Controller service started"
        );
        Ok(())
    }

    /// Stops the reflector, shuts the queue down and waits for in-flight
    /// reconciles to finish. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        self.cancel.cancel();
        let tasks = self.tasks.lock().take();
        let Some(tasks) = tasks else {
            return Ok(());
        };

        let controller = join(tasks.controller).await;
        let informer = join(tasks.informer).await;
        info!(controller = %self.config.name, "Controller service stopped");

        match controller {
            // Shut down before the cache synced; nothing was reconciled.
            Err(CoreError::Controller(ControllerError::Cancelled)) => {}
            other => other?,
        }
        informer
    }

    pub fn is_running(&self) -> bool {
        self.tasks.lock().is_some() && !self.cancel.is_cancelled()
    }

    /// Waits until the initial listing is in the store. Returns `false` if
    /// the service was shut down first.
    pub async fn wait_until_synced(&self) -> bool {
        self.informer.sync_gate().wait_until_synced(&self.cancel).await
    }

    pub fn has_synced(&self) -> bool {
        self.informer.has_synced()
    }

    pub fn sync_gate(&self) -> SyncGate {
        self.informer.sync_gate()
    }

    pub fn store(&self) -> Store<R> {
        self.informer.store()
    }

    pub fn informer(&self) -> &Arc<Informer<R>> {
        &self.informer
    }

    pub fn queue(&self) -> &Arc<RateLimitingQueue<ObjectKey>> {
        self.controller.queue()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.events.subscribe())
    }

    /// Token cancelled by [`shutdown`](Self::shutdown).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl<R: Resource> Drop for ControllerService<R> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<R: Resource> std::fmt::Debug for ControllerService<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerService")
            .field("name", &self.config.name)
            .field("informer", &self.informer)
            .field("controller", &self.controller)
            .field("running", &self.is_running())
            .finish()
    }
}

async fn join(handle: JoinHandle<core_controller::Result<()>>) -> Result<()> {
    match handle.await {
        Ok(result) => result.map_err(CoreError::from),
        Err(err) => {
            error!(error = %err, "Controller task panicked or was aborted");
            Err(CoreError::TaskFailed(err.to_string()))
        }
    }
}
