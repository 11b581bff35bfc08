//! # Controller
//!
//! Worker pool that drains the work queue and calls the reconcile function.
//!
//! ## Worker loop
//!
//! ```text
//! get key ──> read current object from store ──> reconcile ──> done ──> retry policy
//!    ^                                                                      │
//!    └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The object is read when the key is processed, not when it was enqueued,
//! so a burst of changes to one key collapses into a single reconcile
//! against the latest state. A missing object means it was deleted.
//!
//! ## Shutdown
//!
//! [`Controller::run`] returns after `cancel` fires, the queue has been shut
//! down and every in-flight reconcile has finished.

use async_trait::async_trait;
use bridge_traits::Resource;
use core_async::sync::CancellationToken;
use core_async::task::JoinSet;
use core_runtime::config::ControllerConfig;
use core_runtime::events::{ControllerEvent, EventBus, ReconcileEvent};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::error::{ControllerError, ReconcileError, Result};
use crate::informer::Informer;
use crate::key::ObjectKey;
use crate::queue::RateLimitingQueue;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::store::Store;
use crate::sync_gate::SyncGate;

/// Business logic plugged into the controller.
///
/// `object` is the current cached state of `key`, or `None` if it no longer
/// exists. Returning an error requeues the key with backoff.
#[async_trait]
pub trait Reconciler<R: Resource>: Send + Sync {
    async fn reconcile(&self, key: &ObjectKey, object: Option<Arc<R>>)
        -> std::result::Result<(), ReconcileError>;
}

struct Worker<R: Resource> {
    name: String,
    store: Store<R>,
    queue: Arc<RateLimitingQueue<ObjectKey>>,
    reconciler: Arc<dyn Reconciler<R>>,
    retry: RetryPolicy,
    events: EventBus,
}

impl<R: Resource> Worker<R> {
    async fn run(self: Arc<Self>, id: usize) {
        debug!(worker = id, "Worker started");
        while self.process_next_item().await {}
        debug!(worker = id, "Worker stopped");
    }

    /// Returns `false` once the queue is shutting down.
    async fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        let object = self.store.get(&key);
        let span = info_span!("reconcile", controller = %self.name, key = %key);
        let result = AssertUnwindSafe(async { self.reconciler.reconcile(&key, object).await })
            .catch_unwind()
            .instrument(span)
            .await
            .unwrap_or_else(|_| Err(ReconcileError::new("reconcile panicked")));

        self.queue.done(&key);

        match self.retry.handle(&self.queue, &key, result) {
            RetryDecision::Forgotten => {
                debug!(key = %key, "Reconciled");
                self.emit(ReconcileEvent::Succeeded {
                    controller: self.name.clone(),
                    key: key.to_string(),
                });
            }
            RetryDecision::Requeued { attempt, delay } => {
                warn!(key = %key, attempt, delay_ms = delay.as_millis() as u64, "Reconcile failed, requeued");
                self.emit(ReconcileEvent::Requeued {
                    controller: self.name.clone(),
                    key: key.to_string(),
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                });
            }
            RetryDecision::Dropped { attempts, error } => {
                error!(key = %key, attempts, error = %error, "Dropping key out of the queue");
                self.emit(ReconcileEvent::Dropped {
                    controller: self.name.clone(),
                    key: key.to_string(),
                    attempts,
                    error: error.to_string(),
                });
            }
        }
        true
    }

    fn emit(&self, event: ReconcileEvent) {
        self.events.emit(ControllerEvent::Reconcile(event)).ok();
    }
}

pub struct Controller<R: Resource> {
    worker: Arc<Worker<R>>,
    sync_gate: SyncGate,
    worker_count: usize,
}

impl<R: Resource> Controller<R> {
    /// Wires a controller to `informer`'s store and sync gate.
    ///
    /// `queue` must be the same queue the informer's change router feeds.
    pub fn new(
        config: &ControllerConfig,
        informer: &Informer<R>,
        queue: Arc<RateLimitingQueue<ObjectKey>>,
        reconciler: Arc<dyn Reconciler<R>>,
        events: EventBus,
    ) -> Self {
        Self {
            worker: Arc::new(Worker {
                name: config.name.clone(),
                store: informer.store(),
                queue,
                reconciler,
                retry: RetryPolicy::new(config.max_retries),
                events,
            }),
            sync_gate: informer.sync_gate(),
            worker_count: config.worker_count.max(1),
        }
    }

    pub fn queue(&self) -> &Arc<RateLimitingQueue<ObjectKey>> {
        &self.worker.queue
    }

    /// Waits for the cache to sync, then runs the workers until `cancel`
    /// fires.
    ///
    /// Fails with [`ControllerError::Cancelled`] when cancelled before the
    /// cache synced; no reconcile has run in that case.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let name = &self.worker.name;
        info!(controller = %name, "Waiting for cache to sync");
        if !self.sync_gate.wait_until_synced(&cancel).await {
            self.worker.queue.shut_down();
            return Err(ControllerError::Cancelled);
        }

        info!(controller = %name, workers = self.worker_count, "Starting workers");
        let mut workers = JoinSet::new();
        for id in 0..self.worker_count {
            workers.spawn(Arc::clone(&self.worker).run(id));
        }

        cancel.cancelled().await;
        info!(controller = %name, "Shutting down workers");
        self.worker.queue.shut_down();

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                error!(controller = %name, error = %err, "Worker task failed");
            }
        }
        info!(controller = %name, "Controller stopped");
        Ok(())
    }
}

impl<R: Resource> std::fmt::Debug for Controller<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.worker.name)
            .field("worker_count", &self.worker_count)
            .field("queue", &self.worker.queue)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::ChangeRouter;
    use bridge_memory::{Deployment, InMemorySource};
    use core_async::time::{sleep, Duration};
    use core_runtime::events::EventStream;
    use mockall::mock;
    use mockall::predicate::always;

    mock! {
        DeploymentReconciler {}

        #[async_trait]
        impl Reconciler<Deployment> for DeploymentReconciler {
            async fn reconcile(&self, key: &ObjectKey, object: Option<Arc<Deployment>>)
                -> std::result::Result<(), ReconcileError>;
        }
    }

    fn config(max_retries: u32) -> ControllerConfig {
        ControllerConfig::builder()
            .name("deployments")
            .max_retries(max_retries)
            .worker_count(2)
            .build()
            .unwrap()
    }

    struct Harness {
        informer: Arc<Informer<Deployment>>,
        controller: Arc<Controller<Deployment>>,
        cancel: CancellationToken,
        events: EventBus,
    }

    fn harness(source: InMemorySource<Deployment>, config: &ControllerConfig, reconciler: MockDeploymentReconciler) -> Harness {
        let events = EventBus::new(64);
        let informer = Arc::new(Informer::new(Arc::new(source), config, events.clone()));
        let queue = Arc::new(RateLimitingQueue::from_config(&config.rate_limiter));
        informer.add_event_handler(ChangeRouter::new(Arc::clone(&queue)));
        let controller = Arc::new(Controller::new(
            config,
            &informer,
            queue,
            Arc::new(reconciler),
            events.clone(),
        ));
        Harness {
            informer,
            controller,
            cancel: CancellationToken::new(),
            events,
        }
    }

    impl Harness {
        fn start(&self) -> (core_async::task::JoinHandle<Result<()>>, core_async::task::JoinHandle<Result<()>>) {
            let informer = Arc::clone(&self.informer);
            let cancel = self.cancel.clone();
            let informer_task = core_async::spawn(async move { informer.run(cancel).await });

            let controller = Arc::clone(&self.controller);
            let cancel = self.cancel.clone();
            let controller_task = core_async::spawn(async move { controller.run(cancel).await });
            (informer_task, controller_task)
        }
    }

    #[core_async::test]
    async fn test_reconciles_existing_objects_after_sync() {
        let source = InMemorySource::new();
        source.create(Deployment::new("default", "web", 1)).unwrap();

        let mut reconciler = MockDeploymentReconciler::new();
        reconciler
            .expect_reconcile()
            .withf(|key, object| key.to_string() == "default/web" && object.is_some())
            .times(1)
            .returning(|_, _| Ok(()));

        let h = harness(source, &config(5), reconciler);
        let mut stream = EventStream::new(h.events.subscribe())
            .filter(|event| matches!(event, ControllerEvent::Reconcile(_)));
        let (informer_task, controller_task) = h.start();

        let event = stream.recv().await.unwrap();
        assert!(matches!(
            event,
            ControllerEvent::Reconcile(ReconcileEvent::Succeeded { ref key, .. }) if key == "default/web"
        ));

        h.cancel.cancel();
        controller_task.await.unwrap().unwrap();
        informer_task.await.unwrap().unwrap();
        assert!(h.controller.queue().is_shutting_down());
    }

    #[core_async::test]
    async fn test_deleted_object_reconciled_with_none() {
        let source = InMemorySource::new();
        source.create(Deployment::new("default", "web", 1)).unwrap();
        let handle = source.clone();

        let mut reconciler = MockDeploymentReconciler::new();
        let mut seq = mockall::Sequence::new();
        reconciler
            .expect_reconcile()
            .withf(|_, object| object.is_some())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        reconciler
            .expect_reconcile()
            .withf(|key, object| key.name() == "web" && object.is_none())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let h = harness(source, &config(5), reconciler);
        let mut stream = EventStream::new(h.events.subscribe())
            .filter(|event| matches!(event, ControllerEvent::Reconcile(_)));
        let (informer_task, controller_task) = h.start();

        stream.recv().await.unwrap();
        handle.delete(Some("default"), "web").unwrap();
        stream.recv().await.unwrap();

        h.cancel.cancel();
        controller_task.await.unwrap().unwrap();
        informer_task.await.unwrap().unwrap();
    }

    #[core_async::test(start_paused)]
    async fn test_failing_key_is_dropped_after_budget() {
        let source = InMemorySource::new();
        source.create(Deployment::new("default", "broken", 1)).unwrap();

        let mut reconciler = MockDeploymentReconciler::new();
        reconciler
            .expect_reconcile()
            .with(always(), always())
            .times(3)
            .returning(|_, _| Err(ReconcileError::new("image pull failed")));

        let h = harness(source, &config(2), reconciler);
        let mut drops = EventStream::new(h.events.subscribe()).filter(|event| {
            matches!(event, ControllerEvent::Reconcile(ReconcileEvent::Dropped { .. }))
        });
        let (informer_task, controller_task) = h.start();

        match drops.recv().await.unwrap() {
            ControllerEvent::Reconcile(ReconcileEvent::Dropped { key, attempts, error, .. }) => {
                assert_eq!(key, "default/broken");
                assert_eq!(attempts, 3);
                assert_eq!(error, "image pull failed");
            }
            other => panic!("unexpected event {:?}", other),
        }

        // Nothing else is scheduled for the dropped key.
        sleep(Duration::from_secs(60)).await;
        assert!(h.controller.queue().stats().is_idle());

        h.cancel.cancel();
        controller_task.await.unwrap().unwrap();
        informer_task.await.unwrap().unwrap();
    }

    /// Panics on its first call, succeeds afterwards.
    struct PanicOnce {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl Reconciler<Deployment> for PanicOnce {
        async fn reconcile(
            &self,
            _key: &ObjectKey,
            _object: Option<Arc<Deployment>>,
        ) -> std::result::Result<(), ReconcileError> {
            if self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                panic!("bug in reconcile");
            }
            Ok(())
        }
    }

    #[core_async::test]
    async fn test_panicking_reconcile_is_treated_as_failure() {
        let source = InMemorySource::new();
        source.create(Deployment::new("default", "web", 1)).unwrap();

        let config = config(5);
        let events = EventBus::new(64);
        let informer = Arc::new(Informer::new(Arc::new(source), &config, events.clone()));
        let queue = Arc::new(RateLimitingQueue::from_config(&config.rate_limiter));
        informer.add_event_handler(ChangeRouter::new(Arc::clone(&queue)));
        let reconciler = Arc::new(PanicOnce {
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let controller = Arc::new(Controller::new(
            &config,
            &informer,
            queue,
            reconciler.clone(),
            events.clone(),
        ));

        let mut stream = EventStream::new(events.subscribe())
            .filter(|event| matches!(event, ControllerEvent::Reconcile(_)));
        let cancel = CancellationToken::new();
        let informer_task = core_async::spawn({
            let informer = Arc::clone(&informer);
            let cancel = cancel.clone();
            async move { informer.run(cancel).await }
        });
        let controller_task = core_async::spawn({
            let controller = Arc::clone(&controller);
            let cancel = cancel.clone();
            async move { controller.run(cancel).await }
        });

        assert!(matches!(
            stream.recv().await.unwrap(),
            ControllerEvent::Reconcile(ReconcileEvent::Requeued { attempt: 1, .. })
        ));
        assert!(matches!(
            stream.recv().await.unwrap(),
            ControllerEvent::Reconcile(ReconcileEvent::Succeeded { .. })
        ));
        assert_eq!(reconciler.calls.load(std::sync::atomic::Ordering::SeqCst), 2);

        cancel.cancel();
        controller_task.await.unwrap().unwrap();
        informer_task.await.unwrap().unwrap();
    }

    #[core_async::test]
    async fn test_cancel_before_sync_reports_cancelled() {
        let source = InMemorySource::<Deployment>::new();
        source.fail_next_lists(u32::MAX);

        let h = harness(source, &config(5), MockDeploymentReconciler::new());
        h.cancel.cancel();
        let (informer_task, controller_task) = h.start();

        assert!(matches!(
            controller_task.await.unwrap(),
            Err(ControllerError::Cancelled)
        ));
        informer_task.await.unwrap().unwrap();
    }
}
