//! In-process [`ResourceSource`] backed by a map and a bounded change log.
//!
//! Every mutation bumps a collection-wide version counter, stamps the object
//! with it, appends the change to the history and fans it out to open
//! watches. Watches opened from a version older than the retained history
//! fail with [`BridgeError::Expired`].
//!
//! Besides the data operations, the source exposes fault hooks
//! ([`fail_next_lists`](InMemorySource::fail_next_lists),
//! [`disconnect_watchers`](InMemorySource::disconnect_watchers),
//! [`compact`](InMemorySource::compact), ...) so callers can drive a
//! controller through the failure paths it has to survive.

use async_trait::async_trait;
use bridge_traits::{
    BridgeError, DeletedObject, ListParams, ObjectList, Resource, ResourceSource, ResourceVersion,
    Result, WatchEvent, WatchStream,
};
use core_async::stream::StreamExt;
use core_async::time::sleep;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// Number of changes retained for watch resumption unless configured.
pub const DEFAULT_HISTORY_LIMIT: usize = 1024;

type ObjectId = (Option<String>, String);

struct Watcher<R> {
    params: ListParams,
    sender: UnboundedSender<Result<WatchEvent<R>>>,
}

struct SourceState<R> {
    objects: BTreeMap<ObjectId, R>,
    version: ResourceVersion,
    history: VecDeque<WatchEvent<R>>,
    history_limit: usize,
    /// Every change after this version is still in `history`.
    compacted_through: ResourceVersion,
    watchers: Vec<Watcher<R>>,
    failing_lists: u32,
    failing_watches: u32,
    list_calls: u64,
    watch_calls: u64,
}

/// Shared in-memory collection. Clones operate on the same data.
pub struct InMemorySource<R: Resource> {
    state: Arc<Mutex<SourceState<R>>>,
}

impl<R: Resource> Clone for InMemorySource<R> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<R: Resource> Default for InMemorySource<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Resource> InMemorySource<R> {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Creates a source that keeps at most `limit` changes for resumption.
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(SourceState {
                objects: BTreeMap::new(),
                version: ResourceVersion::ZERO,
                history: VecDeque::new(),
                history_limit: limit.max(1),
                compacted_through: ResourceVersion::ZERO,
                watchers: Vec::new(),
                failing_lists: 0,
                failing_watches: 0,
                list_calls: 0,
                watch_calls: 0,
            })),
        }
    }

    /// Stores a new object and returns it stamped with its version.
    ///
    /// # Errors
    ///
    /// Fails if an object with the same namespace and name exists.
    pub fn create(&self, mut object: R) -> Result<R> {
        let mut state = self.state.lock();
        let id = object_id(&object);
        if state.objects.contains_key(&id) {
            return Err(BridgeError::OperationFailed(format!(
                "{} {} already exists",
                R::KIND,
                display_id(&id)
            )));
        }

        let version = state.bump();
        object.meta_mut().resource_version = version;
        state.objects.insert(id, object.clone());
        state.record(WatchEvent::Added(object.clone()));
        debug!(kind = R::KIND, name = %object.meta().name, version = %version, "Created object");
        Ok(object)
    }

    /// Replaces an existing object and returns it stamped with its version.
    ///
    /// # Errors
    ///
    /// Fails if the object does not exist.
    pub fn update(&self, mut object: R) -> Result<R> {
        let mut state = self.state.lock();
        let id = object_id(&object);
        if !state.objects.contains_key(&id) {
            return Err(not_found::<R>(&id));
        }

        let version = state.bump();
        object.meta_mut().resource_version = version;
        state.objects.insert(id, object.clone());
        state.record(WatchEvent::Modified(object.clone()));
        debug!(kind = R::KIND, name = %object.meta().name, version = %version, "Updated object");
        Ok(object)
    }

    /// Creates or replaces `object`.
    pub fn apply(&self, object: R) -> Result<R> {
        let exists = self.state.lock().objects.contains_key(&object_id(&object));
        if exists {
            self.update(object)
        } else {
            self.create(object)
        }
    }

    /// Removes an object and returns its final state, stamped with the
    /// deletion version.
    ///
    /// # Errors
    ///
    /// Fails if the object does not exist.
    pub fn delete(&self, namespace: Option<&str>, name: &str) -> Result<R> {
        let mut state = self.state.lock();
        let id = (namespace.map(str::to_string), name.to_string());
        let Some(mut object) = state.objects.remove(&id) else {
            return Err(not_found::<R>(&id));
        };

        let version = state.bump();
        object.meta_mut().resource_version = version;
        state.record(WatchEvent::Deleted(DeletedObject::Object(object.clone())));
        debug!(kind = R::KIND, name, version = %version, "Deleted object");
        Ok(object)
    }

    /// Sends a bookmark at the current version to every open watch.
    pub fn bookmark(&self) {
        let mut state = self.state.lock();
        let version = state.version;
        state.broadcast(&WatchEvent::Bookmark(version));
    }

    pub fn get(&self, namespace: Option<&str>, name: &str) -> Option<R> {
        let id = (namespace.map(str::to_string), name.to_string());
        self.state.lock().objects.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Version of the most recent change.
    pub fn resource_version(&self) -> ResourceVersion {
        self.state.lock().version
    }

    /// Makes the next `count` list calls fail with a disconnect error.
    pub fn fail_next_lists(&self, count: u32) {
        self.state.lock().failing_lists = count;
    }

    /// Makes the next `count` watch calls fail with a disconnect error.
    pub fn fail_next_watches(&self, count: u32) {
        self.state.lock().failing_watches = count;
    }

    /// Ends every open watch stream.
    pub fn disconnect_watchers(&self) {
        let mut state = self.state.lock();
        let count = state.watchers.len();
        state.watchers.clear();
        debug!(kind = R::KIND, count, "Disconnected watchers");
    }

    /// Delivers `error` to every open watch stream, then closes them.
    pub fn inject_watch_error(&self, error: impl Fn() -> BridgeError) {
        let mut state = self.state.lock();
        for watcher in state.watchers.drain(..) {
            watcher.sender.unbounded_send(Err(error())).ok();
        }
    }

    /// Drops the whole change history. Watches resuming from any earlier
    /// version will be told to relist.
    pub fn compact(&self) {
        let mut state = self.state.lock();
        state.history.clear();
        state.compacted_through = state.version;
        debug!(kind = R::KIND, through = %state.version, "Compacted history");
    }

    /// Number of list calls served so far, including failed ones.
    pub fn list_calls(&self) -> u64 {
        self.state.lock().list_calls
    }

    /// Number of watch calls served so far, including failed ones.
    pub fn watch_calls(&self) -> u64 {
        self.state.lock().watch_calls
    }

    /// Number of watch streams still attached.
    pub fn watcher_count(&self) -> usize {
        let mut state = self.state.lock();
        state.watchers.retain(|watcher| !watcher.sender.is_closed());
        state.watchers.len()
    }
}

impl<R: Resource> SourceState<R> {
    fn bump(&mut self) -> ResourceVersion {
        self.version = self.version.next();
        self.version
    }

    fn record(&mut self, event: WatchEvent<R>) {
        self.broadcast(&event);
        self.history.push_back(event);
        while self.history.len() > self.history_limit {
            if let Some(evicted) = self.history.pop_front() {
                self.compacted_through = evicted.resource_version();
            }
        }
    }

    fn broadcast(&mut self, event: &WatchEvent<R>) {
        self.watchers.retain(|watcher| {
            if !in_scope(&watcher.params, event) {
                return !watcher.sender.is_closed();
            }
            watcher.sender.unbounded_send(Ok(event.clone())).is_ok()
        });
    }
}

#[async_trait]
impl<R: Resource> ResourceSource<R> for InMemorySource<R> {
    async fn list(&self, params: &ListParams) -> Result<ObjectList<R>> {
        let mut state = self.state.lock();
        state.list_calls += 1;
        if state.failing_lists > 0 {
            state.failing_lists -= 1;
            warn!(kind = R::KIND, "Injected list failure");
            return Err(BridgeError::Disconnected("injected list failure".to_string()));
        }

        let items = state
            .objects
            .values()
            .filter(|object| params.matches(object.meta()))
            .cloned()
            .collect();
        Ok(ObjectList {
            items,
            resource_version: state.version,
        })
    }

    async fn watch(&self, params: &ListParams, since: ResourceVersion) -> Result<WatchStream<R>> {
        let (sender, receiver) = unbounded();
        {
            let mut state = self.state.lock();
            state.watch_calls += 1;
            if state.failing_watches > 0 {
                state.failing_watches -= 1;
                warn!(kind = R::KIND, "Injected watch failure");
                return Err(BridgeError::Disconnected("injected watch failure".to_string()));
            }
            if since < state.compacted_through {
                return Err(BridgeError::Expired {
                    requested: since,
                    oldest: state.compacted_through,
                });
            }

            for event in state.history.iter() {
                if event.resource_version() > since && in_scope(params, event) {
                    sender.unbounded_send(Ok(event.clone())).ok();
                }
            }
            state.watchers.push(Watcher {
                params: params.clone(),
                sender,
            });
        }

        debug!(kind = R::KIND, since = %since, "Watch opened");
        Ok(match params.timeout {
            Some(timeout) => core_async::stream::boxed(receiver.take_until(sleep(timeout))),
            None => core_async::stream::boxed(receiver),
        })
    }
}

fn in_scope<R: Resource>(params: &ListParams, event: &WatchEvent<R>) -> bool {
    match event {
        WatchEvent::Added(object) | WatchEvent::Modified(object) => params.matches(object.meta()),
        WatchEvent::Deleted(deleted) => params.matches(deleted.meta()),
        WatchEvent::Bookmark(_) => true,
    }
}

fn object_id<R: Resource>(object: &R) -> ObjectId {
    let meta = object.meta();
    (meta.namespace.clone(), meta.name.clone())
}

fn display_id(id: &ObjectId) -> String {
    match &id.0 {
        Some(namespace) => format!("{}/{}", namespace, id.1),
        None => id.1.clone(),
    }
}

fn not_found<R: Resource>(id: &ObjectId) -> BridgeError {
    BridgeError::OperationFailed(format!("{} {} not found", R::KIND, display_id(id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{Deployment, Service};
    use core_async::time::Duration;

    #[core_async::test]
    async fn test_mutations_bump_versions() {
        let source = InMemorySource::new();
        let web = source.create(Deployment::new("default", "web", 1)).unwrap();
        assert_eq!(web.meta.resource_version, ResourceVersion::new(1));

        let mut scaled = web.clone();
        scaled.replicas = 3;
        let scaled = source.update(scaled).unwrap();
        assert_eq!(scaled.meta.resource_version, ResourceVersion::new(2));

        let deleted = source.delete(Some("default"), "web").unwrap();
        assert_eq!(deleted.meta.resource_version, ResourceVersion::new(3));
        assert!(source.is_empty());
        assert_eq!(source.resource_version(), ResourceVersion::new(3));
    }

    #[core_async::test]
    async fn test_conflicting_mutations_fail() {
        let source = InMemorySource::new();
        source.create(Service::new("default", "web", 80)).unwrap();

        assert!(matches!(
            source.create(Service::new("default", "web", 8080)),
            Err(BridgeError::OperationFailed(_))
        ));
        assert!(source.update(Service::new("default", "api", 80)).is_err());
        assert!(source.delete(None, "web").is_err());
        assert_eq!(source.get(Some("default"), "web").unwrap().port, 80);
    }

    #[core_async::test]
    async fn test_list_is_scoped_by_namespace() {
        let source = InMemorySource::new();
        source.create(Deployment::new("default", "web", 1)).unwrap();
        source.create(Deployment::new("kube-system", "dns", 2)).unwrap();

        let all = source.list(&ListParams::all_namespaces()).await.unwrap();
        assert_eq!(all.items.len(), 2);
        assert_eq!(all.resource_version, ResourceVersion::new(2));

        let scoped = source.list(&ListParams::namespaced("default")).await.unwrap();
        assert_eq!(scoped.items.len(), 1);
        assert_eq!(scoped.items[0].meta.name, "web");
    }

    #[core_async::test]
    async fn test_watch_replays_history_then_follows() {
        let source = InMemorySource::new();
        source.create(Deployment::new("default", "a", 1)).unwrap();
        source.create(Deployment::new("default", "b", 1)).unwrap();

        let mut stream = source
            .watch(&ListParams::all_namespaces(), ResourceVersion::new(1))
            .await
            .unwrap();
        let replayed = stream.next().await.unwrap().unwrap();
        assert_eq!(replayed.resource_version(), ResourceVersion::new(2));

        source.delete(Some("default"), "a").unwrap();
        match stream.next().await.unwrap().unwrap() {
            WatchEvent::Deleted(deleted) => {
                assert_eq!(deleted.meta().name, "a");
                assert_eq!(deleted.resource_version(), ResourceVersion::new(3));
            }
            other => panic!("unexpected event {:?}", other),
        }

        source.disconnect_watchers();
        assert!(stream.next().await.is_none());
    }

    #[core_async::test]
    async fn test_watch_skips_other_namespaces() {
        let source = InMemorySource::new();
        let mut stream = source
            .watch(&ListParams::namespaced("default"), ResourceVersion::ZERO)
            .await
            .unwrap();

        source.create(Deployment::new("kube-system", "dns", 1)).unwrap();
        source.create(Deployment::new("default", "web", 1)).unwrap();
        source.bookmark();

        match stream.next().await.unwrap().unwrap() {
            WatchEvent::Added(object) => assert_eq!(object.meta.name, "web"),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(
            stream.next().await.unwrap().unwrap(),
            WatchEvent::Bookmark(version) if version == ResourceVersion::new(2)
        ));
    }

    #[core_async::test]
    async fn test_watch_from_compacted_version_expires() {
        let source = InMemorySource::with_history_limit(2);
        for name in ["a", "b", "c"] {
            source.create(Deployment::new("default", name, 1)).unwrap();
        }

        match source.watch(&ListParams::default(), ResourceVersion::ZERO).await {
            Err(BridgeError::Expired { requested, oldest }) => {
                assert_eq!(requested, ResourceVersion::ZERO);
                assert_eq!(oldest, ResourceVersion::new(1));
            }
            other => panic!("expected expiry, got {:?}", other.map(|_| ())),
        }
        assert!(source
            .watch(&ListParams::default(), ResourceVersion::new(1))
            .await
            .is_ok());

        source.compact();
        assert!(source
            .watch(&ListParams::default(), ResourceVersion::new(2))
            .await
            .map(|_| ())
            .unwrap_err()
            .requires_relist());
        assert!(source
            .watch(&ListParams::default(), ResourceVersion::new(3))
            .await
            .is_ok());
    }

    #[core_async::test]
    async fn test_injected_failures_are_consumed() {
        let source = InMemorySource::<Deployment>::new();
        source.fail_next_lists(1);
        source.fail_next_watches(1);

        assert!(source.list(&ListParams::default()).await.is_err());
        assert!(source.list(&ListParams::default()).await.is_ok());
        assert!(source.watch(&ListParams::default(), ResourceVersion::ZERO).await.is_err());
        assert!(source.watch(&ListParams::default(), ResourceVersion::ZERO).await.is_ok());
        assert_eq!(source.list_calls(), 2);
        assert_eq!(source.watch_calls(), 2);
    }

    #[core_async::test]
    async fn test_inject_watch_error_closes_stream() {
        let source = InMemorySource::<Deployment>::new();
        let mut stream = source
            .watch(&ListParams::default(), ResourceVersion::ZERO)
            .await
            .unwrap();
        assert_eq!(source.watcher_count(), 1);

        source.inject_watch_error(|| BridgeError::Expired {
            requested: ResourceVersion::ZERO,
            oldest: ResourceVersion::new(5),
        });
        assert!(stream.next().await.unwrap().unwrap_err().requires_relist());
        assert!(stream.next().await.is_none());
        assert_eq!(source.watcher_count(), 0);
    }

    #[core_async::test(start_paused)]
    async fn test_watch_timeout_ends_stream() {
        let source = InMemorySource::<Deployment>::new();
        let params = ListParams::default().with_timeout(Duration::from_secs(30));
        let mut stream = source.watch(&params, ResourceVersion::ZERO).await.unwrap();

        assert!(stream.next().await.is_none());
        drop(stream);
        assert_eq!(source.watcher_count(), 0);
    }
}
