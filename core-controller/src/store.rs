//! # Local Mirror
//!
//! In-memory, thread-safe mirror of one remote collection.
//!
//! ## Overview
//!
//! The store is populated from a bulk listing ([`Store::replace`]) and kept
//! current by applying change events from the watch stream
//! ([`Store::apply`]). Only the reflector mutates it; everything else reads.
//! Readers get `Arc<R>` snapshots, so a reconcile holding an object never
//! observes it changing underneath.
//!
//! ## Versioning
//!
//! The store tracks a watermark: the highest version it has applied from a
//! snapshot, a change or a bookmark. The watch is resumed from that
//! watermark, and any redelivered change at or below it is ignored, which
//! keeps the mirror equal to a prefix of the upstream event stream.

use bridge_traits::{DeletedObject, Resource, ResourceVersion, WatchEvent};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::trace;

use crate::error::Result;
use crate::key::{deletion_handling_key, ObjectKey};

/// A mutation of the store, as seen by event handlers.
#[derive(Debug, Clone)]
pub enum StoreEvent<R> {
    Added(Arc<R>),
    Updated { old: Arc<R>, new: Arc<R> },
    /// Either the last known object or, when the final state is unknown
    /// (deleted while disconnected), only its metadata.
    Deleted(DeletedObject<R>),
}

impl<R: Resource> StoreEvent<R> {
    pub fn key(&self) -> ObjectKey {
        match self {
            Self::Added(object) => ObjectKey::for_object(object.as_ref()),
            Self::Updated { new, .. } => ObjectKey::for_object(new.as_ref()),
            Self::Deleted(deleted) => deletion_handling_key(deleted),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Updated { .. } => "updated",
            Self::Deleted(_) => "deleted",
        }
    }
}

struct Entry<R> {
    object: Arc<R>,
    version: ResourceVersion,
}

struct StoreState<R> {
    items: HashMap<ObjectKey, Entry<R>>,
    by_namespace: HashMap<String, HashSet<ObjectKey>>,
    resource_version: ResourceVersion,
}

impl<R: Resource> StoreState<R> {
    fn insert(&mut self, key: ObjectKey, object: Arc<R>) -> Option<Arc<R>> {
        if let Some(namespace) = key.namespace() {
            self.by_namespace
                .entry(namespace.to_string())
                .or_default()
                .insert(key.clone());
        }
        let version = object.resource_version();
        self.items
            .insert(key, Entry { object, version })
            .map(|previous| previous.object)
    }

    fn remove(&mut self, key: &ObjectKey) -> Option<Arc<R>> {
        let entry = self.items.remove(key)?;
        if let Some(namespace) = key.namespace() {
            if let Some(keys) = self.by_namespace.get_mut(namespace) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_namespace.remove(namespace);
                }
            }
        }
        Some(entry.object)
    }

    fn advance(&mut self, version: ResourceVersion) {
        if version > self.resource_version {
            self.resource_version = version;
        }
    }
}

/// Key to object map with a namespace index. Cloning shares the same mirror.
pub struct Store<R> {
    state: Arc<RwLock<StoreState<R>>>,
}

impl<R> Clone for Store<R> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<R: Resource> Store<R> {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState {
                items: HashMap::new(),
                by_namespace: HashMap::new(),
                resource_version: ResourceVersion::ZERO,
            })),
        }
    }

    pub fn get(&self, key: &ObjectKey) -> Option<Arc<R>> {
        self.state
            .read()
            .items
            .get(key)
            .map(|entry| Arc::clone(&entry.object))
    }

    /// Looks up an object by its string key (`namespace/name` or `name`).
    pub fn get_by_key(&self, key: &str) -> Result<Option<Arc<R>>> {
        let key: ObjectKey = key.parse()?;
        Ok(self.get(&key))
    }

    /// Every cached object, in no particular order.
    pub fn list(&self) -> Vec<Arc<R>> {
        self.state
            .read()
            .items
            .values()
            .map(|entry| Arc::clone(&entry.object))
            .collect()
    }

    pub fn list_keys(&self) -> Vec<ObjectKey> {
        self.state.read().items.keys().cloned().collect()
    }

    /// Objects in `namespace`, served from the secondary index.
    pub fn list_namespace(&self, namespace: &str) -> Vec<Arc<R>> {
        let state = self.state.read();
        let Some(keys) = state.by_namespace.get(namespace) else {
            return Vec::new();
        };
        keys.iter()
            .filter_map(|key| state.items.get(key))
            .map(|entry| Arc::clone(&entry.object))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().items.is_empty()
    }

    /// Highest version applied so far; the watch resumes from here.
    pub fn resource_version(&self) -> ResourceVersion {
        self.state.read().resource_version
    }

    /// Applies one change from the watch stream.
    ///
    /// Returns `None` when the change is already reflected: an add or update
    /// not newer than the cached entry or the watermark, a delete of an
    /// absent key, or a delete older than the cached entry. Bookmarks only
    /// move the watermark.
    pub(crate) fn apply(&self, event: WatchEvent<R>) -> Option<StoreEvent<R>> {
        let mut state = self.state.write();
        match event {
            WatchEvent::Added(object) | WatchEvent::Modified(object) => {
                let version = object.resource_version();
                let key = ObjectKey::for_object(&object);
                let stale = version <= state.resource_version
                    || state
                        .items
                        .get(&key)
                        .is_some_and(|entry| version <= entry.version);
                if stale {
                    trace!(key = %key, version = %version, "Ignoring stale change");
                    return None;
                }

                state.advance(version);
                let object = Arc::new(object);
                match state.insert(key, Arc::clone(&object)) {
                    Some(old) => Some(StoreEvent::Updated { old, new: object }),
                    None => Some(StoreEvent::Added(object)),
                }
            }
            WatchEvent::Deleted(deleted) => {
                let version = deleted.resource_version();
                let key = deletion_handling_key(&deleted);
                state.advance(version);

                let cached = state.items.get(&key)?.version;
                if !version.is_zero() && version < cached {
                    trace!(key = %key, version = %version, "Ignoring delete older than cached entry");
                    return None;
                }
                state.remove(&key);
                Some(StoreEvent::Deleted(deleted))
            }
            WatchEvent::Bookmark(version) => {
                state.advance(version);
                None
            }
        }
    }

    /// Installs a full snapshot taken at `version`.
    ///
    /// Returns the notifications that turn the previous contents into the
    /// snapshot: `Added` and `Updated` in listing order for new or changed
    /// objects, then tombstones for objects that vanished, ordered by key.
    pub(crate) fn replace(&self, items: Vec<R>, version: ResourceVersion) -> Vec<StoreEvent<R>> {
        let mut state = self.state.write();
        let mut changes = Vec::with_capacity(items.len());
        let mut seen = HashSet::with_capacity(items.len());

        for item in items {
            let key = ObjectKey::for_object(&item);
            let unchanged = state
                .items
                .get(&key)
                .is_some_and(|entry| entry.version == item.resource_version());
            seen.insert(key.clone());
            if unchanged {
                continue;
            }

            let object = Arc::new(item);
            match state.insert(key, Arc::clone(&object)) {
                Some(old) => changes.push(StoreEvent::Updated { old, new: object }),
                None => changes.push(StoreEvent::Added(object)),
            }
        }

        let vanished: BTreeSet<ObjectKey> = state
            .items
            .keys()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect();
        for key in vanished {
            if let Some(old) = state.remove(&key) {
                changes.push(StoreEvent::Deleted(DeletedObject::Tombstone(
                    old.meta().clone(),
                )));
            }
        }

        state.resource_version = version;
        changes
    }
}

impl<R> std::fmt::Debug for Store<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Store")
            .field("len", &state.items.len())
            .field("resource_version", &state.resource_version)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::ObjectMeta;

    #[derive(Debug, Clone, PartialEq)]
    struct Pod {
        meta: ObjectMeta,
        phase: &'static str,
    }

    impl Resource for Pod {
        const KIND: &'static str = "Pod";

        fn meta(&self) -> &ObjectMeta {
            &self.meta
        }

        fn meta_mut(&mut self) -> &mut ObjectMeta {
            &mut self.meta
        }
    }

    fn pod(name: &str, version: u64) -> Pod {
        Pod {
            meta: ObjectMeta::namespaced("default", name).with_resource_version(version),
            phase: "Running",
        }
    }

    fn kinds(events: &[StoreEvent<Pod>]) -> Vec<(String, &'static str)> {
        events
            .iter()
            .map(|event| (event.key().to_string(), event.kind()))
            .collect()
    }

    #[test]
    fn test_replace_on_empty_store_adds_in_listing_order() {
        let store = Store::new();
        let events = store.replace(vec![pod("a", 1), pod("b", 1)], ResourceVersion::new(1));

        assert_eq!(
            kinds(&events),
            vec![
                ("default/a".to_string(), "added"),
                ("default/b".to_string(), "added")
            ]
        );
        assert_eq!(store.len(), 2);
        assert_eq!(store.resource_version(), ResourceVersion::new(1));
    }

    #[test]
    fn test_relist_reports_updates_and_tombstones() {
        let store = Store::new();
        store.replace(vec![pod("a", 1), pod("b", 1)], ResourceVersion::new(1));

        let events = store.replace(vec![pod("a", 2)], ResourceVersion::new(2));
        assert_eq!(
            kinds(&events),
            vec![
                ("default/a".to_string(), "updated"),
                ("default/b".to_string(), "deleted")
            ]
        );
        match &events[1] {
            StoreEvent::Deleted(DeletedObject::Tombstone(meta)) => assert_eq!(meta.name, "b"),
            other => panic!("expected tombstone, got {:?}", other),
        }
        assert!(store.get(&ObjectKey::namespaced("default", "b")).is_none());
        assert_eq!(
            store
                .get(&ObjectKey::namespaced("default", "a"))
                .unwrap()
                .resource_version(),
            ResourceVersion::new(2)
        );
    }

    #[test]
    fn test_relist_skips_unchanged_objects() {
        let store = Store::new();
        store.replace(vec![pod("a", 1)], ResourceVersion::new(1));
        let events = store.replace(vec![pod("a", 1)], ResourceVersion::new(3));
        assert!(events.is_empty());
        assert_eq!(store.resource_version(), ResourceVersion::new(3));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let store = Store::new();
        store.replace(vec![pod("a", 1)], ResourceVersion::new(1));

        let first = store.apply(WatchEvent::Modified(pod("a", 2)));
        assert!(matches!(first, Some(StoreEvent::Updated { .. })));
        assert!(store.apply(WatchEvent::Modified(pod("a", 2))).is_none());

        let added = store.apply(WatchEvent::Added(pod("c", 3)));
        assert!(matches!(added, Some(StoreEvent::Added(_))));
        assert!(store.apply(WatchEvent::Added(pod("c", 3))).is_none());

        assert_eq!(store.len(), 2);
        assert_eq!(store.resource_version(), ResourceVersion::new(3));
    }

    #[test]
    fn test_changes_at_or_below_snapshot_are_ignored() {
        let store = Store::new();
        store.replace(vec![pod("a", 5)], ResourceVersion::new(10));

        assert!(store.apply(WatchEvent::Added(pod("b", 7))).is_none());
        assert!(store.apply(WatchEvent::Modified(pod("a", 9))).is_none());
        assert!(store.get(&ObjectKey::namespaced("default", "b")).is_none());
    }

    #[test]
    fn test_delete_by_tombstone_and_out_of_order_delete() {
        let store = Store::new();
        store.replace(vec![pod("a", 4), pod("b", 4)], ResourceVersion::new(4));

        let stale = WatchEvent::Deleted(DeletedObject::Tombstone(
            ObjectMeta::namespaced("default", "a").with_resource_version(3),
        ));
        assert!(store.apply(stale).is_none());
        assert_eq!(store.len(), 2);

        let tombstone = WatchEvent::Deleted(DeletedObject::Tombstone(
            ObjectMeta::namespaced("default", "a").with_resource_version(6),
        ));
        assert!(matches!(store.apply(tombstone.clone()), Some(StoreEvent::Deleted(_))));
        assert!(store.apply(tombstone).is_none());

        let full = WatchEvent::Deleted(DeletedObject::Object(pod("b", 7)));
        assert!(matches!(
            store.apply(full),
            Some(StoreEvent::Deleted(DeletedObject::Object(_)))
        ));
        assert!(store.is_empty());
        assert_eq!(store.resource_version(), ResourceVersion::new(7));
    }

    #[test]
    fn test_bookmark_moves_watermark_only() {
        let store: Store<Pod> = Store::new();
        assert!(store.apply(WatchEvent::Bookmark(ResourceVersion::new(12))).is_none());
        assert_eq!(store.resource_version(), ResourceVersion::new(12));
        assert!(store.is_empty());
    }

    #[test]
    fn test_namespace_index_and_lookup_by_key() {
        let store = Store::new();
        let mut other = pod("x", 1);
        other.meta.namespace = Some("kube-system".to_string());
        store.replace(vec![pod("a", 1), pod("b", 1), other], ResourceVersion::new(1));

        let mut names: Vec<_> = store
            .list_namespace("default")
            .iter()
            .map(|p| p.meta.name.clone())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(store.list_namespace("kube-system").len(), 1);
        assert!(store.list_namespace("missing").is_empty());

        store.apply(WatchEvent::Deleted(DeletedObject::Object(pod("a", 2))));
        assert_eq!(store.list_namespace("default").len(), 1);

        assert!(store.get_by_key("default/b").unwrap().is_some());
        assert!(store.get_by_key("default/zzz").unwrap().is_none());
        assert!(store.get_by_key("a/b/c").is_err());
        assert_eq!(store.list_keys().len(), 2);
        assert_eq!(store.list().len(), 2);
    }

    #[test]
    fn test_readers_keep_their_snapshot() {
        let store = Store::new();
        store.replace(vec![pod("a", 1)], ResourceVersion::new(1));
        let before = store.get(&ObjectKey::namespaced("default", "a")).unwrap();

        let mut next = pod("a", 2);
        next.phase = "Succeeded";
        store.apply(WatchEvent::Modified(next));

        assert_eq!(before.phase, "Running");
        assert_eq!(
            store
                .get(&ObjectKey::namespaced("default", "a"))
                .unwrap()
                .phase,
            "Succeeded"
        );
    }
}
