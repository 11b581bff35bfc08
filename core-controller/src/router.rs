//! Store notifications to queue keys.

use bridge_traits::Resource;
use std::sync::Arc;
use tracing::trace;

use crate::informer::EventHandler;
use crate::key::{deletion_handling_key, ObjectKey};
use crate::queue::RateLimitingQueue;
use crate::store::StoreEvent;

/// Decides whether an update is worth reconciling.
pub trait UpdateFilter<R>: Send + Sync {
    fn changed(&self, old: &R, new: &R) -> bool;
}

impl<R, F> UpdateFilter<R> for F
where
    F: Fn(&R, &R) -> bool + Send + Sync,
{
    fn changed(&self, old: &R, new: &R) -> bool {
        self(old, new)
    }
}

/// Suppresses updates whose version did not move, which is what periodic
/// resyncs deliver.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceVersionChanged;

impl<R: Resource> UpdateFilter<R> for ResourceVersionChanged {
    fn changed(&self, old: &R, new: &R) -> bool {
        old.resource_version() != new.resource_version()
    }
}

/// Event handler that enqueues the key of every added, updated or deleted
/// object.
pub struct ChangeRouter<R> {
    queue: Arc<RateLimitingQueue<ObjectKey>>,
    filter: Option<Box<dyn UpdateFilter<R>>>,
}

impl<R: Resource> ChangeRouter<R> {
    pub fn new(queue: Arc<RateLimitingQueue<ObjectKey>>) -> Self {
        Self {
            queue,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: impl UpdateFilter<R> + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }
}

impl<R: Resource> EventHandler<R> for ChangeRouter<R> {
    fn handle(&self, event: &StoreEvent<R>) {
        let key = match event {
            StoreEvent::Added(object) => ObjectKey::for_object(object.as_ref()),
            StoreEvent::Updated { old, new } => {
                if let Some(filter) = &self.filter {
                    if !filter.changed(old, new) {
                        trace!(kind = R::KIND, key = %ObjectKey::for_object(new.as_ref()), "Update filtered out");
                        return;
                    }
                }
                ObjectKey::for_object(new.as_ref())
            }
            StoreEvent::Deleted(deleted) => deletion_handling_key(deleted),
        };
        self.queue.add(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::{DeletedObject, ObjectMeta};
    use core_runtime::config::RateLimiterConfig;

    #[derive(Debug, Clone)]
    struct ConfigMap {
        meta: ObjectMeta,
        data: String,
    }

    impl Resource for ConfigMap {
        const KIND: &'static str = "ConfigMap";

        fn meta(&self) -> &ObjectMeta {
            &self.meta
        }

        fn meta_mut(&mut self) -> &mut ObjectMeta {
            &mut self.meta
        }
    }

    fn config_map(name: &str, version: u64, data: &str) -> Arc<ConfigMap> {
        Arc::new(ConfigMap {
            meta: ObjectMeta::namespaced("default", name).with_resource_version(version),
            data: data.to_string(),
        })
    }

    fn queue() -> Arc<RateLimitingQueue<ObjectKey>> {
        Arc::new(RateLimitingQueue::from_config(&RateLimiterConfig::default()))
    }

    #[core_async::test]
    async fn test_routes_every_change_kind() {
        let queue = queue();
        let router = ChangeRouter::new(Arc::clone(&queue));

        router.handle(&StoreEvent::Added(config_map("a", 1, "x")));
        router.handle(&StoreEvent::Updated {
            old: config_map("b", 1, "x"),
            new: config_map("b", 2, "y"),
        });
        router.handle(&StoreEvent::Deleted(DeletedObject::Tombstone(
            ObjectMeta::namespaced("default", "c"),
        )));

        let mut keys = Vec::new();
        while !queue.is_empty() {
            keys.push(queue.get().await.unwrap().to_string());
        }
        assert_eq!(keys, vec!["default/a", "default/b", "default/c"]);
    }

    #[core_async::test]
    async fn test_version_filter_drops_resync_updates() {
        let queue = queue();
        let router = ChangeRouter::new(Arc::clone(&queue)).with_filter(ResourceVersionChanged);

        let same = config_map("a", 3, "x");
        router.handle(&StoreEvent::Updated {
            old: Arc::clone(&same),
            new: same,
        });
        assert!(queue.is_empty());

        router.handle(&StoreEvent::Updated {
            old: config_map("a", 3, "x"),
            new: config_map("a", 4, "x"),
        });
        assert_eq!(queue.len(), 1);
    }

    #[core_async::test]
    async fn test_closure_filter() {
        let queue = queue();
        let router = ChangeRouter::new(Arc::clone(&queue))
            .with_filter(|old: &ConfigMap, new: &ConfigMap| old.data != new.data);

        router.handle(&StoreEvent::Updated {
            old: config_map("a", 1, "x"),
            new: config_map("a", 2, "x"),
        });
        assert!(queue.is_empty());

        router.handle(&StoreEvent::Updated {
            old: config_map("a", 2, "x"),
            new: config_map("a", 3, "z"),
        });
        assert_eq!(queue.len(), 1);
    }
}
