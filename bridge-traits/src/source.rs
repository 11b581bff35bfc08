//! Remote state source abstraction.
//!
//! A source exposes one resource collection through two operations:
//!
//! - `list`: the full current collection plus the version token it was read
//!   at
//! - `watch`: a live stream of changes strictly after a given version token
//!
//! Listing at version `V` and then watching from `V` yields a gap-free view of
//! the collection. Streams may end at any time (network reset, server-side
//! timeout); callers resume by watching again from the last version they
//! observed.

use async_trait::async_trait;
use core_async::stream::BoxStream;
use core_async::time::Duration;

use crate::error::Result;
use crate::resource::{ObjectMeta, Resource, ResourceVersion};

/// Scoping for list and watch calls.
///
/// Passed explicitly on every call; sources never fall back to an ambient
/// default namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    /// Restrict to a single namespace. `None` means every namespace.
    pub namespace: Option<String>,
    /// Ask the source to end the watch stream after this long. The caller
    /// resumes transparently.
    pub timeout: Option<Duration>,
}

impl ListParams {
    pub fn all_namespaces() -> Self {
        Self::default()
    }

    pub fn namespaced(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether an object with `meta` falls inside this scope.
    pub fn matches(&self, meta: &ObjectMeta) -> bool {
        match &self.namespace {
            Some(namespace) => meta.namespace.as_deref() == Some(namespace.as_str()),
            None => true,
        }
    }
}

/// Result of a bulk listing.
#[derive(Debug, Clone)]
pub struct ObjectList<R> {
    pub items: Vec<R>,
    /// Version token the listing is consistent with.
    pub resource_version: ResourceVersion,
}

/// Payload of a deletion notification.
///
/// Sources send the last known object when they have it. When they do not
/// (or when the core discovers a deletion it missed while disconnected), only
/// identifying metadata is available.
#[derive(Debug, Clone)]
pub enum DeletedObject<R> {
    Object(R),
    Tombstone(ObjectMeta),
}

impl<R: Resource> DeletedObject<R> {
    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Self::Object(object) => object.meta(),
            Self::Tombstone(meta) => meta,
        }
    }

    pub fn resource_version(&self) -> ResourceVersion {
        self.meta().resource_version
    }

    /// The full object body, if the notification carried one.
    pub fn object(&self) -> Option<&R> {
        match self {
            Self::Object(object) => Some(object),
            Self::Tombstone(_) => None,
        }
    }
}

/// One change observed on a watch stream.
#[derive(Debug, Clone)]
pub enum WatchEvent<R> {
    Added(R),
    Modified(R),
    Deleted(DeletedObject<R>),
    /// No object changed, but the stream has progressed to this version.
    Bookmark(ResourceVersion),
}

impl<R: Resource> WatchEvent<R> {
    pub fn resource_version(&self) -> ResourceVersion {
        match self {
            Self::Added(object) | Self::Modified(object) => object.resource_version(),
            Self::Deleted(deleted) => deleted.resource_version(),
            Self::Bookmark(version) => *version,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Modified(_) => "modified",
            Self::Deleted(_) => "deleted",
            Self::Bookmark(_) => "bookmark",
        }
    }
}

/// Live change stream. Ending the stream signals a disconnect, not an error.
pub type WatchStream<R> = BoxStream<'static, Result<WatchEvent<R>>>;

/// Remote state source for one resource collection.
#[async_trait]
pub trait ResourceSource<R: Resource>: Send + Sync {
    /// Returns the full collection within `params` and the version it was
    /// read at.
    async fn list(&self, params: &ListParams) -> Result<ObjectList<R>>;

    /// Opens a change stream carrying every change with a version strictly
    /// greater than `since`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Expired`](crate::BridgeError::Expired) when the
    /// source no longer retains history back to `since`.
    async fn watch(&self, params: &ListParams, since: ResourceVersion) -> Result<WatchStream<R>>;
}
