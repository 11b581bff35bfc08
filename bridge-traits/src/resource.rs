//! Identity and versioning of managed objects.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Opaque, monotonically increasing version token.
///
/// Every change the source emits carries a version strictly greater than all
/// earlier changes in the same collection. `ResourceVersion::ZERO` means
/// "nothing observed yet".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ResourceVersion(u64);

impl ResourceVersion {
    pub const ZERO: ResourceVersion = ResourceVersion(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// The version immediately after this one.
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ResourceVersion {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl From<u64> for ResourceVersion {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Identifying metadata shared by every managed object.
///
/// Deletion notifications may carry only this part of an object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    /// `None` for cluster-scoped objects.
    pub namespace: Option<String>,
    pub resource_version: ResourceVersion,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Metadata for a cluster-scoped object.
    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Metadata for an object living in `namespace`.
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
            ..Self::default()
        }
    }

    pub fn with_resource_version(mut self, version: impl Into<ResourceVersion>) -> Self {
        self.resource_version = version.into();
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// A managed object kind.
///
/// Controllers are generic over one `Resource` type fixed at construction
/// time; the store hands out `Arc<R>` snapshots, so implementations only need
/// to be cheap to clone when the source produces them.
pub trait Resource: Clone + fmt::Debug + Send + Sync + 'static {
    /// Human-readable kind name used in logs and events (e.g. `"Deployment"`).
    const KIND: &'static str;

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn resource_version(&self) -> ResourceVersion {
        self.meta().resource_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_version_ordering() {
        let v1 = ResourceVersion::new(1);
        let v2 = v1.next();
        assert!(v2 > v1);
        assert!(ResourceVersion::ZERO.is_zero());
        assert_eq!("42".parse::<ResourceVersion>().unwrap(), ResourceVersion::new(42));
        assert_eq!(ResourceVersion::new(u64::MAX).next().get(), u64::MAX);
    }

    #[test]
    fn test_object_meta_builders() {
        let meta = ObjectMeta::namespaced("default", "web")
            .with_resource_version(7)
            .with_label("app", "web");

        assert_eq!(meta.namespace.as_deref(), Some("default"));
        assert_eq!(meta.name, "web");
        assert_eq!(meta.resource_version, ResourceVersion::new(7));
        assert_eq!(meta.labels.get("app"), Some(&"web".to_string()));

        let cluster = ObjectMeta::cluster_scoped("node-a");
        assert!(cluster.namespace.is_none());
    }

    #[test]
    fn test_resource_version_serializes_transparently() {
        let json = serde_json::to_string(&ResourceVersion::new(12)).unwrap();
        assert_eq!(json, "12");
    }
}
