//! Object keys.
//!
//! A key is `namespace/name` for namespaced objects and plain `name` for
//! cluster-scoped ones. It is the unit of deduplication in the work queue and
//! the lookup key of the store.

use bridge_traits::{DeletedObject, ObjectMeta, Resource};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ControllerError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectKey {
    namespace: Option<String>,
    name: String,
}

impl ObjectKey {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    pub fn from_meta(meta: &ObjectMeta) -> Self {
        Self {
            namespace: meta.namespace.clone(),
            name: meta.name.clone(),
        }
    }

    pub fn for_object<R: Resource>(object: &R) -> Self {
        Self::from_meta(object.meta())
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Key for a deletion notification, whether it carries the last known object
/// or only a tombstone with identifying metadata.
pub fn deletion_handling_key<R: Resource>(deleted: &DeletedObject<R>) -> ObjectKey {
    ObjectKey::from_meta(deleted.meta())
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}", namespace, self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for ObjectKey {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ControllerError::InvalidKey {
            key: s.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) if !name.is_empty() => Ok(Self::cluster_scoped(name)),
            (Some(namespace), Some(name), None) => {
                if namespace.is_empty() || name.is_empty() {
                    Err(invalid("namespace and name must be non-empty"))
                } else {
                    Ok(Self::namespaced(namespace, name))
                }
            }
            (Some(_), None, None) => Err(invalid("key is empty")),
            _ => Err(invalid("expected 'namespace/name' or 'name'")),
        }
    }
}

impl TryFrom<String> for ObjectKey {
    type Error = ControllerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ObjectKey> for String {
    fn from(key: ObjectKey) -> Self {
        key.to_string()
    }
}
