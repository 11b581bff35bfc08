//! Sample resource kinds for local runs and tests.

use bridge_traits::{ObjectMeta, Resource};
use serde::{Deserialize, Serialize};

pub const DEFAULT_IMAGE: &str = "nginx:latest";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub meta: ObjectMeta,
    pub replicas: u32,
    pub image: String,
}

impl Deployment {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, replicas: u32) -> Self {
        Self {
            meta: ObjectMeta::namespaced(namespace, name),
            replicas,
            image: DEFAULT_IMAGE.to_string(),
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta = self.meta.with_label(key, value);
        self
    }
}

impl Resource for Deployment {
    const KIND: &'static str = "Deployment";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub meta: ObjectMeta,
    pub port: u16,
}

impl Service {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, port: u16) -> Self {
        Self {
            meta: ObjectMeta::namespaced(namespace, name),
            port,
        }
    }
}

impl Resource for Service {
    const KIND: &'static str = "Service";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deployment_serializes_with_metadata() {
        let deployment = Deployment::new("default", "web", 3)
            .with_image("nginx:1.27")
            .with_label("app", "web");
        let json = serde_json::to_value(&deployment).unwrap();

        assert_eq!(json["meta"]["namespace"], "default");
        assert_eq!(json["meta"]["labels"]["app"], "web");
        assert_eq!(json["replicas"], 3);
        assert_eq!(json["image"], "nginx:1.27");

        let back: Deployment = serde_json::from_value(json).unwrap();
        assert_eq!(back, deployment);
    }
}
