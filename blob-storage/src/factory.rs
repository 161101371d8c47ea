use std::collections::BTreeMap;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use crate::backend::Backend;
use crate::backends::entity::EntityFactory;
use crate::backends::fs::FileSystemFactory;
use crate::backends::http::HttpFactory;
use crate::backends::memory::MemoryFactory;
use crate::backends::s3::S3Factory;
use crate::error::{StorageError, StorageResult};
use crate::params::Parameters;
use crate::router::StorageRouter;
use crate::usage::StorageUsage;

/// One configured storage: its type plus backend-specific parameters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BackendDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub parameters: Parameters,
}

impl BackendDescriptor {
    pub fn new(kind: impl Into<String>, parameters: Parameters) -> Self {
        Self { kind: kind.into(), parameters }
    }
}

/// Outcome of a factory that accepted its parameters.
pub enum Provisioned {
    Ready(Arc<dyn Backend>),
    /// The descriptor is valid but lacks what the backend needs to run,
    /// so the storage is left out instead of failing startup.
    NotConfigured(String),
}

impl Provisioned {
    pub fn ready(backend: impl Backend + 'static) -> Self {
        Provisioned::Ready(Arc::new(backend))
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Provisioned::Ready(_))
    }
}

pub trait BackendFactory: Send + Sync {
    /// Value of the descriptor's `type` this factory builds.
    fn storage_type(&self) -> &'static str;

    fn create_backend(&self, parameters: &Parameters) -> StorageResult<Provisioned>;
}

/// Registration table from type string to factory, built once at startup.
#[derive(Default)]
pub struct FactoryRegistry {
    factories: BTreeMap<&'static str, Box<dyn BackendFactory>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(EntityFactory);
        registry.register(FileSystemFactory);
        registry.register(HttpFactory);
        registry.register(S3Factory);
        registry.register(MemoryFactory);
        registry
    }

    pub fn register(&mut self, factory: impl BackendFactory + 'static) {
        self.factories.insert(factory.storage_type(), Box::new(factory));
    }

    pub fn types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    pub fn build(&self, descriptor: &BackendDescriptor) -> StorageResult<Provisioned> {
        let factory = self.factories.get(descriptor.kind.as_str()).ok_or_else(|| {
            StorageError::Configuration(format!("unknown storage type {:?}", descriptor.kind))
        })?;
        factory.create_backend(&descriptor.parameters)
    }

    /// Builds every descriptor, in order, into a router for `usage`.
    ///
    /// The first invalid descriptor aborts assembly; unconfigured ones are dropped.
    pub fn assemble(
        &self,
        descriptors: &[BackendDescriptor],
        usage: StorageUsage,
    ) -> StorageResult<StorageRouter> {
        let mut backends = Vec::with_capacity(descriptors.len());
        for (position, descriptor) in descriptors.iter().enumerate() {
            match self.build(descriptor) {
                Ok(Provisioned::Ready(backend)) => {
                    tracing::info!(position, kind = %descriptor.kind, %backend, "storage backend ready");
                    backends.push(backend);
                }
                Ok(Provisioned::NotConfigured(reason)) => {
                    tracing::warn!(position, kind = %descriptor.kind, %reason, "storage backend not configured, skipping it");
                }
                Err(StorageError::Configuration(message)) => {
                    return Err(StorageError::Configuration(format!(
                        "storage #{position} ({}): {message}",
                        descriptor.kind
                    )));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(StorageRouter::new(backends, usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(value: serde_json::Value) -> BackendDescriptor {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_descriptor_flattens_parameters() {
        let d = descriptor(json!({"type": "http", "base-url": "http://origin", "read-only": true}));
        assert_eq!(d.kind, "http");
        assert_eq!(d.parameters.string("base-url").unwrap().as_deref(), Some("http://origin"));
        assert!(!d.parameters.contains("type"));
    }

    #[test]
    fn test_default_types() {
        let registry = FactoryRegistry::with_defaults();
        let types: Vec<_> = registry.types().collect();
        assert_eq!(types, vec!["db", "fs", "http", "memory", "s3"]);
    }

    #[test]
    fn test_unknown_type_is_configuration_error() {
        let registry = FactoryRegistry::with_defaults();
        let result = registry.build(&descriptor(json!({"type": "unknown"})));
        assert!(matches!(result, Err(StorageError::Configuration(_))));
    }

    #[test]
    fn test_s3_without_credentials_is_not_configured() {
        let registry = FactoryRegistry::with_defaults();
        let result = registry.build(&descriptor(json!({"type": "s3", "bucket": "assets"}))).unwrap();
        assert!(matches!(result, Provisioned::NotConfigured(_)));
    }

    #[test]
    fn test_invalid_flag_is_configuration_error() {
        let registry = FactoryRegistry::with_defaults();
        let result = registry.build(&descriptor(json!({"type": "memory", "skip": "sometimes"})));
        assert!(matches!(result, Err(StorageError::Configuration(_))));
    }

    #[test]
    fn test_assemble_drops_unconfigured_backends() {
        let registry = FactoryRegistry::with_defaults();
        let descriptors = vec![
            descriptor(json!({"type": "http"})),
            descriptor(json!({"type": "memory"})),
            descriptor(json!({"type": "s3"})),
        ];
        let router = registry.assemble(&descriptors, StorageUsage::Asset).unwrap();
        assert_eq!(router.backends().len(), 1);
        assert_eq!(router.usage(), StorageUsage::Asset);
    }

    #[test]
    fn test_assemble_fails_fast() {
        let registry = FactoryRegistry::with_defaults();
        let descriptors = vec![
            descriptor(json!({"type": "memory"})),
            descriptor(json!({"type": "ftp"})),
        ];
        let err = registry.assemble(&descriptors, StorageUsage::Asset).err().unwrap();
        assert!(err.to_string().contains("storage #1"));
    }

    #[test]
    fn test_empty_registry_knows_nothing() {
        let registry = FactoryRegistry::new();
        assert!(registry.build(&descriptor(json!({"type": "memory"}))).is_err());
    }
}
