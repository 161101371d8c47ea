use std::path::Path;
use serde::{Deserialize, Serialize};
use crate::error::{StorageError, StorageResult};
use crate::factory::{BackendDescriptor, FactoryRegistry};
use crate::router::StorageRouter;
use crate::usage::StorageUsage;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_usage")]
    pub usage: StorageUsage,
    #[serde(default)]
    pub storages: Vec<BackendDescriptor>,
}

fn default_usage() -> StorageUsage {
    StorageUsage::Asset
}

/// A full config object, or just the list of storages.
#[derive(Deserialize)]
#[serde(untagged)]
enum ConfigDocument {
    Storages(Vec<BackendDescriptor>),
    Full(StorageConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { usage: default_usage(), storages: Vec::new() }
    }
}

impl StorageConfig {
    pub fn from_json_str(raw: &str) -> StorageResult<Self> {
        let document: ConfigDocument = serde_json::from_str(raw)
            .map_err(|e| StorageError::Configuration(format!("invalid storage configuration: {e}")))?;
        Ok(match document {
            ConfigDocument::Storages(storages) => Self { storages, ..Self::default() },
            ConfigDocument::Full(config) => config,
        })
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            StorageError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn with_usage(mut self, usage: StorageUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn assemble(&self, registry: &FactoryRegistry) -> StorageResult<StorageRouter> {
        registry.assemble(&self.storages, self.usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_full_document() {
        let config = StorageConfig::from_json_str(
            r#"{"usage": "cache", "storages": [{"type": "memory"}, {"type": "http", "base-url": "http://origin"}]}"#,
        )
        .unwrap();
        assert_eq!(config.usage, StorageUsage::Cache);
        assert_eq!(config.storages.len(), 2);
        assert_eq!(config.storages[1].kind, "http");
    }

    #[test]
    fn test_bare_storage_list_defaults_to_asset() {
        let config = StorageConfig::from_json_str(r#"[{"type": "memory", "read-only": true}]"#).unwrap();
        assert_eq!(config.usage, StorageUsage::Asset);
        assert!(config.storages[0].parameters.boolean("read-only", false).unwrap());
    }

    #[test]
    fn test_malformed_document() {
        let err = StorageConfig::from_json_str(r#"{"storages": "memory"}"#).unwrap_err();
        assert!(matches!(err, StorageError::Configuration(_)));
        let err = StorageConfig::from_json_str(r#"{"usage": "archive"}"#).unwrap_err();
        assert!(matches!(err, StorageError::Configuration(_)));
    }

    #[test]
    fn test_from_path_and_assemble() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"usage": "backup", "storages": [{{"type": "memory"}}, {{"type": "s3"}}]}}"#).unwrap();
        let config = StorageConfig::from_path(file.path()).unwrap();
        let router = config.assemble(&FactoryRegistry::with_defaults()).unwrap();
        assert_eq!(router.usage(), StorageUsage::Backup);
        assert_eq!(router.backends().len(), 1);
    }

    #[test]
    fn test_missing_file() {
        let err = StorageConfig::from_path("/nonexistent/blob-storage.json").unwrap_err();
        assert!(matches!(err, StorageError::Configuration(_)));
    }
}
