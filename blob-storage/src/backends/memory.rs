//! In-process backend, mainly for tests and throwaway setups.

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::path::Path;
use async_trait::async_trait;
use tokio::sync::RwLock;
use crate::backend::{Backend, BackendPolicy};
use crate::blob::BlobRecord;
use crate::error::{StorageError, StorageResult};
use crate::factory::{BackendFactory, Provisioned};
use crate::hash::ContentHash;
use crate::params::Parameters;
use crate::stream::BlobStream;
use crate::usage::StorageUsage;

pub const STORAGE_TYPE: &str = "memory";

#[derive(Debug, Default)]
pub struct MemoryBackend {
    blobs: RwLock<HashMap<ContentHash, (BlobRecord, Vec<u8>)>>,
    policy: BackendPolicy,
}

impl MemoryBackend {
    pub fn new(policy: BackendPolicy) -> Self {
        Self { blobs: RwLock::default(), policy }
    }

    /// Stores `data` as a confirmed blob without going through a file.
    pub async fn insert(&self, hash: ContentHash, data: impl Into<Vec<u8>>) {
        let data = data.into();
        let record = BlobRecord::confirmed(data.len() as u64);
        self.blobs.write().await.insert(hash, (record, data));
    }

    /// Number of records, confirmed or not.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Display for MemoryBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("memory")
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn head(&self, hash: &ContentHash) -> bool {
        self.blobs
            .read()
            .await
            .get(hash)
            .is_some_and(|(record, _)| record.matches(true))
    }

    async fn get_size(&self, hash: &ContentHash) -> StorageResult<u64> {
        match self.blobs.read().await.get(hash) {
            Some((record, _)) if record.matches(true) => Ok(record.size),
            _ => Err(StorageError::NotFound(hash.clone())),
        }
    }

    async fn read(&self, hash: &ContentHash, confirmed: bool) -> StorageResult<BlobStream> {
        match self.blobs.read().await.get(hash) {
            Some((record, contents)) if record.matches(confirmed) => {
                Ok(BlobStream::from_bytes(contents.clone()))
            }
            _ => Err(StorageError::NotFound(hash.clone())),
        }
    }

    async fn create(&self, hash: &ContentHash, source: &Path) -> StorageResult<bool> {
        let data = tokio::fs::read(source)
            .await
            .map_err(|e| StorageError::source_unreadable(source, e))?;
        self.insert(hash.clone(), data).await;
        Ok(true)
    }

    async fn init_upload(
        &self,
        hash: &ContentHash,
        _size: u64,
        name: &str,
        mime_type: &str,
    ) -> StorageResult<bool> {
        let record = BlobRecord::uploading(name, mime_type);
        self.blobs.write().await.insert(hash.clone(), (record, Vec::new()));
        Ok(true)
    }

    async fn add_chunk(&self, hash: &ContentHash, chunk: &[u8]) -> StorageResult<bool> {
        let mut blobs = self.blobs.write().await;
        let Some((record, contents)) = blobs.get_mut(hash) else {
            return Ok(false);
        };
        if !record.append(chunk.len() as u64) {
            return Ok(false);
        }
        contents.extend_from_slice(chunk);
        Ok(true)
    }

    async fn finalize_upload(&self, hash: &ContentHash) -> StorageResult<bool> {
        let mut blobs = self.blobs.write().await;
        Ok(match blobs.get_mut(hash) {
            Some((record, contents)) => record.finalize(contents.len() as u64),
            None => false,
        })
    }

    async fn remove(&self, hash: &ContentHash) -> StorageResult<bool> {
        Ok(self.blobs.write().await.remove(hash).is_some())
    }

    async fn health(&self) -> bool {
        true
    }

    fn is_read_only(&self) -> bool {
        self.policy.read_only
    }

    fn should_skip(&self, usage: StorageUsage) -> bool {
        self.policy.should_skip(usage)
    }
}

pub struct MemoryFactory;

impl BackendFactory for MemoryFactory {
    fn storage_type(&self) -> &'static str {
        STORAGE_TYPE
    }

    fn create_backend(&self, parameters: &Parameters) -> StorageResult<Provisioned> {
        parameters.reject_unknown(&[])?;
        Ok(Provisioned::ready(MemoryBackend::new(parameters.policy()?)))
    }
}
