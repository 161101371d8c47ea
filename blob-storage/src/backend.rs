use std::fmt::Display;
use std::path::Path;
use async_trait::async_trait;
use crate::error::StorageResult;
use crate::hash::ContentHash;
use crate::stream::BlobStream;
use crate::usage::StorageUsage;

/// Storage contract shared by every backend.
///
/// Per hash, a backend moves `absent -> uploading -> confirmed` through
/// `init_upload`, `add_chunk`* and `finalize_upload`, or straight to
/// confirmed through `create`. Chunks for one hash must be sent one at a
/// time and in order; backends do not lock per hash.
///
/// Mutating operations return `Ok(false)` when the contract refuses the
/// call (no matching upload, nothing to delete) and `Err` when the backend
/// itself failed.
#[async_trait]
pub trait Backend: Display + Send + Sync {
    /// True iff a confirmed blob exists.
    async fn head(&self, hash: &ContentHash) -> bool;

    /// Byte length of the confirmed blob.
    async fn get_size(&self, hash: &ContentHash) -> StorageResult<u64>;

    /// Opens the blob whose confirmation flag equals `confirmed`.
    async fn read(&self, hash: &ContentHash, confirmed: bool) -> StorageResult<BlobStream>;

    /// Stores the whole file as a confirmed blob sized from the file itself.
    async fn create(&self, hash: &ContentHash, source: &Path) -> StorageResult<bool>;

    /// Starts (or restarts) an upload with empty content.
    async fn init_upload(
        &self,
        hash: &ContentHash,
        size: u64,
        name: &str,
        mime_type: &str,
    ) -> StorageResult<bool>;

    async fn add_chunk(&self, hash: &ContentHash, chunk: &[u8]) -> StorageResult<bool>;

    async fn finalize_upload(&self, hash: &ContentHash) -> StorageResult<bool>;

    async fn remove(&self, hash: &ContentHash) -> StorageResult<bool>;

    /// Must not fail: any fault while probing collapses to `false`.
    async fn health(&self) -> bool;

    fn is_read_only(&self) -> bool;

    fn should_skip(&self, usage: StorageUsage) -> bool;
}

/// Routing flags every backend descriptor may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendPolicy {
    pub read_only: bool,
    pub skip: bool,
    /// Highest usage this backend serves.
    pub usage: StorageUsage,
}

impl Default for BackendPolicy {
    fn default() -> Self {
        Self { read_only: false, skip: false, usage: StorageUsage::External }
    }
}

impl BackendPolicy {
    pub fn read_only() -> Self {
        Self { read_only: true, ..Self::default() }
    }

    pub fn with_usage(usage: StorageUsage) -> Self {
        Self { usage, ..Self::default() }
    }

    pub fn should_skip(&self, requested: StorageUsage) -> bool {
        self.skip || requested > self.usage
    }
}
