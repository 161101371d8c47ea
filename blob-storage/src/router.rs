use std::fmt::{self, Display, Formatter};
use std::path::Path;
use std::sync::Arc;
use crate::backend::Backend;
use crate::error::{StorageError, StorageResult};
use crate::hash::ContentHash;
use crate::stream::BlobStream;
use crate::usage::StorageUsage;

/// A mutating call, replayed against every writable backend.
enum Write<'a> {
    Create(&'a Path),
    InitUpload { size: u64, name: &'a str, mime_type: &'a str },
    AddChunk(&'a [u8]),
    FinalizeUpload,
    Remove,
}

impl Write<'_> {
    async fn apply(&self, backend: &dyn Backend, hash: &ContentHash) -> StorageResult<bool> {
        match self {
            Write::Create(source) => backend.create(hash, source).await,
            Write::InitUpload { size, name, mime_type } => {
                backend.init_upload(hash, *size, name, mime_type).await
            }
            Write::AddChunk(chunk) => backend.add_chunk(hash, chunk).await,
            Write::FinalizeUpload => backend.finalize_upload(hash).await,
            Write::Remove => backend.remove(hash).await,
        }
    }
}

impl Display for Write<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Write::Create(_) => "create",
            Write::InitUpload { .. } => "init_upload",
            Write::AddChunk(_) => "add_chunk",
            Write::FinalizeUpload => "finalize_upload",
            Write::Remove => "remove",
        })
    }
}

/// Outcome of a read that no backend served.
///
/// `NotFound` only when some backend reported the blob absent (or there
/// was no backend to ask); otherwise the last backend failure.
struct Misses<'a> {
    hash: &'a ContentHash,
    absent: bool,
    failure: Option<StorageError>,
}

impl<'a> Misses<'a> {
    fn new(hash: &'a ContentHash) -> Self {
        Self { hash, absent: false, failure: None }
    }

    fn record(&mut self, error: StorageError) {
        if error.is_not_found() {
            self.absent = true;
        } else {
            self.failure = Some(error);
        }
    }

    fn into_error(self) -> StorageError {
        match (self.failure, self.absent) {
            (Some(failure), false) => failure,
            _ => StorageError::NotFound(self.hash.clone()),
        }
    }
}

/// Ordered set of backends serving one usage class.
///
/// Reads stop at the first backend that has the blob. Writes go to every
/// backend that is neither read-only nor skipped for this usage, one after
/// the other in list order, and a failing backend never stops the rest.
pub struct StorageRouter {
    backends: Vec<Arc<dyn Backend>>,
    usage: StorageUsage,
}

impl StorageRouter {
    pub fn new(backends: Vec<Arc<dyn Backend>>, usage: StorageUsage) -> Self {
        Self { backends, usage }
    }

    pub fn usage(&self) -> StorageUsage {
        self.usage
    }

    pub fn backends(&self) -> &[Arc<dyn Backend>] {
        &self.backends
    }

    fn readable(&self) -> impl Iterator<Item = &Arc<dyn Backend>> + '_ {
        self.backends.iter().filter(move |b| !b.should_skip(self.usage))
    }

    fn writable(&self) -> impl Iterator<Item = &Arc<dyn Backend>> + '_ {
        self.readable().filter(|b| !b.is_read_only())
    }

    pub async fn head(&self, hash: &ContentHash) -> bool {
        for backend in self.readable() {
            if backend.head(hash).await {
                return true;
            }
        }
        false
    }

    pub async fn get_size(&self, hash: &ContentHash) -> StorageResult<u64> {
        let mut misses = Misses::new(hash);
        for backend in self.readable() {
            match backend.get_size(hash).await {
                Ok(size) => return Ok(size),
                Err(e) => {
                    if !e.is_not_found() {
                        tracing::warn!(%backend, %hash, error = %e, "get_size failed, trying next backend");
                    }
                    misses.record(e);
                }
            }
        }
        Err(misses.into_error())
    }

    pub async fn read(&self, hash: &ContentHash, confirmed: bool) -> StorageResult<BlobStream> {
        let mut misses = Misses::new(hash);
        for backend in self.readable() {
            match backend.read(hash, confirmed).await {
                Ok(stream) => {
                    tracing::debug!(%backend, %hash, confirmed, "read served");
                    return Ok(stream);
                }
                Err(e) => {
                    if !e.is_not_found() {
                        tracing::warn!(%backend, %hash, error = %e, "read failed, trying next backend");
                    }
                    misses.record(e);
                }
            }
        }
        Err(misses.into_error())
    }

    /// Reads a confirmed blob fully into memory.
    pub async fn read_bytes(&self, hash: &ContentHash) -> StorageResult<Vec<u8>> {
        Ok(self.read(hash, true).await?.into_bytes().await?)
    }

    pub async fn create(&self, hash: &ContentHash, source: &Path) -> StorageResult<bool> {
        self.fan_out(hash, Write::Create(source)).await
    }

    pub async fn init_upload(
        &self,
        hash: &ContentHash,
        size: u64,
        name: &str,
        mime_type: &str,
    ) -> StorageResult<bool> {
        self.fan_out(hash, Write::InitUpload { size, name, mime_type }).await
    }

    pub async fn add_chunk(&self, hash: &ContentHash, chunk: &[u8]) -> StorageResult<bool> {
        self.fan_out(hash, Write::AddChunk(chunk)).await
    }

    pub async fn finalize_upload(&self, hash: &ContentHash) -> StorageResult<bool> {
        self.fan_out(hash, Write::FinalizeUpload).await
    }

    pub async fn remove(&self, hash: &ContentHash) -> StorageResult<bool> {
        self.fan_out(hash, Write::Remove).await
    }

    /// True iff every backend serving this usage is healthy. A router
    /// without any such backend can serve nothing and is unhealthy.
    pub async fn health(&self) -> bool {
        let mut servable = 0;
        for backend in self.readable() {
            servable += 1;
            if !backend.health().await {
                tracing::warn!(%backend, usage = %self.usage, "backend unhealthy");
                return false;
            }
        }
        servable > 0
    }

    /// `Ok(true)` when at least one backend accepted the write. With no
    /// success, a source file that could not be read is the caller's
    /// problem and is returned as such; anything else is `Ok(false)`.
    async fn fan_out(&self, hash: &ContentHash, write: Write<'_>) -> StorageResult<bool> {
        let mut succeeded = 0usize;
        let mut unreadable = None;
        for backend in self.writable() {
            match write.apply(backend.as_ref(), hash).await {
                Ok(true) => succeeded += 1,
                Ok(false) => tracing::debug!(%backend, %hash, operation = %write, "write refused"),
                Err(e @ StorageError::SourceUnreadable { .. }) => {
                    tracing::warn!(%backend, %hash, operation = %write, error = %e, "write failed");
                    if unreadable.is_none() {
                        unreadable = Some(e);
                    }
                }
                Err(e) => tracing::warn!(%backend, %hash, operation = %write, error = %e, "write failed"),
            }
        }
        if succeeded > 0 {
            return Ok(true);
        }
        match unreadable {
            Some(e) => Err(e),
            None => Ok(false),
        }
    }
}
