use std::fmt::{self, Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};
use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use crate::backend::{Backend, BackendPolicy};
use crate::error::{StorageError, StorageResult};
use crate::factory::{BackendFactory, Provisioned};
use crate::hash::ContentHash;
use crate::params::Parameters;
use crate::stream::BlobStream;
use crate::usage::StorageUsage;

pub const STORAGE_TYPE: &str = "fs";

const UPLOADS_DIR: &str = "uploads";
const PREFIX_LEN: usize = 3;

/// Blobs as plain files under a base directory.
///
/// A confirmed blob lives at `{base}/{first 3 hex chars}/{hash}`, an
/// upload in progress at `{base}/uploads/{hash}`. Finalizing renames the
/// pending file into place, so readers never observe a partial blob.
#[derive(Debug, Clone)]
pub struct FileSystemBackend {
    base_path: PathBuf,
    policy: BackendPolicy,
}

impl FileSystemBackend {
    pub fn new(base_path: impl Into<PathBuf>, policy: BackendPolicy) -> Self {
        Self { base_path: base_path.into(), policy }
    }

    fn blob_path(&self, hash: &ContentHash) -> PathBuf {
        let hash = hash.as_str();
        self.base_path.join(&hash[..PREFIX_LEN]).join(hash)
    }

    fn upload_path(&self, hash: &ContentHash) -> PathBuf {
        self.base_path.join(UPLOADS_DIR).join(hash.as_str())
    }

    fn path_for(&self, hash: &ContentHash, confirmed: bool) -> PathBuf {
        if confirmed {
            self.blob_path(hash)
        } else {
            self.upload_path(hash)
        }
    }

    async fn ensure_parent(path: &Path) -> io::Result<()> {
        match path.parent() {
            Some(parent) => fs::create_dir_all(parent).await,
            None => Ok(()),
        }
    }
}

/// `Ok(false)` when the file is missing, the error otherwise.
async fn is_file(path: &Path) -> io::Result<bool> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_file()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

async fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

impl Display for FileSystemBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "fs:{}", self.base_path.display())
    }
}

#[async_trait]
impl Backend for FileSystemBackend {
    async fn head(&self, hash: &ContentHash) -> bool {
        match is_file(&self.blob_path(hash)).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(backend = %self, %hash, error = %e, "head failed");
                false
            }
        }
    }

    async fn get_size(&self, hash: &ContentHash) -> StorageResult<u64> {
        match fs::metadata(self.blob_path(hash)).await {
            Ok(meta) if meta.is_file() => Ok(meta.len()),
            Ok(_) => Err(StorageError::NotFound(hash.clone())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StorageError::NotFound(hash.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, hash: &ContentHash, confirmed: bool) -> StorageResult<BlobStream> {
        let path = self.path_for(hash, confirmed);
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(hash.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata().await?.len();
        Ok(BlobStream::from_reader(file, Some(size)))
    }

    async fn create(&self, hash: &ContentHash, source: &Path) -> StorageResult<bool> {
        let data = fs::read(source)
            .await
            .map_err(|e| StorageError::source_unreadable(source, e))?;
        // Staged under uploads/ and renamed into place: confirmed blobs are never partial.
        let staging = self.upload_path(hash).with_extension("create");
        Self::ensure_parent(&staging).await?;
        fs::write(&staging, &data).await?;

        let target = self.blob_path(hash);
        Self::ensure_parent(&target).await?;
        fs::rename(&staging, &target).await?;
        remove_if_exists(&self.upload_path(hash)).await?;
        Ok(true)
    }

    async fn init_upload(
        &self,
        hash: &ContentHash,
        size: u64,
        _name: &str,
        _mime_type: &str,
    ) -> StorageResult<bool> {
        let pending = self.upload_path(hash);
        Self::ensure_parent(&pending).await?;
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&pending)
            .await?;
        remove_if_exists(&self.blob_path(hash)).await?;
        tracing::debug!(backend = %self, %hash, declared_size = size, "upload initialised");
        Ok(true)
    }

    async fn add_chunk(&self, hash: &ContentHash, chunk: &[u8]) -> StorageResult<bool> {
        let pending = self.upload_path(hash);
        let mut file = match OpenOptions::new().append(true).open(&pending).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        file.write_all(chunk).await?;
        file.flush().await?;
        Ok(true)
    }

    async fn finalize_upload(&self, hash: &ContentHash) -> StorageResult<bool> {
        let pending = self.upload_path(hash);
        if !is_file(&pending).await? {
            return Ok(false);
        }
        let target = self.blob_path(hash);
        Self::ensure_parent(&target).await?;
        fs::rename(&pending, &target).await?;
        Ok(true)
    }

    async fn remove(&self, hash: &ContentHash) -> StorageResult<bool> {
        let confirmed = remove_if_exists(&self.blob_path(hash)).await?;
        let pending = remove_if_exists(&self.upload_path(hash)).await?;
        Ok(confirmed || pending)
    }

    async fn health(&self) -> bool {
        matches!(fs::metadata(&self.base_path).await, Ok(meta) if meta.is_dir())
    }

    fn is_read_only(&self) -> bool {
        self.policy.read_only
    }

    fn should_skip(&self, usage: StorageUsage) -> bool {
        self.policy.should_skip(usage)
    }
}

pub struct FileSystemFactory;

impl FileSystemFactory {
    pub const PATH: &'static str = "path";
}

impl BackendFactory for FileSystemFactory {
    fn storage_type(&self) -> &'static str {
        STORAGE_TYPE
    }

    fn create_backend(&self, parameters: &Parameters) -> StorageResult<Provisioned> {
        parameters.reject_unknown(&[Self::PATH])?;
        let policy = parameters.policy()?;
        match parameters.string(Self::PATH)? {
            Some(path) if !path.is_empty() => {
                std::fs::create_dir_all(&path)?;
                Ok(Provisioned::ready(FileSystemBackend::new(path, policy)))
            }
            _ => Ok(Provisioned::NotConfigured("no storage path".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use crate::backends::contract;

    #[tokio::test]
    async fn test_fs_backend_contract() {
        let temp_dir = tempdir().unwrap();
        let backend = FileSystemBackend::new(temp_dir.path(), BackendPolicy::default());
        contract::run_all(&backend).await;
    }

    #[tokio::test]
    async fn test_layout_on_disk() {
        let temp_dir = tempdir().unwrap();
        let backend = FileSystemBackend::new(temp_dir.path(), BackendPolicy::default());
        let hash = ContentHash::parse("d41d8cd98f00b204e9800998ecf8427e").unwrap();

        backend.init_upload(&hash, 2, "a", "text/plain").await.unwrap();
        backend.add_chunk(&hash, b"hi").await.unwrap();
        assert!(temp_dir.path().join("uploads").join(hash.as_str()).is_file());

        backend.finalize_upload(&hash).await.unwrap();
        assert!(temp_dir.path().join("d41").join(hash.as_str()).is_file());
        assert!(!temp_dir.path().join("uploads").join(hash.as_str()).exists());
    }

    #[tokio::test]
    async fn test_health_requires_base_directory() {
        let temp_dir = tempdir().unwrap();
        let backend = FileSystemBackend::new(temp_dir.path().join("missing"), BackendPolicy::default());
        assert!(!backend.health().await);
    }

    #[test]
    fn test_factory_creates_base_directory() {
        let temp_dir = tempdir().unwrap();
        let base = temp_dir.path().join("blobs");
        let params = Parameters::new().with("path", base.to_string_lossy().to_string());
        assert!(FileSystemFactory.create_backend(&params).unwrap().is_ready());
        assert!(base.is_dir());
        assert!(!FileSystemFactory.create_backend(&Parameters::new()).unwrap().is_ready());
    }
}
