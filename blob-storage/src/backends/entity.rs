use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use crate::backend::{Backend, BackendPolicy};
use crate::blob::BlobRecord;
use crate::error::{StorageError, StorageResult};
use crate::factory::{BackendFactory, Provisioned};
use crate::hash::ContentHash;
use crate::params::Parameters;
use crate::stream::BlobStream;
use crate::usage::StorageUsage;

pub const STORAGE_TYPE: &str = "db";

const ASSETS: &str = "assets";
const CONTENTS: &str = "contents";

/// Blobs kept as database entities in an embedded RocksDB.
///
/// The `assets` column family maps a hash to its JSON `BlobRecord`, the
/// `contents` column family to the raw bytes. Both are always written in
/// the same batch so a record never points at stale content.
#[derive(Debug, Clone)]
pub struct EntityBackend {
    db: Arc<DB>,
    path: PathBuf,
    policy: BackendPolicy,
}

impl EntityBackend {
    pub fn open<P: AsRef<Path>>(db_path: P, policy: BackendPolicy) -> StorageResult<Self> {
        let mut db_opts = Options::default();
        db_opts.create_missing_column_families(true);
        db_opts.create_if_missing(true);

        let assets = ColumnFamilyDescriptor::new(ASSETS, Options::default());
        let contents = ColumnFamilyDescriptor::new(CONTENTS, Options::default());

        let db = DB::open_cf_descriptors(&db_opts, db_path.as_ref(), vec![assets, contents])?;
        Ok(Self {
            db: Arc::new(db),
            path: db_path.as_ref().to_path_buf(),
            policy,
        })
    }

    fn assets(&self) -> StorageResult<&ColumnFamily> {
        self.cf(ASSETS)
    }

    fn contents(&self) -> StorageResult<&ColumnFamily> {
        self.cf(CONTENTS)
    }

    fn cf(&self, name: &str) -> StorageResult<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::Configuration(format!("column family {name:?} is missing")))
    }

    fn find(&self, hash: &ContentHash) -> StorageResult<Option<BlobRecord>> {
        match self.db.get_cf(self.assets()?, hash.as_str())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn find_by_hash(&self, hash: &ContentHash, confirmed: bool) -> StorageResult<Option<BlobRecord>> {
        Ok(self.find(hash)?.filter(|record| record.matches(confirmed)))
    }

    fn load_contents(&self, hash: &ContentHash) -> StorageResult<Vec<u8>> {
        Ok(self.db.get_cf(self.contents()?, hash.as_str())?.unwrap_or_default())
    }

    fn persist(&self, hash: &ContentHash, record: &BlobRecord, contents: &[u8]) -> StorageResult<()> {
        let mut batch = WriteBatch::default();
        batch.put_cf(self.assets()?, hash.as_str(), serde_json::to_vec(record)?);
        batch.put_cf(self.contents()?, hash.as_str(), contents);
        self.db.write(batch)?;
        Ok(())
    }

    fn persist_record(&self, hash: &ContentHash, record: &BlobRecord) -> StorageResult<()> {
        self.db.put_cf(self.assets()?, hash.as_str(), serde_json::to_vec(record)?)?;
        Ok(())
    }
}

impl Display for EntityBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "db:{}", self.path.display())
    }
}

#[async_trait]
impl Backend for EntityBackend {
    async fn head(&self, hash: &ContentHash) -> bool {
        match self.find_by_hash(hash, true) {
            Ok(record) => record.is_some(),
            Err(e) => {
                tracing::warn!(backend = %self, %hash, error = %e, "head failed");
                false
            }
        }
    }

    async fn get_size(&self, hash: &ContentHash) -> StorageResult<u64> {
        self.find_by_hash(hash, true)?
            .map(|record| record.size)
            .ok_or_else(|| StorageError::NotFound(hash.clone()))
    }

    async fn read(&self, hash: &ContentHash, confirmed: bool) -> StorageResult<BlobStream> {
        if self.find_by_hash(hash, confirmed)?.is_none() {
            return Err(StorageError::NotFound(hash.clone()));
        }
        Ok(BlobStream::from_bytes(self.load_contents(hash)?))
    }

    async fn create(&self, hash: &ContentHash, source: &Path) -> StorageResult<bool> {
        let contents = tokio::fs::read(source)
            .await
            .map_err(|e| StorageError::source_unreadable(source, e))?;
        let record = BlobRecord::confirmed(contents.len() as u64);
        self.persist(hash, &record, &contents)?;
        tracing::debug!(backend = %self, %hash, size = record.size, "blob created");
        Ok(true)
    }

    async fn init_upload(
        &self,
        hash: &ContentHash,
        size: u64,
        name: &str,
        mime_type: &str,
    ) -> StorageResult<bool> {
        self.persist(hash, &BlobRecord::uploading(name, mime_type), &[])?;
        tracing::debug!(backend = %self, %hash, declared_size = size, "upload initialised");
        Ok(true)
    }

    async fn add_chunk(&self, hash: &ContentHash, chunk: &[u8]) -> StorageResult<bool> {
        let Some(mut record) = self.find_by_hash(hash, false)? else {
            return Ok(false);
        };
        if !record.append(chunk.len() as u64) {
            return Ok(false);
        }
        let mut contents = self.load_contents(hash)?;
        contents.extend_from_slice(chunk);
        self.persist(hash, &record, &contents)?;
        Ok(true)
    }

    async fn finalize_upload(&self, hash: &ContentHash) -> StorageResult<bool> {
        let Some(mut record) = self.find_by_hash(hash, false)? else {
            return Ok(false);
        };
        let actual_len = self.load_contents(hash)?.len() as u64;
        if !record.finalize(actual_len) {
            return Ok(false);
        }
        self.persist_record(hash, &record)?;
        tracing::debug!(backend = %self, %hash, size = record.size, "upload finalized");
        Ok(true)
    }

    async fn remove(&self, hash: &ContentHash) -> StorageResult<bool> {
        if self.find(hash)?.is_none() {
            return Ok(false);
        }
        let mut batch = WriteBatch::default();
        batch.delete_cf(self.assets()?, hash.as_str());
        batch.delete_cf(self.contents()?, hash.as_str());
        self.db.write(batch)?;
        Ok(true)
    }

    async fn health(&self) -> bool {
        let Ok(assets) = self.assets() else {
            return false;
        };
        !matches!(self.db.iterator_cf(assets, IteratorMode::Start).next(), Some(Err(_)))
    }

    fn is_read_only(&self) -> bool {
        self.policy.read_only
    }

    fn should_skip(&self, usage: StorageUsage) -> bool {
        self.policy.should_skip(usage)
    }
}

pub struct EntityFactory;

impl EntityFactory {
    pub const PATH: &'static str = "path";
    pub const ACTIVATE: &'static str = "activate";
}

impl BackendFactory for EntityFactory {
    fn storage_type(&self) -> &'static str {
        STORAGE_TYPE
    }

    fn create_backend(&self, parameters: &Parameters) -> StorageResult<Provisioned> {
        parameters.reject_unknown(&[Self::PATH, Self::ACTIVATE])?;
        let policy = parameters.policy()?;
        if !parameters.boolean(Self::ACTIVATE, true)? {
            return Ok(Provisioned::NotConfigured("database storage is deactivated".into()));
        }
        let Some(path) = parameters.string(Self::PATH)? else {
            return Ok(Provisioned::NotConfigured("no database path".into()));
        };
        Ok(Provisioned::ready(EntityBackend::open(path, policy)?))
    }
}
