pub mod entity;
pub mod fs;
pub mod http;
pub mod memory;
pub mod s3;

/// Behaviour every local backend must share, run against each of them.
#[cfg(test)]
pub(crate) mod contract {
    use std::io::Write;
    use tempfile::NamedTempFile;
    use uuid::Uuid;
    use crate::backend::Backend;
    use crate::error::StorageError;
    use crate::hash::ContentHash;

    pub fn random_hash() -> ContentHash {
        ContentHash::parse(&Uuid::new_v4().simple().to_string()).unwrap()
    }

    pub fn source_file(data: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(data).unwrap();
        file.flush().unwrap();
        file
    }

    pub async fn create_then_read(backend: &dyn Backend) {
        let hash = random_hash();
        let data = b"the quick brown fox";
        assert!(!backend.head(&hash).await);

        let source = source_file(data);
        assert!(backend.create(&hash, source.path()).await.unwrap());

        assert!(backend.head(&hash).await);
        assert_eq!(backend.get_size(&hash).await.unwrap(), data.len() as u64);
        let read = backend.read(&hash, true).await.unwrap().into_bytes().await.unwrap();
        assert_eq!(read, data);
    }

    pub async fn create_overwrites(backend: &dyn Backend) {
        let hash = random_hash();
        let first = source_file(b"first version");
        let second = source_file(b"v2");
        backend.create(&hash, first.path()).await.unwrap();
        backend.create(&hash, second.path()).await.unwrap();
        assert_eq!(backend.get_size(&hash).await.unwrap(), 2);
        let read = backend.read(&hash, true).await.unwrap().into_bytes().await.unwrap();
        assert_eq!(read, b"v2");
    }

    pub async fn create_from_missing_source(backend: &dyn Backend) {
        let hash = random_hash();
        let missing = std::env::temp_dir().join(format!("missing-{}", Uuid::new_v4()));
        let result = backend.create(&hash, &missing).await;
        assert!(matches!(result, Err(StorageError::SourceUnreadable { .. })));
        assert!(!backend.head(&hash).await);
    }

    pub async fn chunked_upload(backend: &dyn Backend) {
        let hash = random_hash();
        assert!(backend.init_upload(&hash, 999, "notes.txt", "text/plain").await.unwrap());
        assert!(backend.add_chunk(&hash, b"hello ").await.unwrap());
        assert!(backend.add_chunk(&hash, b"world").await.unwrap());

        assert!(!backend.head(&hash).await);
        assert!(backend.read(&hash, true).await.unwrap_err().is_not_found());
        let partial = backend.read(&hash, false).await.unwrap().into_bytes().await.unwrap();
        assert_eq!(partial, b"hello world");

        assert!(backend.finalize_upload(&hash).await.unwrap());
        assert!(backend.head(&hash).await);
        assert_eq!(backend.get_size(&hash).await.unwrap(), 11);
        let read = backend.read(&hash, true).await.unwrap().into_bytes().await.unwrap();
        assert_eq!(read, b"hello world");
    }

    pub async fn chunks_without_session(backend: &dyn Backend) {
        let hash = random_hash();
        assert!(!backend.add_chunk(&hash, b"orphan").await.unwrap());
        assert!(!backend.finalize_upload(&hash).await.unwrap());
        assert!(!backend.head(&hash).await);
        assert!(backend.read(&hash, false).await.unwrap_err().is_not_found());
        assert!(backend.get_size(&hash).await.unwrap_err().is_not_found());
    }

    pub async fn chunks_after_confirm(backend: &dyn Backend) {
        let hash = random_hash();
        let source = source_file(b"final");
        backend.create(&hash, source.path()).await.unwrap();
        assert!(!backend.add_chunk(&hash, b"tamper").await.unwrap());
        assert!(!backend.finalize_upload(&hash).await.unwrap());
        let read = backend.read(&hash, true).await.unwrap().into_bytes().await.unwrap();
        assert_eq!(read, b"final");
    }

    pub async fn reinit_resets_upload(backend: &dyn Backend) {
        let hash = random_hash();
        let source = source_file(b"confirmed bytes");
        backend.create(&hash, source.path()).await.unwrap();

        assert!(backend.init_upload(&hash, 3, "again", "text/plain").await.unwrap());
        assert!(!backend.head(&hash).await);
        assert!(backend.add_chunk(&hash, b"new").await.unwrap());
        assert!(backend.finalize_upload(&hash).await.unwrap());
        let read = backend.read(&hash, true).await.unwrap().into_bytes().await.unwrap();
        assert_eq!(read, b"new");
    }

    pub async fn remove(backend: &dyn Backend) {
        let hash = random_hash();
        assert!(!backend.remove(&hash).await.unwrap());

        let source = source_file(b"gone soon");
        backend.create(&hash, source.path()).await.unwrap();
        assert!(backend.remove(&hash).await.unwrap());
        assert!(!backend.head(&hash).await);
        assert!(!backend.remove(&hash).await.unwrap());
    }

    pub async fn run_all(backend: &dyn Backend) {
        create_then_read(backend).await;
        create_overwrites(backend).await;
        create_from_missing_source(backend).await;
        chunked_upload(backend).await;
        chunks_without_session(backend).await;
        chunks_after_confirm(backend).await;
        reinit_resets_upload(backend).await;
        remove(backend).await;
        assert!(backend.health().await);
    }
}
