use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::io;
use std::path::Path;
use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::head_object::HeadObjectOutput;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use crate::backend::{Backend, BackendPolicy};
use crate::error::{StorageError, StorageResult};
use crate::factory::{BackendFactory, Provisioned};
use crate::hash::ContentHash;
use crate::params::Parameters;
use crate::stream::BlobStream;
use crate::usage::StorageUsage;

pub const STORAGE_TYPE: &str = "s3";

const UPLOADS_PREFIX: &str = "uploads/";
const NAME_METADATA: &str = "name";
const DEFAULT_REGION: &str = "us-east-1";

/// The `credentials` object of an S3 descriptor.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct S3Credentials {
    pub key: String,
    pub secret: String,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible stores such as MinIO.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub path_style: bool,
}

impl S3Credentials {
    pub fn from_object(object: &Map<String, Value>) -> StorageResult<Self> {
        serde_json::from_value(Value::Object(object.clone()))
            .map_err(|e| StorageError::Configuration(format!("invalid s3 credentials: {e}")))
    }

    pub fn client(&self) -> Client {
        let credentials = Credentials::new(
            self.key.clone(),
            self.secret.clone(),
            self.session_token.clone(),
            None,
            "blob-storage",
        );
        let region = self.region.clone().unwrap_or_else(|| DEFAULT_REGION.to_string());
        let mut config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(credentials)
            .force_path_style(self.path_style);
        if let Some(endpoint) = &self.endpoint {
            config = config.endpoint_url(endpoint);
        }
        Client::from_conf(config.build())
    }
}

fn is_not_found<E>(err: &SdkError<E>) -> bool {
    matches!(err, SdkError::ServiceError(e) if e.raw().status().as_u16() == 404)
}

fn transport<E>(operation: &str, key: &str, err: SdkError<E>) -> StorageError
where
    E: std::error::Error + 'static,
{
    StorageError::Transport(format!("{operation} {key}: {}", DisplayErrorContext(&err)))
}

/// Blobs as objects in one S3 bucket.
///
/// Confirmed blobs are stored under their hash, uploads in progress under
/// `uploads/{hash}`. S3 objects cannot be appended to, so every chunk
/// rewrites the pending object; finalizing copies it to the final key.
#[derive(Debug, Clone)]
pub struct S3Backend {
    client: Client,
    bucket: String,
    policy: BackendPolicy,
}

impl S3Backend {
    pub fn new(client: Client, bucket: impl Into<String>, policy: BackendPolicy) -> Self {
        Self { client, bucket: bucket.into(), policy }
    }

    fn object_key(hash: &ContentHash, confirmed: bool) -> String {
        if confirmed {
            hash.to_string()
        } else {
            format!("{UPLOADS_PREFIX}{hash}")
        }
    }

    async fn head_object(&self, key: &str) -> StorageResult<Option<HeadObjectOutput>> {
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(output) => Ok(Some(output)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(transport("head", key, e)),
        }
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| transport("delete", key, e))?;
        Ok(())
    }
}

impl Display for S3Backend {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "s3:{}", self.bucket)
    }
}

#[async_trait]
impl Backend for S3Backend {
    async fn head(&self, hash: &ContentHash) -> bool {
        match self.head_object(&Self::object_key(hash, true)).await {
            Ok(found) => found.is_some(),
            Err(e) => {
                tracing::warn!(backend = %self, %hash, error = %e, "head failed");
                false
            }
        }
    }

    async fn get_size(&self, hash: &ContentHash) -> StorageResult<u64> {
        let output = self
            .head_object(&Self::object_key(hash, true))
            .await?
            .ok_or_else(|| StorageError::NotFound(hash.clone()))?;
        output
            .content_length()
            .and_then(|len| u64::try_from(len).ok())
            .ok_or_else(|| StorageError::Transport(format!("no content length for {hash}")))
    }

    async fn read(&self, hash: &ContentHash, confirmed: bool) -> StorageResult<BlobStream> {
        let key = Self::object_key(hash, confirmed);
        let output = match self.client.get_object().bucket(&self.bucket).key(&key).send().await {
            Ok(output) => output,
            Err(e) if is_not_found(&e) => return Err(StorageError::NotFound(hash.clone())),
            Err(e) => return Err(transport("get", &key, e)),
        };
        let size = output.content_length().and_then(|len| u64::try_from(len).ok());
        let body = futures::stream::unfold(output.body, |mut body| async move {
            body.next()
                .await
                .map(|chunk| (chunk.map_err(|e| io::Error::new(io::ErrorKind::Other, e)), body))
        });
        Ok(BlobStream::from_stream(body, size))
    }

    async fn create(&self, hash: &ContentHash, source: &Path) -> StorageResult<bool> {
        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| StorageError::source_unreadable(source, io::Error::new(io::ErrorKind::Other, e)))?;
        let key = Self::object_key(hash, true);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .send()
            .await
            .map_err(|e| transport("put", &key, e))?;
        self.delete_object(&Self::object_key(hash, false)).await?;
        tracing::debug!(backend = %self, %hash, "blob created");
        Ok(true)
    }

    async fn init_upload(
        &self,
        hash: &ContentHash,
        size: u64,
        name: &str,
        mime_type: &str,
    ) -> StorageResult<bool> {
        let key = Self::object_key(hash, false);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(Vec::new()))
            .content_type(mime_type)
            .metadata(NAME_METADATA, name)
            .send()
            .await
            .map_err(|e| transport("put", &key, e))?;
        self.delete_object(&Self::object_key(hash, true)).await?;
        tracing::debug!(backend = %self, %hash, declared_size = size, "upload initialised");
        Ok(true)
    }

    async fn add_chunk(&self, hash: &ContentHash, chunk: &[u8]) -> StorageResult<bool> {
        let key = Self::object_key(hash, false);
        let pending = match self.client.get_object().bucket(&self.bucket).key(&key).send().await {
            Ok(output) => output,
            Err(e) if is_not_found(&e) => return Ok(false),
            Err(e) => return Err(transport("get", &key, e)),
        };
        let content_type = pending.content_type().map(str::to_string);
        let metadata: Option<HashMap<String, String>> = pending.metadata().cloned();
        let mut contents = pending
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Transport(format!("get {key}: {e}")))?
            .into_bytes()
            .to_vec();
        contents.extend_from_slice(chunk);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(contents))
            .set_content_type(content_type)
            .set_metadata(metadata)
            .send()
            .await
            .map_err(|e| transport("put", &key, e))?;
        Ok(true)
    }

    async fn finalize_upload(&self, hash: &ContentHash) -> StorageResult<bool> {
        let pending = Self::object_key(hash, false);
        if self.head_object(&pending).await?.is_none() {
            return Ok(false);
        }
        let key = Self::object_key(hash, true);
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(format!("{}/{}", self.bucket, pending))
            .key(&key)
            .send()
            .await
            .map_err(|e| transport("copy", &key, e))?;
        self.delete_object(&pending).await?;
        tracing::debug!(backend = %self, %hash, "upload finalized");
        Ok(true)
    }

    async fn remove(&self, hash: &ContentHash) -> StorageResult<bool> {
        let mut removed = false;
        for key in [Self::object_key(hash, true), Self::object_key(hash, false)] {
            if self.head_object(&key).await?.is_some() {
                self.delete_object(&key).await?;
                removed = true;
            }
        }
        Ok(removed)
    }

    async fn health(&self) -> bool {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(backend = %self, error = %DisplayErrorContext(&e), "health check failed");
                false
            }
        }
    }

    fn is_read_only(&self) -> bool {
        self.policy.read_only
    }

    fn should_skip(&self, usage: StorageUsage) -> bool {
        self.policy.should_skip(usage)
    }
}

pub struct S3Factory;

impl S3Factory {
    pub const CREDENTIALS: &'static str = "credentials";
    pub const BUCKET: &'static str = "bucket";
}

impl BackendFactory for S3Factory {
    fn storage_type(&self) -> &'static str {
        STORAGE_TYPE
    }

    fn create_backend(&self, parameters: &Parameters) -> StorageResult<Provisioned> {
        parameters.reject_unknown(&[Self::CREDENTIALS, Self::BUCKET])?;
        let policy = parameters.policy()?;
        let credentials = parameters.object(Self::CREDENTIALS)?;
        let bucket = parameters.string(Self::BUCKET)?.filter(|bucket| !bucket.is_empty());
        let (Some(credentials), Some(bucket)) = (credentials, bucket) else {
            return Ok(Provisioned::NotConfigured("s3 needs credentials and a bucket".into()));
        };
        let credentials = S3Credentials::from_object(credentials)?;
        Ok(Provisioned::ready(S3Backend::new(credentials.client(), bucket, policy)))
    }
}
