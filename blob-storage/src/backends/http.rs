use std::collections::HashSet;
use std::fmt::{self, Display, Formatter};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::sleep;
use url::Url;
use crate::backend::{Backend, BackendPolicy};
use crate::error::{StorageError, StorageResult};
use crate::factory::{BackendFactory, Provisioned};
use crate::hash::ContentHash;
use crate::params::Parameters;
use crate::stream::BlobStream;
use crate::usage::StorageUsage;

pub const STORAGE_TYPE: &str = "http";
pub const DEFAULT_GET_URL: &str = "/public/file/";

const AUTH_HEADER: &str = "X-Auth-Token";
const UPLOAD_CHUNK_SIZE: usize = 8 * 1024 * 1024;
const DEFAULT_RETRIES: u64 = 2;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const INITIAL_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Serialize)]
struct InitUploadRequest<'a> {
    hash: &'a str,
    size: u64,
    name: &'a str,
    #[serde(rename = "type")]
    mime_type: &'a str,
}

/// Remote origin serving blobs over HTTP.
///
/// Reads go to `{base_url}{get_url}{hash}`. Uploads use the origin's file
/// API and need an auth key; without one the backend is read-only. The
/// origin has no notion of a pending upload visible to clients, so the
/// hashes with an open `init_upload` are tracked here.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: String,
    get_url: String,
    auth_key: Option<String>,
    client: reqwest::Client,
    retries: usize,
    policy: BackendPolicy,
    sessions: Arc<Mutex<HashSet<ContentHash>>>,
}

impl HttpBackend {
    pub fn new(base_url: &str, get_url: &str, auth_key: Option<String>, policy: BackendPolicy) -> Self {
        Self::with_client(reqwest::Client::default(), base_url, get_url, auth_key, policy)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: &str,
        get_url: &str,
        auth_key: Option<String>,
        policy: BackendPolicy,
    ) -> Self {
        let get_url = format!("/{}/", get_url.trim_matches('/')).replace("//", "/");
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            get_url,
            auth_key,
            client,
            retries: DEFAULT_RETRIES as usize,
            policy,
            sessions: Arc::default(),
        }
    }

    /// Extra attempts for idempotent requests. Uploads are sent once.
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    fn file_url(&self, hash: &ContentHash) -> String {
        format!("{}{}{}", self.base_url, self.get_url, hash)
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/api/file/{}", self.base_url, endpoint)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_key {
            Some(key) => request.header(AUTH_HEADER, key),
            None => request,
        }
    }

    async fn send_with_retries(&self, method: Method, url: &str) -> StorageResult<Response> {
        let mut retries = 0;
        let mut delay = INITIAL_BACKOFF;
        loop {
            let request = self.authorized(self.client.request(method.clone(), url));
            let failure = match request.send().await {
                Ok(response) if !response.status().is_server_error() || retries >= self.retries => {
                    return Ok(response)
                }
                Ok(response) => response.status().to_string(),
                Err(e) if retries >= self.retries => return Err(e.into()),
                Err(e) => e.to_string(),
            };
            retries += 1;
            tracing::warn!("{} {} failed (attempt {}/{}): {}. Retrying in {:?}",
                           method, url, retries, self.retries, failure, delay);
            sleep(delay).await;
            delay *= 2;
        }
    }

    async fn head_response(&self, hash: &ContentHash) -> StorageResult<Response> {
        let url = self.file_url(hash);
        let response = self.send_with_retries(Method::HEAD, &url).await?;
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(StorageError::NotFound(hash.clone())),
            status => Err(StorageError::Transport(format!("HEAD {url} returned {status}"))),
        }
    }
}

impl Display for HttpBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "http:{}", self.base_url)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn head(&self, hash: &ContentHash) -> bool {
        match self.head_response(hash).await {
            Ok(_) => true,
            Err(StorageError::NotFound(_)) => false,
            Err(e) => {
                tracing::warn!(backend = %self, %hash, error = %e, "head failed");
                false
            }
        }
    }

    async fn get_size(&self, hash: &ContentHash) -> StorageResult<u64> {
        let response = self.head_response(hash).await?;
        // A HEAD body is empty, so the length has to come from the header itself.
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .ok_or_else(|| StorageError::Transport(format!("no content length for {hash}")))
    }

    async fn read(&self, hash: &ContentHash, confirmed: bool) -> StorageResult<BlobStream> {
        // The origin only ever serves finalized blobs.
        if !confirmed {
            return Err(StorageError::NotFound(hash.clone()));
        }
        let url = self.file_url(hash);
        let response = self.send_with_retries(Method::GET, &url).await?;
        match response.status() {
            status if status.is_success() => {
                let size = response.content_length();
                let body = response
                    .bytes_stream()
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
                Ok(BlobStream::from_stream(body, size))
            }
            StatusCode::NOT_FOUND => Err(StorageError::NotFound(hash.clone())),
            status => Err(StorageError::Transport(format!("GET {url} returned {status}"))),
        }
    }

    async fn create(&self, hash: &ContentHash, source: &Path) -> StorageResult<bool> {
        if self.auth_key.is_none() {
            tracing::warn!(backend = %self, %hash, "no auth key, cannot upload");
            return Ok(false);
        }
        let data = tokio::fs::read(source)
            .await
            .map_err(|e| StorageError::source_unreadable(source, e))?;
        let name = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| hash.to_string());

        if !self.init_upload(hash, data.len() as u64, &name, "application/octet-stream").await? {
            return Ok(false);
        }
        for chunk in data.chunks(UPLOAD_CHUNK_SIZE) {
            if !self.add_chunk(hash, chunk).await? {
                return Ok(false);
            }
        }
        self.finalize_upload(hash).await
    }

    async fn init_upload(
        &self,
        hash: &ContentHash,
        size: u64,
        name: &str,
        mime_type: &str,
    ) -> StorageResult<bool> {
        let url = self.api_url("init-upload");
        let body = InitUploadRequest { hash: hash.as_str(), size, name, mime_type };
        let response = self.authorized(self.client.post(&url)).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Transport(format!("POST {url} returned {status}")));
        }
        self.sessions.lock().await.insert(hash.clone());
        Ok(true)
    }

    async fn add_chunk(&self, hash: &ContentHash, chunk: &[u8]) -> StorageResult<bool> {
        let url = self.api_url(&format!("upload-chunk/{hash}"));
        let response = self
            .authorized(self.client.post(&url))
            .body(chunk.to_vec())
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(StorageError::Transport(format!("POST {url} returned {status}"))),
        }
    }

    /// The origin confirms a blob itself once the last chunk lands, so this
    /// only closes the local session and checks the blob is there.
    async fn finalize_upload(&self, hash: &ContentHash) -> StorageResult<bool> {
        if !self.sessions.lock().await.remove(hash) {
            return Ok(false);
        }
        Ok(self.head(hash).await)
    }

    async fn remove(&self, hash: &ContentHash) -> StorageResult<bool> {
        tracing::debug!(backend = %self, %hash, "remote origin does not support removal");
        Ok(false)
    }

    async fn health(&self) -> bool {
        let url = format!("{}/status.json", self.base_url);
        let response = match self.send_with_retries(Method::GET, &url).await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::warn!(backend = %self, status = %response.status(), "health check failed");
                return false;
            }
            Err(e) => {
                tracing::warn!(backend = %self, error = %e, "health check failed");
                return false;
            }
        };
        // Without a readable status document the origin's state is unknown.
        match response.json::<serde_json::Value>().await {
            Ok(status) => status.get("status").and_then(|s| s.as_str()) != Some("red"),
            Err(e) => {
                tracing::warn!(backend = %self, error = %e, "malformed status document");
                false
            }
        }
    }

    fn is_read_only(&self) -> bool {
        self.policy.read_only || self.auth_key.is_none()
    }

    fn should_skip(&self, usage: StorageUsage) -> bool {
        self.policy.should_skip(usage)
    }
}

pub struct HttpFactory;

impl HttpFactory {
    pub const BASE_URL: &'static str = "base-url";
    pub const GET_URL: &'static str = "get-url";
    pub const AUTH_KEY: &'static str = "auth-key";
    pub const RETRIES: &'static str = "retries";
    pub const TIMEOUT: &'static str = "timeout";
}

impl BackendFactory for HttpFactory {
    fn storage_type(&self) -> &'static str {
        STORAGE_TYPE
    }

    fn create_backend(&self, parameters: &Parameters) -> StorageResult<Provisioned> {
        parameters.reject_unknown(&[Self::BASE_URL, Self::GET_URL, Self::AUTH_KEY, Self::RETRIES, Self::TIMEOUT])?;
        let policy = parameters.policy()?;
        let get_url = parameters.string(Self::GET_URL)?.unwrap_or_else(|| DEFAULT_GET_URL.to_string());
        let auth_key = parameters.string(Self::AUTH_KEY)?;
        let retries = parameters.integer(Self::RETRIES)?.unwrap_or(DEFAULT_RETRIES);
        let timeout = parameters.integer(Self::TIMEOUT)?.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout == 0 {
            return Err(StorageError::Configuration(format!("{} must be at least 1 second", Self::TIMEOUT)));
        }

        let base_url = match parameters.string(Self::BASE_URL)? {
            Some(base_url) if !base_url.is_empty() => base_url,
            _ => return Ok(Provisioned::NotConfigured("no base url".into())),
        };
        let parsed = Url::parse(&base_url)
            .map_err(|e| StorageError::Configuration(format!("invalid base url {base_url:?}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(StorageError::Configuration(format!("base url {base_url:?} is not http(s)")));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .map_err(|e| StorageError::Configuration(format!("cannot build http client: {e}")))?;
        let backend = HttpBackend::with_client(client, &base_url, &get_url, auth_key, policy)
            .with_retries(retries as usize);
        Ok(Provisioned::ready(backend))
    }
}
