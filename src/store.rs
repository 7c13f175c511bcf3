//! Object-store seam: list keys under a prefix and fetch one object's bytes.
//! `LocalStore` serves a directory tree; `S3Store` talks to an S3 bucket through the AWS SDK.

use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::Client;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::runtime::Runtime;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("store returned HTTP {status} for {target}")]
    Http { status: u16, target: String },

    #[error("S3 request failed: {0}")]
    Sdk(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("unexpected listing response: {0}")]
    Listing(String),
}

pub trait ObjectStore: Send + Sync {
    /// All keys starting with `prefix`, sorted.
    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Full content of one object.
    fn fetch(&self, key: &str) -> Result<Vec<u8>, StoreError>;
}

// ----------------------------- Local directory ------------------------------------

/// A directory whose relative file paths (with `/` separators) are the keys.
#[derive(Clone, Debug)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ObjectStore for LocalStore {
    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        if !self.root.exists() {
            return Err(StoreError::NotFound(self.root.display().to_string()));
        }
        let mut keys = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1) {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.root) else { continue };
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn fetch(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.root.join(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound(key.to_string())),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

// ----------------------------- S3 ------------------------------------

/// Static access keys for the bucket.
#[derive(Clone, Debug)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

/// S3 access through the AWS SDK (ListObjectsV2 pagination + GetObject). The SDK
/// is async; calls are driven to completion on a private runtime so the store
/// can be used from the blocking fetch workers. SDK retries are off: the fetch
/// orchestrator owns the attempt budget.
pub struct S3Store {
    runtime: Runtime,
    client: Client,
    bucket: String,
}

impl S3Store {
    pub fn new(region: &str, bucket: &str, credentials: S3Credentials) -> Result<Self, StoreError> {
        Self::build(region, bucket, credentials, None)
    }

    /// Use a custom endpoint with path-style addressing, e.g. for S3-compatible stores.
    pub fn with_endpoint(
        endpoint: &str,
        region: &str,
        bucket: &str,
        credentials: S3Credentials,
    ) -> Result<Self, StoreError> {
        Self::build(region, bucket, credentials, Some(endpoint))
    }

    fn build(
        region: &str,
        bucket: &str,
        credentials: S3Credentials,
        endpoint: Option<&str>,
    ) -> Result<Self, StoreError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("s3-io")
            .enable_all()
            .build()?;
        let creds = Credentials::new(
            credentials.access_key_id,
            credentials.secret_access_key,
            credentials.session_token,
            None,
            "viewership-etl",
        );
        let mut cfg = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(creds)
            .retry_config(RetryConfig::disabled());
        if let Some(url) = endpoint {
            cfg = cfg.endpoint_url(url).force_path_style(true);
        }
        Ok(Self { runtime, client: Client::from_conf(cfg.build()), bucket: bucket.to_string() })
    }
}

/// Service errors carrying an HTTP response keep their status; anything else
/// (dispatch, timeout, construction) is reported with the SDK's full context.
fn sdk_error<E>(err: SdkError<E, HttpResponse>, target: &str) -> StoreError
where
    E: std::error::Error + 'static,
{
    match err.raw_response().map(|r| r.status().as_u16()) {
        Some(status) => StoreError::Http { status, target: target.to_string() },
        None => StoreError::Sdk(format!("{target}: {}", DisplayErrorContext(&err))),
    }
}

impl ObjectStore for S3Store {
    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let out = self
                .runtime
                .block_on(
                    self.client
                        .list_objects_v2()
                        .bucket(&self.bucket)
                        .prefix(prefix)
                        .set_continuation_token(token.take())
                        .send(),
                )
                .map_err(|e| sdk_error(e, &format!("list {prefix}")))?;

            keys.extend(out.contents().iter().filter_map(|o| o.key().map(str::to_string)));

            if out.is_truncated() != Some(true) {
                break;
            }
            match out.next_continuation_token() {
                Some(t) => token = Some(t.to_string()),
                None => return Err(StoreError::Listing("truncated listing without continuation token".into())),
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn fetch(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.runtime.block_on(async {
            let resp = match self.client.get_object().bucket(&self.bucket).key(key).send().await {
                Ok(r) => r,
                Err(e) if matches!(e.as_service_error(), Some(GetObjectError::NoSuchKey(_))) => {
                    return Err(StoreError::NotFound(key.to_string()));
                }
                Err(e) => return Err(sdk_error(e, key)),
            };
            let body = resp
                .body
                .collect()
                .await
                .map_err(|e| StoreError::Sdk(format!("read body of {key}: {e}")))?;
            Ok(body.into_bytes().to_vec())
        })
    }
}
