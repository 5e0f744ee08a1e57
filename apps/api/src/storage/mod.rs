//! Artifact storage (checkpoint screenshots) and résumé fetch, both on S3.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use tempfile::TempPath;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::automation::models::ArtifactRef;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("S3 error: {0}")]
    S3(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Local file error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ArtifactStorage: Send + Sync {
    /// Stores a PNG checkpoint under `prefix` and returns its reference.
    async fn put(&self, prefix: &str, bytes: Vec<u8>) -> Result<ArtifactRef, StorageError>;

    /// Time-limited URL a client can open the artifact with.
    async fn url_for(&self, artifact: &ArtifactRef) -> Result<String, StorageError>;
}

#[async_trait]
pub trait ResumeFetcher: Send + Sync {
    /// Downloads a stored résumé to a local temporary file. The file is
    /// removed when the returned `TempPath` is dropped.
    async fn fetch(&self, resume_ref: &str) -> Result<TempPath, StorageError>;
}

// ────────────────────────────────────────────────────────────────────────────
// S3
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct S3Storage {
    client: aws_sdk_s3::Client,
    bucket: String,
    url_ttl: Duration,
}

impl S3Storage {
    pub fn new(client: aws_sdk_s3::Client, bucket: String, url_ttl: Duration) -> Self {
        Self {
            client,
            bucket,
            url_ttl,
        }
    }
}

#[async_trait]
impl ArtifactStorage for S3Storage {
    async fn put(&self, prefix: &str, bytes: Vec<u8>) -> Result<ArtifactRef, StorageError> {
        let key = format!("checkpoints/{}/{}.png", prefix, Uuid::new_v4());
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes))
            .content_type("image/png")
            .send()
            .await
            .map_err(|e| StorageError::S3(format!("upload failed: {e}")))?;

        debug!("Uploaded checkpoint to s3://{}/{}", self.bucket, key);
        Ok(ArtifactRef(key))
    }

    async fn url_for(&self, artifact: &ArtifactRef) -> Result<String, StorageError> {
        let presigning = PresigningConfig::expires_in(self.url_ttl)
            .map_err(|e| StorageError::S3(format!("invalid presign ttl: {e}")))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&artifact.0)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::S3(format!("presign failed: {e}")))?;
        Ok(request.uri().to_string())
    }
}

#[async_trait]
impl ResumeFetcher for S3Storage {
    async fn fetch(&self, resume_ref: &str) -> Result<TempPath, StorageError> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(resume_ref)
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(service) if service.is_no_such_key() => StorageError::NotFound(resume_ref.to_string()),
                _ => StorageError::S3(format!("download failed: {e}")),
            })?;

        let bytes = object
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(format!("download interrupted: {e}")))?
            .into_bytes();

        let path = write_temp(resume_ref, &bytes).await?;
        info!("Fetched résumé {} ({} bytes)", resume_ref, bytes.len());
        Ok(path)
    }
}

/// Writes bytes to a temp file keeping the original extension, so upload
/// controls that filter by type still accept it.
pub async fn write_temp(name: &str, bytes: &[u8]) -> Result<TempPath, StorageError> {
    let suffix = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    let path = tempfile::Builder::new()
        .prefix("resume-")
        .suffix(&suffix)
        .tempfile()?
        .into_temp_path();
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory (tests)
// ────────────────────────────────────────────────────────────────────────────
