//! Durable blob storage for report artifacts.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMetadata {
    /// Object key, e.g. `campaign-reports/<id>.csv`.
    pub key: String,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedBlob {
    pub url: String,
}

#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn upload(&self, path: &Path, metadata: &BlobMetadata) -> Result<UploadedBlob>;
}

/// Blob storage reached with a plain HTTP `PUT {base}/{key}`.
pub struct HttpBlobStorage {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpBlobStorage {
    pub fn new(client: Client, base_url: String, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }
}

#[async_trait]
impl BlobStorage for HttpBlobStorage {
    async fn upload(&self, path: &Path, metadata: &BlobMetadata) -> Result<UploadedBlob> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let url = self.object_url(&metadata.key);

        self.client
            .put(&url)
            .timeout(self.timeout)
            .header(CONTENT_TYPE, metadata.content_type.as_str())
            .body(bytes)
            .send()
            .await
            .context("Blob upload request failed")?
            .error_for_status()
            .context("Blob storage rejected upload")?;

        info!(key = %metadata.key, url = %url, "blob_uploaded");

        Ok(UploadedBlob { url })
    }
}
