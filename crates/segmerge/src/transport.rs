//! HTTP seam used by every component that touches the network.
//!
//! Segment bodies are streamed straight to disk so a single segment never
//! has to fit in memory.

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::trace;

use crate::hls::HlsDownloaderError;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch a small resource (manifest, key) fully into memory.
    async fn fetch_bytes(&self, url: &str) -> Result<Bytes, HlsDownloaderError>;

    /// Stream a resource into `path`, truncating any previous content.
    /// The parent directory must already exist.
    async fn fetch_to_file(&self, url: &str, path: &Path) -> Result<u64, HlsDownloaderError>;
}

pub struct HttpTransport {
    http_client: Client,
}

impl HttpTransport {
    pub fn new(http_client: Client) -> Self {
        Self { http_client }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, HlsDownloaderError> {
        let response = self.http_client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(HlsDownloaderError::StatusError {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch_bytes(&self, url: &str) -> Result<Bytes, HlsDownloaderError> {
        let response = self.get(url).await?;
        Ok(response.bytes().await?)
    }

    async fn fetch_to_file(&self, url: &str, path: &Path) -> Result<u64, HlsDownloaderError> {
        let response = self.get(url).await?;
        let mut file = tokio::fs::File::create(path).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        trace!(url, bytes = written, "Body written to {}", path.display());
        Ok(written)
    }
}
