// HLS Downloader: entry point turning download requests into playlist tasks.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::create_client;
use crate::error::DownloadError;
use crate::hls::HlsDownloaderError;
use crate::hls::config::HlsConfig;
use crate::hls::dedup::DedupRegistry;
use crate::hls::merger::{FfmpegRemuxer, Merger, Remuxer};
use crate::hls::progress::{ProgressAggregator, ProgressCallback};
use crate::hls::task::{PlaylistTask, TaskContext, TaskOutcome};
use crate::transport::{HttpTransport, Transport};

pub const DEFAULT_TITLE: &str = "video";

/// Progress for request `i` of a batch: `(i, percent)`.
pub type BatchProgressCallback = Arc<dyn Fn(usize, u8) + Send + Sync>;

/// One asset to fetch: candidate playlist URLs tried in order, an optional
/// title and the directory the `<title>/` folder is created in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub urls: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl DownloadRequest {
    pub fn new(urls: Vec<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            urls,
            title: None,
            output_dir: output_dir.into(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Turns a title into a directory and file name. Blank titles become
/// [`DEFAULT_TITLE`].
pub fn sanitize_title(title: Option<&str>) -> String {
    let cleaned: String = title
        .unwrap_or_default()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_end_matches('.').trim();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        DEFAULT_TITLE.to_string()
    } else {
        cleaned.to_string()
    }
}

pub struct HlsDownloader {
    config: Arc<HlsConfig>,
    transport: Arc<dyn Transport>,
    merger: Arc<Merger>,
    cancel: CancellationToken,
}

impl HlsDownloader {
    /// Downloader over HTTP, remuxing with the configured program.
    pub fn new(config: HlsConfig) -> Result<Self, DownloadError> {
        let client = create_client(&config.base)?;
        Ok(Self::with_transport(config, Arc::new(HttpTransport::new(client))))
    }

    pub fn with_transport(config: HlsConfig, transport: Arc<dyn Transport>) -> Self {
        let remuxer = Arc::new(FfmpegRemuxer::new(
            config.merge_config.remux_program.clone(),
        ));
        let merger = Arc::new(Merger::new(config.merge_config.clone(), remuxer));
        Self {
            config: Arc::new(config),
            transport,
            merger,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_remuxer(mut self, remuxer: Arc<dyn Remuxer>) -> Self {
        self.merger = Arc::new(Merger::new(self.config.merge_config.clone(), remuxer));
        self
    }

    pub fn config(&self) -> &HlsConfig {
        &self.config
    }

    /// Cancelling this token stops every running task at its next check point.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn download(
        &self,
        request: DownloadRequest,
        progress: Option<ProgressCallback>,
    ) -> Result<TaskOutcome, HlsDownloaderError> {
        let registry = Arc::new(DedupRegistry::new());
        self.run_request(&registry, request, progress).await
    }

    /// Runs every request concurrently against one fresh duplicate registry.
    /// Results come back in request order.
    pub async fn download_batch(
        &self,
        requests: Vec<DownloadRequest>,
        progress: Option<BatchProgressCallback>,
    ) -> Vec<Result<TaskOutcome, HlsDownloaderError>> {
        let registry = Arc::new(DedupRegistry::new());
        info!(requests = requests.len(), "Starting batch");

        let runs = requests.into_iter().enumerate().map(|(i, request)| {
            let callback = progress.clone().map(|batch| {
                let callback: ProgressCallback = Arc::new(move |percent| batch(i, percent));
                callback
            });
            let registry = Arc::clone(&registry);
            async move { self.run_request(&registry, request, callback).await }
        });
        join_all(runs).await
    }

    async fn run_request(
        &self,
        registry: &Arc<DedupRegistry>,
        request: DownloadRequest,
        callback: Option<ProgressCallback>,
    ) -> Result<TaskOutcome, HlsDownloaderError> {
        if request.urls.is_empty() {
            return Err(HlsDownloaderError::PlaylistError(
                "No playlist URL given".to_string(),
            ));
        }

        let title = sanitize_title(request.title.as_deref());
        let dir = registry.reserve_dir(&request.output_dir, &title);
        let context = Arc::new(TaskContext {
            config: Arc::clone(&self.config),
            transport: Arc::clone(&self.transport),
            registry: Arc::clone(registry),
            merger: Arc::clone(&self.merger),
        });
        let progress = Arc::new(ProgressAggregator::new(
            callback,
            self.config.progress_config.batch_size,
        ));

        let mut last_error = None;
        for (attempt, url) in request.urls.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(HlsDownloaderError::Cancelled);
            }
            if attempt > 0 {
                progress.reset();
                info!(url, attempt = attempt + 1, "Trying fallback playlist");
            }

            let task = Arc::new(PlaylistTask::new(
                url.as_str(),
                dir.clone(),
                Arc::clone(&context),
                Arc::clone(&progress),
                self.cancel.child_token(),
            ));
            match task.run().await {
                Ok(outcome) => return Ok(outcome),
                Err(HlsDownloaderError::Cancelled) if self.cancel.is_cancelled() => {
                    return Err(HlsDownloaderError::Cancelled);
                }
                Err(e) => {
                    warn!(url, error = %e, "Playlist task failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            HlsDownloaderError::InternalError("No playlist task was run".to_string())
        }))
    }
}
