// HLS Segment Fetcher: downloads one segment into the task's working
// directory with a bounded number of retries.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::hls::HlsDownloaderError;
use crate::hls::config::HlsConfig;
use crate::hls::dedup::WorkDir;
use crate::hls::playlist::Segment;
use crate::transport::Transport;

#[derive(Debug)]
pub enum FetchOutcome {
    Downloaded { bytes: u64 },
    /// The task was cancelled before an attempt; nothing is reported for it.
    Cancelled,
    /// Every attempt failed and the partial file was removed.
    Exhausted {
        attempts: u32,
        last_error: HlsDownloaderError,
    },
}

pub struct SegmentFetcher {
    transport: Arc<dyn Transport>,
    config: Arc<HlsConfig>,
}

impl SegmentFetcher {
    pub fn new(transport: Arc<dyn Transport>, config: Arc<HlsConfig>) -> Self {
        Self { transport, config }
    }

    /// Downloads `segment` to `<dir>/segment_<i>.ts`.
    ///
    /// The destination is resolved again for every attempt since the
    /// directory may be relocated while the task runs.
    pub async fn fetch(
        &self,
        segment: &Segment,
        dir: &WorkDir,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        let file_name = segment.raw_file_name();
        let retries = self.config.fetcher_config.max_segment_retries;
        let delay = self.config.fetcher_config.segment_retry_delay;
        let mut attempts = 0;

        let last_error = loop {
            if cancel.is_cancelled() {
                debug!(index = segment.index, "Download cancelled");
                return FetchOutcome::Cancelled;
            }
            attempts += 1;

            let path = dir.join(&file_name);
            match self.transport.fetch_to_file(&segment.url, &path).await {
                Ok(bytes) => {
                    debug!(index = segment.index, bytes, "Segment downloaded");
                    return FetchOutcome::Downloaded { bytes };
                }
                Err(e) => {
                    if attempts > retries {
                        break e;
                    }
                    warn!(
                        index = segment.index,
                        attempt = attempts,
                        url = %segment.url,
                        error = %e,
                        "Segment download failed, retrying"
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        };

        let path = dir.join(&file_name);
        match tokio::fs::remove_file(&path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), error = %e, "Failed to remove partial segment");
            }
            _ => {}
        }
        error!(
            index = segment.index,
            attempts,
            url = %segment.url,
            error = %last_error,
            "Segment download failed"
        );
        FetchOutcome::Exhausted {
            attempts,
            last_error,
        }
    }
}
