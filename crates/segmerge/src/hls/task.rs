// HLS Playlist Task: runs one playlist URL through parse, key resolution,
// download (with duplicate detection), decryption, merge and cleanup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::hls::HlsDownloaderError;
use crate::hls::config::HlsConfig;
use crate::hls::decryption::{KeyResolver, SegmentDecryptor};
use crate::hls::dedup::{
    Arbitration, Claim, DedupRegistry, FINGERPRINT_SEGMENTS, FingerprintSlots, Settlement,
    WorkDir, digest_file,
};
use crate::hls::fetcher::{FetchOutcome, SegmentFetcher};
use crate::hls::merger::Merger;
use crate::hls::playlist::{
    Playlist, PlaylistLoader, Segment, SegmentState, decrypted_file_name, raw_file_name,
};
use crate::hls::pool::WorkerPool;
use crate::hls::progress::{
    DECRYPT_END, DOWNLOAD_END, PARSED, PhaseProgress, ProgressAggregator, REMUXING,
};
use crate::transport::Transport;

/// How a task that did not fail ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// This task merged the media file at this path.
    Produced(PathBuf),
    /// Another task already holds the same content under an equal or longer
    /// name; this task's directory was removed.
    Removed { owner: PathBuf },
    /// The same content was already downloaded elsewhere and has been moved
    /// under this task's name.
    Promoted(PathBuf),
}

impl TaskOutcome {
    pub fn path(&self) -> &Path {
        match self {
            TaskOutcome::Produced(path) | TaskOutcome::Promoted(path) => path,
            TaskOutcome::Removed { owner } => owner,
        }
    }

    pub fn is_removed(&self) -> bool {
        matches!(self, TaskOutcome::Removed { .. })
    }
}

/// Collaborators shared by every task of a downloader.
pub struct TaskContext {
    pub config: Arc<HlsConfig>,
    pub transport: Arc<dyn Transport>,
    pub registry: Arc<DedupRegistry>,
    pub merger: Arc<Merger>,
}

enum Resolution {
    Owner {
        fingerprint: String,
        claim: Arc<Claim>,
    },
    Yield {
        owner: PathBuf,
        claim: Arc<Claim>,
    },
    Promote(Arc<Claim>),
}

pub struct PlaylistTask {
    url: String,
    dir: WorkDir,
    /// Set once this task must stop: duplicate resolved or caller cancelled.
    cancel: CancellationToken,
    slots: FingerprintSlots,
    resolution: Mutex<Option<Resolution>>,
    states: Mutex<Vec<SegmentState>>,
    context: Arc<TaskContext>,
    progress: Arc<ProgressAggregator>,
}

impl PlaylistTask {
    pub fn new(
        url: impl Into<String>,
        dir: impl Into<PathBuf>,
        context: Arc<TaskContext>,
        progress: Arc<ProgressAggregator>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            url: url.into(),
            dir: WorkDir::new(dir),
            cancel,
            slots: FingerprintSlots::new(),
            resolution: Mutex::new(None),
            states: Mutex::new(Vec::new()),
            context,
            progress,
        }
    }

    /// Per-segment progress, indexed like the playlist. Empty until the
    /// playlist has been parsed.
    pub fn segment_states(&self) -> Vec<SegmentState> {
        self.states.lock().clone()
    }

    fn set_state(&self, index: usize, state: SegmentState) {
        if let Some(slot) = self.states.lock().get_mut(index) {
            *slot = state;
        }
    }

    pub async fn run(self: Arc<Self>) -> Result<TaskOutcome, HlsDownloaderError> {
        let config = Arc::clone(&self.context.config);
        let transport = Arc::clone(&self.context.transport);

        let playlist = PlaylistLoader::new(Arc::clone(&transport), Arc::clone(&config))
            .load(&self.url)
            .await?;
        *self.states.lock() = vec![SegmentState::Pending; playlist.len()];
        self.progress.report(PARSED);
        info!(url = %self.url, segments = playlist.len(), encrypted = playlist.encryption.is_some(), "Playlist parsed");

        // Fetched before any segment so the decrypt phase never waits on it.
        let key = match &playlist.encryption {
            Some(descriptor) => Some(
                KeyResolver::new(Arc::clone(&transport), Arc::clone(&config))
                    .resolve(descriptor)
                    .await?,
            ),
            None => None,
        };

        tokio::fs::create_dir_all(self.dir.path()).await?;

        let download_result = Arc::clone(&self).download_all(&playlist).await;

        if let Some(outcome) = self.resolve_duplicate(&playlist).await? {
            self.progress.finish();
            return Ok(outcome);
        }
        if let Err(e) = download_result {
            self.release_claim();
            return Err(e);
        }

        // Duplicates wait for this task to conclude before moving anything.
        let dir = self.dir.path();

        let result = async {
            let decryptor = match (key, &playlist.encryption) {
                (Some(key), Some(descriptor)) => SegmentDecryptor::new(
                    key,
                    descriptor.iv,
                    config.decryption_config.read_chunk_size,
                ),
                _ => SegmentDecryptor::passthrough(),
            };
            Arc::clone(&self)
                .decrypt_all(&dir, playlist.len(), decryptor)
                .await?;
            self.progress.report(DECRYPT_END);

            let merger = &self.context.merger;
            let title = self.dir.name();
            let progress = Arc::clone(&self.progress);
            let output = merger
                .merge(&dir, &title, playlist.len(), move || {
                    progress.report(REMUXING)
                })
                .await?;

            if config.merge_config.cleanup_intermediates {
                merger.cleanup(&dir, playlist.len()).await?;
            }
            Ok::<_, HlsDownloaderError>(output)
        }
        .await;

        match result {
            Ok(output) => {
                if let Some(claim) = self.owned_claim() {
                    self.context.registry.complete(&claim);
                }
                info!(url = %self.url, output = %output.display(), "Playlist finished");
                self.progress.finish();
                Ok(TaskOutcome::Produced(output))
            }
            Err(e) => {
                error!(url = %self.url, error = %e, "Playlist failed");
                self.release_claim();
                Err(e)
            }
        }
    }

    /// Download phase. Returns once every segment worker has finished.
    async fn download_all(self: Arc<Self>, playlist: &Playlist) -> Result<(), HlsDownloaderError> {
        let config = &self.context.config;
        let pool = WorkerPool::new("download", config.pool_config.download_workers);
        let fetcher = Arc::new(SegmentFetcher::new(
            Arc::clone(&self.context.transport),
            Arc::clone(config),
        ));
        let phase = Arc::new(self.progress.phase(PARSED, DOWNLOAD_END, playlist.len()));

        info!(url = %self.url, segments = playlist.len(), workers = pool.size(), "Downloading segments");
        let handles: Vec<_> = playlist
            .segments
            .iter()
            .cloned()
            .map(|segment| {
                let task = Arc::clone(&self);
                let fetcher = Arc::clone(&fetcher);
                let phase = Arc::clone(&phase);
                pool.submit(async move { task.download_one(segment, &fetcher, &phase).await })
            })
            .collect();

        let mut failure = None;
        for (index, result) in WorkerPool::join_all(handles).await.into_iter().enumerate() {
            if let FetchOutcome::Exhausted {
                attempts,
                last_error,
            } = result?
            {
                failure.get_or_insert((index, attempts, last_error));
            }
        }

        if self.cancel.is_cancelled() {
            return Err(HlsDownloaderError::Cancelled);
        }
        match failure {
            Some((index, attempts, last_error)) => {
                warn!(url = %self.url, index, error = %last_error, "Download phase failed");
                Err(HlsDownloaderError::SegmentExhausted { index, attempts })
            }
            None => {
                info!(url = %self.url, "All segments downloaded");
                Ok(())
            }
        }
    }

    async fn download_one(
        &self,
        segment: Segment,
        fetcher: &SegmentFetcher,
        phase: &PhaseProgress,
    ) -> FetchOutcome {
        let outcome = fetcher.fetch(&segment, &self.dir, &self.cancel).await;
        match &outcome {
            FetchOutcome::Downloaded { .. } => {
                self.set_state(segment.index, SegmentState::Downloaded);
                phase.complete_one();
                if segment.index < FINGERPRINT_SEGMENTS {
                    self.record_digest(&segment).await;
                }
            }
            FetchOutcome::Exhausted { .. } => {
                self.set_state(segment.index, SegmentState::DownloadFailed)
            }
            FetchOutcome::Cancelled => {}
        }
        outcome
    }

    async fn record_digest(&self, segment: &Segment) {
        let path = self.dir.join(&segment.raw_file_name());
        let digest = match digest_file(&path).await {
            Ok(digest) => digest,
            Err(e) => {
                warn!(index = segment.index, error = %e, "Could not digest segment, duplicate detection disabled");
                return;
            }
        };
        let Some(fingerprint) = self.slots.record(segment.index, digest) else {
            return;
        };
        if self.cancel.is_cancelled() {
            return;
        }

        debug!(url = %self.url, fingerprint, "Content fingerprint computed");
        let resolution = match self.context.registry.arbitrate(&fingerprint, &self.dir) {
            Arbitration::Owner(claim) => Resolution::Owner { fingerprint, claim },
            Arbitration::Yield { owner, claim } => {
                self.cancel.cancel();
                Resolution::Yield { owner, claim }
            }
            Arbitration::Promote(claim) => {
                self.cancel.cancel();
                Resolution::Promote(claim)
            }
        };
        *self.resolution.lock() = Some(resolution);
    }

    /// Removes this task's directory when it lost or handed over its name,
    /// then waits for the owner of the content to produce its output.
    async fn resolve_duplicate(
        &self,
        playlist: &Playlist,
    ) -> Result<Option<TaskOutcome>, HlsDownloaderError> {
        enum Ending {
            Yield(PathBuf, Arc<Claim>),
            Promote(Arc<Claim>),
        }
        let ending = match &*self.resolution.lock() {
            Some(Resolution::Yield { owner, claim }) => {
                Ending::Yield(owner.clone(), Arc::clone(claim))
            }
            Some(Resolution::Promote(claim)) => Ending::Promote(Arc::clone(claim)),
            _ => return Ok(None),
        };

        let dir = self.dir.path();
        tokio::fs::remove_dir_all(&dir).await?;
        *self.states.lock() = vec![SegmentState::Removed; playlist.len()];

        let registry = &self.context.registry;
        match ending {
            Ending::Yield(owner, claim) => {
                info!(url = %self.url, dir = %dir.display(), owner = %owner.display(), "Duplicate removed");
                registry.await_owner(&claim).await?;
                Ok(Some(TaskOutcome::Removed { owner }))
            }
            Ending::Promote(claim) => {
                let extension = self.context.merger.output_format().extension();
                match registry.settle(&claim, &dir, extension).await? {
                    Settlement::Moved(media) => {
                        info!(url = %self.url, output = %media.display(), "Duplicate promoted");
                        Ok(Some(TaskOutcome::Promoted(media)))
                    }
                    Settlement::Superseded(owner) => {
                        info!(url = %self.url, owner = %owner.display(), "Promotion taken over by a longer name");
                        Ok(Some(TaskOutcome::Removed { owner }))
                    }
                }
            }
        }
    }

    async fn decrypt_all(
        self: Arc<Self>,
        dir: &Path,
        count: usize,
        decryptor: SegmentDecryptor,
    ) -> Result<(), HlsDownloaderError> {
        let config = &self.context.config;
        let pool = WorkerPool::new("decrypt", config.pool_config.decrypt_workers);
        let phase = Arc::new(self.progress.phase(DOWNLOAD_END, DECRYPT_END, count));
        let retries = config.decryption_config.max_decrypt_retries;

        info!(url = %self.url, segments = count, workers = pool.size(), passthrough = decryptor.is_passthrough(), "Decrypting segments");
        let handles: Vec<_> = (0..count)
            .map(|index| {
                let task = Arc::clone(&self);
                let decryptor = decryptor.clone();
                let phase = Arc::clone(&phase);
                let input = dir.join(raw_file_name(index));
                let output = dir.join(decrypted_file_name(index));
                pool.submit_blocking(move || {
                    let result =
                        decryptor.decrypt_with_retry(index, &input, &output, retries, &task.cancel);
                    match &result {
                        Ok(_) => {
                            task.set_state(index, SegmentState::Decrypted);
                            phase.complete_one();
                        }
                        Err(_) => task.set_state(index, SegmentState::DecryptFailed),
                    }
                    result
                })
            })
            .collect();

        let mut first_error = None;
        for result in WorkerPool::join_all_blocking(handles).await {
            if let Err(e) = result? {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn owned_claim(&self) -> Option<Arc<Claim>> {
        match &*self.resolution.lock() {
            Some(Resolution::Owner { claim, .. }) => Some(Arc::clone(claim)),
            _ => None,
        }
    }

    fn release_claim(&self) {
        if let Some(Resolution::Owner { fingerprint, claim }) = &*self.resolution.lock() {
            self.context.registry.release(fingerprint, claim);
        }
    }
}

impl Drop for PlaylistTask {
    /// An owner that never concluded (for example a dropped run) must not
    /// leave its duplicates waiting.
    fn drop(&mut self) {
        self.release_claim();
    }
}
