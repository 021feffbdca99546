// HLS pipeline: playlist parsing, segment download with duplicate
// detection, AES-128 decryption and ordered merging.

pub mod builder;
pub mod config;
pub mod decryption;
pub mod dedup;
pub mod error;
pub mod fetcher;
pub mod hls_downloader;
pub mod merger;
pub mod playlist;
pub mod pool;
pub mod progress;
pub mod task;

// Re-exports for easier access
pub use config::{HlsConfig, OutputFormat};
pub use dedup::DedupRegistry;
pub use error::HlsDownloaderError;
pub use hls_downloader::{BatchProgressCallback, DownloadRequest, HlsDownloader};
pub use merger::{FfmpegRemuxer, Remuxer};
pub use progress::ProgressCallback;
pub use task::{PlaylistTask, TaskOutcome};
