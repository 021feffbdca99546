//! # Segmerge
//!
//! Downloads encrypted HLS media and reassembles it into a single file.
//!
//! ## Features
//!
//! - Bounded concurrent segment downloads with retry
//! - Duplicate detection across concurrently running playlists
//! - Streaming AES-128-CBC segment decryption
//! - Ordered merge with optional remux through ffmpeg
//! - Fallback playlist URLs and throttled progress reporting

pub mod builder;
pub mod client;
pub mod config;
pub mod error;
pub mod hls;
pub mod process;
pub mod proxy;
pub mod transport;

pub use builder::DownloaderConfigBuilder;
pub use client::create_client;
pub use config::DownloaderConfig;
pub use error::DownloadError;
pub use transport::{HttpTransport, Transport};

// Re-export the HLS entry points
pub use hls::{
    BatchProgressCallback, DownloadRequest, HlsConfig, HlsDownloader, HlsDownloaderError,
    OutputFormat, ProgressCallback, TaskOutcome,
};

// Re-export proxy utilities
pub use proxy::{ProxyAuth, ProxyConfig, ProxyType};
