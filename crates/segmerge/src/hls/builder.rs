//! Fluent builder for [`HlsConfig`].

use std::path::PathBuf;
use std::time::Duration;

use crate::DownloaderConfig;
use crate::hls::config::{HlsConfig, OutputFormat};

pub struct HlsConfigBuilder {
    config: HlsConfig,
}

impl HlsConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: HlsConfig::default(),
        }
    }

    pub fn with_base_config(mut self, base_config: DownloaderConfig) -> Self {
        self.config.base = base_config;
        self
    }

    // --- Pool ---

    pub fn download_workers(mut self, workers: usize) -> Self {
        self.config.pool_config.download_workers = workers.max(1);
        self
    }

    pub fn decrypt_workers(mut self, workers: usize) -> Self {
        self.config.pool_config.decrypt_workers = workers.max(1);
        self
    }

    // --- Retries ---

    pub fn segment_retry_count(mut self, retries: u32) -> Self {
        self.config.fetcher_config.max_segment_retries = retries;
        self
    }

    pub fn segment_retry_delay(mut self, delay: Duration) -> Self {
        self.config.fetcher_config.segment_retry_delay = delay;
        self
    }

    pub fn key_retry_count(mut self, retries: u32) -> Self {
        self.config.fetcher_config.max_key_retries = retries;
        self
    }

    pub fn key_retry_delay(mut self, delay: Duration) -> Self {
        self.config.fetcher_config.key_retry_delay = delay;
        self
    }

    pub fn playlist_retry_count(mut self, retries: u32) -> Self {
        self.config.fetcher_config.max_playlist_retries = retries;
        self
    }

    pub fn playlist_retry_delay(mut self, delay: Duration) -> Self {
        self.config.fetcher_config.playlist_retry_delay = delay;
        self
    }

    pub fn decrypt_retry_count(mut self, retries: u32) -> Self {
        self.config.decryption_config.max_decrypt_retries = retries;
        self
    }

    // --- Output ---

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.merge_config.output_format = format;
        self
    }

    pub fn remux_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.config.merge_config.remux_program = program.into();
        self
    }

    pub fn cleanup_intermediates(mut self, cleanup: bool) -> Self {
        self.config.merge_config.cleanup_intermediates = cleanup;
        self
    }

    pub fn merge_chunk_size(mut self, size: usize) -> Self {
        self.config.merge_config.chunk_size = size.max(1);
        self
    }

    pub fn progress_batch_size(mut self, batch: usize) -> Self {
        self.config.progress_config.batch_size = batch.max(1);
        self
    }

    pub fn build(self) -> HlsConfig {
        self.config
    }
}

impl Default for HlsConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
