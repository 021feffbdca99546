use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::DownloaderConfig;

fn logical_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

// --- Top-Level Configuration ---
#[derive(Debug, Clone, Default)]
pub struct HlsConfig {
    /// Base downloader configuration
    pub base: DownloaderConfig,
    pub pool_config: HlsPoolConfig,
    pub fetcher_config: HlsFetcherConfig,
    pub decryption_config: HlsDecryptionConfig,
    pub merge_config: HlsMergeConfig,
    pub progress_config: HlsProgressConfig,
}

impl HlsConfig {
    pub fn builder() -> crate::hls::builder::HlsConfigBuilder {
        crate::hls::builder::HlsConfigBuilder::new()
    }
}

// --- Worker Pool Configuration ---
#[derive(Debug, Clone)]
pub struct HlsPoolConfig {
    /// Workers for the network-bound download phase
    pub download_workers: usize,
    /// Workers for the CPU-bound decrypt phase
    pub decrypt_workers: usize,
}

impl Default for HlsPoolConfig {
    fn default() -> Self {
        let cores = logical_cores();
        Self {
            download_workers: cores,
            decrypt_workers: (cores / 2).max(1),
        }
    }
}

// --- Fetcher Configuration ---
#[derive(Debug, Clone)]
pub struct HlsFetcherConfig {
    /// Retries after the first failed attempt, so 5 means 6 attempts in total
    pub max_segment_retries: u32,
    /// Fixed pause between segment attempts
    pub segment_retry_delay: Duration,
    /// 2 means 3 key fetches in total
    pub max_key_retries: u32,
    pub key_retry_delay: Duration,
    pub max_playlist_retries: u32,
    pub playlist_retry_delay: Duration,
}

impl Default for HlsFetcherConfig {
    fn default() -> Self {
        Self {
            max_segment_retries: 5,
            segment_retry_delay: Duration::from_millis(200),
            max_key_retries: 2,
            key_retry_delay: Duration::from_millis(200),
            max_playlist_retries: 3,
            playlist_retry_delay: Duration::from_millis(500),
        }
    }
}

// --- Decryption Configuration ---
#[derive(Debug, Clone)]
pub struct HlsDecryptionConfig {
    pub max_decrypt_retries: u32,
    /// Bytes read per iteration; rounded down to a whole number of AES blocks
    pub read_chunk_size: usize,
}

impl Default for HlsDecryptionConfig {
    fn default() -> Self {
        Self {
            max_decrypt_retries: 3,
            read_chunk_size: 64 * 1024,
        }
    }
}

// --- Merge Configuration ---
#[derive(Debug, Clone)]
pub struct HlsMergeConfig {
    pub chunk_size: usize,
    pub output_format: OutputFormat,
    /// Remux program, looked up on PATH
    pub remux_program: PathBuf,
    /// Delete raw and decrypted segment files once the merge succeeded
    pub cleanup_intermediates: bool,
}

impl Default for HlsMergeConfig {
    fn default() -> Self {
        Self {
            chunk_size: 8 * 1024,
            output_format: OutputFormat::Ts,
            remux_program: PathBuf::from("ffmpeg"),
            cleanup_intermediates: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HlsProgressConfig {
    /// Completions between two progress reports inside a phase
    pub batch_size: usize,
}

impl Default for HlsProgressConfig {
    fn default() -> Self {
        Self { batch_size: 5 }
    }
}

/// Container of the final artifact. Anything but `Ts` goes through a remux.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum OutputFormat {
    #[default]
    Ts,
    Mp4,
    Mkv,
    Mov,
    Flv,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 5] = [
        OutputFormat::Ts,
        OutputFormat::Mp4,
        OutputFormat::Mkv,
        OutputFormat::Mov,
        OutputFormat::Flv,
    ];

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Ts => "ts",
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Mkv => "mkv",
            OutputFormat::Mov => "mov",
            OutputFormat::Flv => "flv",
        }
    }

    pub fn needs_remux(&self) -> bool {
        *self != OutputFormat::Ts
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().trim_start_matches('.').to_ascii_lowercase();
        OutputFormat::ALL
            .into_iter()
            .find(|format| format.extension() == wanted)
            .ok_or_else(|| format!("Unknown output format: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decrypt_pool_is_half_of_download_pool() {
        let config = HlsPoolConfig::default();
        assert!(config.download_workers >= 1);
        assert_eq!(config.decrypt_workers, (config.download_workers / 2).max(1));
    }

    #[test]
    fn test_output_format_parsing() {
        assert_eq!("mp4".parse::<OutputFormat>(), Ok(OutputFormat::Mp4));
        assert_eq!(".MKV".parse::<OutputFormat>(), Ok(OutputFormat::Mkv));
        assert!("avi".parse::<OutputFormat>().is_err());
        assert!(!OutputFormat::Ts.needs_remux());
        assert!(OutputFormat::Mov.needs_remux());
        assert_eq!(OutputFormat::Flv.to_string(), "flv");
    }
}
