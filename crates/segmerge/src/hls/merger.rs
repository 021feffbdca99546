// HLS Merger: concatenates decrypted segments by index and optionally
// remuxes the result into another container.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::hls::HlsDownloaderError;
use crate::hls::config::{HlsMergeConfig, OutputFormat};
use crate::hls::playlist::{decrypted_file_name, raw_file_name};
use crate::process::tokio_command;

/// Converts a transport stream into another container.
#[async_trait]
pub trait Remuxer: Send + Sync {
    async fn remux(&self, input: &Path, output: &Path) -> Result<(), HlsDownloaderError>;
}

/// Runs `<program> -y -i <input> -c copy <output>`.
#[derive(Debug, Clone)]
pub struct FfmpegRemuxer {
    program: PathBuf,
}

impl FfmpegRemuxer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Remuxer for FfmpegRemuxer {
    async fn remux(&self, input: &Path, output: &Path) -> Result<(), HlsDownloaderError> {
        let result = tokio_command(&self.program)
            .arg("-y")
            .arg("-i")
            .arg(input)
            .args(["-c", "copy"])
            .arg(output)
            .output()
            .await
            .map_err(|e| {
                HlsDownloaderError::RemuxError(format!(
                    "Failed to start {}: {e}",
                    self.program.display()
                ))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(3)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join(" | ");
            return Err(HlsDownloaderError::RemuxError(format!(
                "{} exited with {}: {tail}",
                self.program.display(),
                result.status
            )));
        }
        Ok(())
    }
}

pub struct Merger {
    config: HlsMergeConfig,
    remuxer: Arc<dyn Remuxer>,
}

impl Merger {
    pub fn new(config: HlsMergeConfig, remuxer: Arc<dyn Remuxer>) -> Self {
        Self { config, remuxer }
    }

    pub fn output_format(&self) -> OutputFormat {
        self.config.output_format
    }

    /// Streams `inputs`, in the given order, into a fresh `output`.
    pub async fn concat_in_order(
        &self,
        inputs: &[PathBuf],
        output: &Path,
    ) -> Result<u64, HlsDownloaderError> {
        let mut writer = tokio::fs::File::create(output).await.map_err(|e| {
            HlsDownloaderError::MergeError(format!("Cannot create {}: {e}", output.display()))
        })?;
        let mut buf = vec![0u8; self.config.chunk_size.max(1)];
        let mut total = 0u64;

        for input in inputs {
            let mut reader = tokio::fs::File::open(input).await.map_err(|e| {
                HlsDownloaderError::MergeError(format!("Cannot open {}: {e}", input.display()))
            })?;
            loop {
                let n = reader.read(&mut buf).await.map_err(|e| {
                    HlsDownloaderError::MergeError(format!("Read from {}: {e}", input.display()))
                })?;
                if n == 0 {
                    break;
                }
                writer.write_all(&buf[..n]).await.map_err(|e| {
                    HlsDownloaderError::MergeError(format!("Write to {}: {e}", output.display()))
                })?;
                total += n as u64;
            }
        }

        writer.flush().await.map_err(|e| {
            HlsDownloaderError::MergeError(format!("Flush {}: {e}", output.display()))
        })?;
        Ok(total)
    }

    /// Merges `decrypt_0.ts .. decrypt_<count-1>.ts` of `dir` into
    /// `<dir>/<title>.<ext>`. `before_remux` runs right before the external
    /// tool is started.
    pub async fn merge(
        &self,
        dir: &Path,
        title: &str,
        count: usize,
        before_remux: impl FnOnce(),
    ) -> Result<PathBuf, HlsDownloaderError> {
        let inputs: Vec<PathBuf> = (0..count)
            .map(|i| dir.join(decrypted_file_name(i)))
            .collect();
        let ts_path = dir.join(format!("{title}.{}", OutputFormat::Ts.extension()));

        let bytes = self.concat_in_order(&inputs, &ts_path).await?;
        info!(segments = count, bytes, "Merged into {}", ts_path.display());

        let format = self.config.output_format;
        if !format.needs_remux() {
            return Ok(ts_path);
        }

        before_remux();
        let output = dir.join(format!("{title}.{}", format.extension()));
        self.remuxer.remux(&ts_path, &output).await?;
        tokio::fs::remove_file(&ts_path).await?;
        info!(format = %format, "Remuxed into {}", output.display());
        Ok(output)
    }

    /// Removes the raw and decrypted segment files of `dir`.
    pub async fn cleanup(&self, dir: &Path, count: usize) -> Result<(), HlsDownloaderError> {
        for i in 0..count {
            for name in [raw_file_name(i), decrypted_file_name(i)] {
                let path = dir.join(name);
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to remove intermediate file");
                        return Err(e.into());
                    }
                }
            }
        }
        debug!(dir = %dir.display(), "Removed intermediate segment files");
        Ok(())
    }
}
