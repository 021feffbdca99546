// HLS Decryption: resolves the AES-128 key once per task and decrypts
// downloaded segments on disk.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use aes::Aes128;
use cipher::generic_array::GenericArray;
use cipher::{BlockDecryptMut, KeyIvInit};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::hls::HlsDownloaderError;
use crate::hls::config::HlsConfig;
use crate::hls::playlist::EncryptionDescriptor;
use crate::transport::Transport;

type Aes128CbcDec = cbc::Decryptor<Aes128>;

pub const AES_BLOCK_SIZE: usize = 16;
pub const KEY_LENGTH: usize = 16;

/// Fetches key bytes from the descriptor's key URI.
pub struct KeyResolver {
    transport: Arc<dyn Transport>,
    config: Arc<HlsConfig>,
}

impl KeyResolver {
    pub fn new(transport: Arc<dyn Transport>, config: Arc<HlsConfig>) -> Self {
        Self { transport, config }
    }

    /// Returns the cached key, fetching it on first use. Concurrent callers
    /// share a single fetch.
    pub async fn resolve(
        &self,
        descriptor: &EncryptionDescriptor,
    ) -> Result<[u8; KEY_LENGTH], HlsDownloaderError> {
        descriptor
            .key_cell()
            .get_or_try_init(|| self.fetch_key(&descriptor.key_uri))
            .await
            .copied()
    }

    // An error and an empty body are treated alike: both use up an attempt.
    async fn fetch_key(&self, key_uri: &str) -> Result<[u8; KEY_LENGTH], HlsDownloaderError> {
        let retries = self.config.fetcher_config.max_key_retries;
        let mut attempts = 0;
        let last_error = loop {
            attempts += 1;
            let error = match self.transport.fetch_bytes(key_uri).await {
                Ok(body) if !body.is_empty() => {
                    debug!(uri = key_uri, "Fetched decryption key");
                    return <[u8; KEY_LENGTH]>::try_from(&body[..]).map_err(|_| {
                        HlsDownloaderError::KeyUnavailable(format!(
                            "Key from {key_uri} is {} bytes, expected {KEY_LENGTH}",
                            body.len()
                        ))
                    });
                }
                Ok(_) => format!("empty response from {key_uri}"),
                Err(e) => e.to_string(),
            };
            if attempts > retries {
                break error;
            }
            warn!(uri = key_uri, attempt = attempts, error = %error, "Key fetch failed, retrying");
            tokio::time::sleep(self.config.fetcher_config.key_retry_delay).await;
        };

        Err(HlsDownloaderError::KeyUnavailable(format!(
            "{last_error} (after {attempts} attempts)"
        )))
    }
}

/// Reads into `buf` until it is full or the reader is exhausted.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Decrypts one segment file into another. Synchronous: callers run it on
/// the blocking pool.
#[derive(Debug, Clone)]
pub struct SegmentDecryptor {
    /// `None` for unencrypted playlists; segments are then copied as-is.
    key: Option<[u8; KEY_LENGTH]>,
    iv: [u8; AES_BLOCK_SIZE],
    chunk_size: usize,
}

impl SegmentDecryptor {
    pub fn new(key: [u8; KEY_LENGTH], iv: [u8; AES_BLOCK_SIZE], chunk_size: usize) -> Self {
        Self {
            key: Some(key),
            iv,
            chunk_size: Self::block_aligned(chunk_size),
        }
    }

    pub fn passthrough() -> Self {
        Self {
            key: None,
            iv: [0; AES_BLOCK_SIZE],
            chunk_size: Self::block_aligned(0),
        }
    }

    fn block_aligned(chunk_size: usize) -> usize {
        (chunk_size / AES_BLOCK_SIZE).max(1) * AES_BLOCK_SIZE
    }

    pub fn is_passthrough(&self) -> bool {
        self.key.is_none()
    }

    /// Decrypts `input` into `output`, returning the number of bytes written.
    ///
    /// Every segment starts from the playlist IV and chains CBC state across
    /// its own blocks. A trailing remainder shorter than one block is written
    /// unmodified.
    pub fn decrypt_file(&self, input: &Path, output: &Path) -> Result<u64, HlsDownloaderError> {
        let Some(key) = self.key else {
            return Ok(std::fs::copy(input, output)?);
        };

        let mut decryptor = Aes128CbcDec::new_from_slices(&key, &self.iv).map_err(|e| {
            HlsDownloaderError::DecryptionError(format!("Invalid key or IV length: {e}"))
        })?;

        let mut reader = File::open(input)?;
        let mut writer = BufWriter::new(File::create(output)?);
        let mut buf = vec![0u8; self.chunk_size];
        let mut written = 0u64;

        loop {
            let filled = read_full(&mut reader, &mut buf)?;
            if filled == 0 {
                break;
            }
            let whole_blocks = filled - filled % AES_BLOCK_SIZE;
            for block in buf[..whole_blocks].chunks_exact_mut(AES_BLOCK_SIZE) {
                decryptor.decrypt_block_mut(GenericArray::from_mut_slice(block));
            }
            writer.write_all(&buf[..filled])?;
            written += filled as u64;
            if filled < buf.len() {
                break;
            }
        }
        writer.flush()?;

        trace!(bytes = written, "Decrypted {}", input.display());
        Ok(written)
    }

    /// `decrypt_file` with a bounded number of retries. A failed attempt
    /// leaves no output file behind.
    pub fn decrypt_with_retry(
        &self,
        index: usize,
        input: &Path,
        output: &Path,
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> Result<u64, HlsDownloaderError> {
        let mut attempts = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(HlsDownloaderError::Cancelled);
            }
            attempts += 1;
            match self.decrypt_file(input, output) {
                Ok(written) => return Ok(written),
                Err(e) => {
                    let _ = std::fs::remove_file(output);
                    if attempts > max_retries {
                        warn!(index, error = %e, "Giving up on segment decryption");
                        return Err(HlsDownloaderError::DecryptExhausted { index, attempts });
                    }
                    warn!(index, attempt = attempts, error = %e, "Decryption failed, retrying");
                }
            }
        }
    }
}
