use std::sync::Arc;

#[derive(Debug, thiserror::Error, Clone)]
pub enum HlsDownloaderError {
    #[error("Playlist error: {0}")]
    PlaylistError(String),
    #[error("Playlist {0} contains no segments")]
    EmptyPlaylist(String),
    #[error("Unsupported encryption method: {0}")]
    UnsupportedEncryption(String),
    #[error("Network error: {source}")]
    NetworkError {
        #[from]
        source: Arc<reqwest::Error>,
    },
    #[error("HTTP {status} for {url}")]
    StatusError { url: String, status: u16 },
    #[error("Decryption key unavailable: {0}")]
    KeyUnavailable(String),
    #[error("Segment {index} failed after {attempts} attempts")]
    SegmentExhausted { index: usize, attempts: u32 },
    #[error("Decryption error: {0}")]
    DecryptionError(String),
    #[error("Segment {index} could not be decrypted after {attempts} attempts")]
    DecryptExhausted { index: usize, attempts: u32 },
    #[error("Merge failed: {0}")]
    MergeError(String),
    #[error("Remux failed: {0}")]
    RemuxError(String),
    #[error("I/O error: {source}")]
    IoError {
        #[from]
        source: Arc<std::io::Error>,
    },
    #[error("Duplicate content owner at {0} failed before producing its output")]
    DuplicateOwnerFailed(String),
    #[error("Internal error: {0}")]
    InternalError(String),
    #[error("Operation cancelled")]
    Cancelled,
}

// Manual implementation of From<reqwest::Error> for HlsDownloaderError
// because of the Arc wrapping.
impl From<reqwest::Error> for HlsDownloaderError {
    fn from(err: reqwest::Error) -> Self {
        HlsDownloaderError::NetworkError {
            source: Arc::new(err),
        }
    }
}

impl From<std::io::Error> for HlsDownloaderError {
    fn from(err: std::io::Error) -> Self {
        HlsDownloaderError::IoError {
            source: Arc::new(err),
        }
    }
}

impl From<tokio::task::JoinError> for HlsDownloaderError {
    fn from(err: tokio::task::JoinError) -> Self {
        HlsDownloaderError::InternalError(format!("Worker task failed: {err}"))
    }
}
