// HLS Playlist: fetches a media manifest and turns it into an ordered segment list
// plus the manifest-level encryption descriptor.

use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use url::Url;

use crate::hls::HlsDownloaderError;
use crate::hls::config::HlsConfig;
use crate::transport::Transport;

pub const AES_128: &str = "AES-128";
const METHOD_NONE: &str = "NONE";
const KEY_TAG: &str = "#EXT-X-KEY";

static METHOD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"METHOD=([^,\s]+)").expect("valid METHOD regex"));
static URI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"URI="([^"]+)""#).expect("valid URI regex"));
static IV_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"IV=0[xX]([0-9a-fA-F]+)").expect("valid IV regex"));

/// Lifecycle of one segment, tracked per task alongside the playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Pending,
    Downloaded,
    DownloadFailed,
    DecryptFailed,
    Decrypted,
    /// Dropped together with its task's working directory
    Removed,
}

#[derive(Debug, Clone)]
pub struct Segment {
    /// Position in the manifest; the only ordering used when merging
    pub index: usize,
    pub url: String,
}

impl Segment {
    pub fn new(index: usize, url: String) -> Self {
        Self { index, url }
    }

    /// File name of the raw download inside the working directory
    pub fn raw_file_name(&self) -> String {
        raw_file_name(self.index)
    }

    pub fn decrypted_file_name(&self) -> String {
        decrypted_file_name(self.index)
    }
}

pub fn raw_file_name(index: usize) -> String {
    format!("segment_{index}.ts")
}

pub fn decrypted_file_name(index: usize) -> String {
    format!("decrypt_{index}.ts")
}

/// Manifest-level `#EXT-X-KEY` declaration.
#[derive(Debug, Clone)]
pub struct EncryptionDescriptor {
    pub method: String,
    pub key_uri: String,
    pub iv: [u8; 16],
    /// Filled once per task, on first use
    key: Arc<OnceCell<[u8; 16]>>,
}

impl EncryptionDescriptor {
    pub fn new(method: impl Into<String>, key_uri: impl Into<String>, iv: [u8; 16]) -> Self {
        Self {
            method: method.into(),
            key_uri: key_uri.into(),
            iv,
            key: Arc::new(OnceCell::new()),
        }
    }

    pub fn key_cell(&self) -> &OnceCell<[u8; 16]> {
        &self.key
    }

    pub fn resolved_key(&self) -> Option<[u8; 16]> {
        self.key.get().copied()
    }
}

#[derive(Debug, Clone)]
pub struct Playlist {
    pub url: String,
    pub segments: Vec<Segment>,
    pub encryption: Option<EncryptionDescriptor>,
}

impl Playlist {
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for Playlist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.encryption {
            Some(enc) => {
                writeln!(f, "METHOD: {}", enc.method)?;
                writeln!(f, "URI: {}", enc.key_uri)?;
                writeln!(f, "IV: 0x{}", hex::encode(enc.iv))?;
            }
            None => writeln!(f, "METHOD: NONE")?,
        }
        write!(f, "Total TS files: {}", self.segments.len())?;
        for segment in &self.segments {
            write!(f, "\n{}: {}", segment.index + 1, segment.url)?;
        }
        Ok(())
    }
}

/// Scheme, host and port of the playlist URL, e.g. `https://cdn.example.com:8443`.
fn playlist_origin(playlist_url: &str) -> Result<String, HlsDownloaderError> {
    let url = Url::parse(playlist_url).map_err(|e| {
        HlsDownloaderError::PlaylistError(format!("Invalid playlist URL {playlist_url}: {e}"))
    })?;
    if !url.has_host() {
        return Err(HlsDownloaderError::PlaylistError(format!(
            "Playlist URL {playlist_url} has no host"
        )));
    }
    Ok(url.origin().ascii_serialization())
}

fn resolve_reference(origin: &str, reference: &str) -> String {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        reference.to_string()
    } else {
        format!("{origin}/{}", reference.trim_start_matches('/'))
    }
}

/// Parses `0x`-prefixed hex into 16 bytes, left-padding short values with zeros.
pub fn parse_iv(hex_digits: &str) -> Result<[u8; 16], HlsDownloaderError> {
    let digits = hex_digits
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    if digits.is_empty() || digits.len() > 32 {
        return Err(HlsDownloaderError::PlaylistError(format!(
            "IV '{hex_digits}' must hold between 1 and 32 hex digits"
        )));
    }
    let padded = format!("{digits:0>32}");
    let mut iv = [0u8; 16];
    hex::decode_to_slice(&padded, &mut iv).map_err(|e| {
        HlsDownloaderError::PlaylistError(format!("Failed to parse IV '{hex_digits}': {e}"))
    })?;
    Ok(iv)
}

fn parse_key_line(
    line: &str,
    origin: &str,
) -> Result<Option<EncryptionDescriptor>, HlsDownloaderError> {
    let method = METHOD_RE
        .captures(line)
        .map(|c| c[1].trim_matches('"').to_string())
        .ok_or_else(|| {
            HlsDownloaderError::PlaylistError(format!("Key declaration without METHOD: {line}"))
        })?;

    if method.eq_ignore_ascii_case(METHOD_NONE) {
        return Ok(None);
    }
    if method != AES_128 {
        return Err(HlsDownloaderError::UnsupportedEncryption(method));
    }

    let key_uri = URI_RE
        .captures(line)
        .map(|c| resolve_reference(origin, &c[1]))
        .ok_or_else(|| {
            HlsDownloaderError::PlaylistError(format!("Key declaration without URI: {line}"))
        })?;
    let iv = match IV_RE.captures(line) {
        Some(c) => parse_iv(&c[1])?,
        None => {
            return Err(HlsDownloaderError::UnsupportedEncryption(format!(
                "{method} without an explicit IV"
            )));
        }
    };

    Ok(Some(EncryptionDescriptor::new(method, key_uri, iv)))
}

/// Line-oriented manifest scan. Every non-empty line that is not a tag or
/// comment is a segment reference; relative references hang off the
/// playlist's origin. The last key declaration wins.
pub fn parse_playlist(content: &str, playlist_url: &str) -> Result<Playlist, HlsDownloaderError> {
    let origin = playlist_origin(playlist_url)?;
    let mut segments = Vec::new();
    let mut encryption = None;

    for line in content.lines() {
        let line = line.trim_end_matches('\r').trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with(KEY_TAG) {
            encryption = parse_key_line(line, &origin)?;
        } else if !line.starts_with('#') {
            let url = resolve_reference(&origin, line);
            segments.push(Segment::new(segments.len(), url));
        }
    }

    if segments.is_empty() {
        return Err(HlsDownloaderError::EmptyPlaylist(playlist_url.to_string()));
    }

    Ok(Playlist {
        url: playlist_url.to_string(),
        segments,
        encryption,
    })
}

/// Fetches manifests with a bounded number of retries.
pub struct PlaylistLoader {
    transport: Arc<dyn Transport>,
    config: Arc<HlsConfig>,
}

impl PlaylistLoader {
    pub fn new(transport: Arc<dyn Transport>, config: Arc<HlsConfig>) -> Self {
        Self { transport, config }
    }

    pub async fn load(&self, playlist_url: &str) -> Result<Playlist, HlsDownloaderError> {
        let content = self.fetch_manifest(playlist_url).await?;
        let playlist = parse_playlist(&content, playlist_url)?;
        debug!("Parsed playlist {playlist_url}:\n{playlist}");
        Ok(playlist)
    }

    async fn fetch_manifest(&self, playlist_url: &str) -> Result<String, HlsDownloaderError> {
        let retries = self.config.fetcher_config.max_playlist_retries;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let last_error = match self.transport.fetch_bytes(playlist_url).await {
                Ok(body) if !body.is_empty() => {
                    return String::from_utf8(body.to_vec()).map_err(|e| {
                        HlsDownloaderError::PlaylistError(format!(
                            "Playlist content is not valid UTF-8: {e}"
                        ))
                    });
                }
                Ok(_) => HlsDownloaderError::PlaylistError(format!(
                    "Empty response for playlist {playlist_url}"
                )),
                Err(e) => e,
            };

            if attempts > retries {
                return Err(last_error);
            }
            warn!(url = playlist_url, attempt = attempts, error = %last_error, "Playlist fetch failed, retrying");
            tokio::time::sleep(self.config.fetcher_config.playlist_retry_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYLIST_URL: &str = "https://cdn.example.com:8443/videos/abc/index.m3u8";

    #[test]
    fn test_parse_segments_and_key() {
        let manifest = "#EXTM3U\r\n\
            #EXT-X-VERSION:3\r\n\
            #EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\",IV=0x00112233445566778899aabbccddeeff\r\n\
            #EXTINF:10.0,\r\n\
            seg0.ts\r\n\
            #EXTINF:10.0,\r\n\
            /abs/seg1.ts\r\n\
            \r\n\
            https://other.example.com/seg2.ts\r\n\
            #EXT-X-ENDLIST\r\n";

        let playlist = parse_playlist(manifest, PLAYLIST_URL).unwrap();
        let urls: Vec<_> = playlist.segments.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://cdn.example.com:8443/seg0.ts",
                "https://cdn.example.com:8443/abs/seg1.ts",
                "https://other.example.com/seg2.ts",
            ]
        );
        assert!(playlist.segments.iter().enumerate().all(|(i, s)| s.index == i));

        let enc = playlist.encryption.unwrap();
        assert_eq!(enc.method, AES_128);
        assert_eq!(enc.key_uri, "https://cdn.example.com:8443/key.bin");
        assert_eq!(
            enc.iv,
            [
                0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd,
                0xee, 0xff
            ]
        );
        assert!(enc.resolved_key().is_none());
    }

    #[test]
    fn test_playlist_without_segments_is_empty() {
        let manifest = "#EXTM3U\n#EXT-X-KEY:METHOD=AES-128,URI=\"k\",IV=0x01\n#EXT-X-ENDLIST\n";
        assert!(matches!(
            parse_playlist(manifest, PLAYLIST_URL),
            Err(HlsDownloaderError::EmptyPlaylist(_))
        ));
    }

    #[test]
    fn test_method_none_means_unencrypted() {
        let manifest = "#EXT-X-KEY:METHOD=NONE\nseg.ts\n";
        let playlist = parse_playlist(manifest, PLAYLIST_URL).unwrap();
        assert!(playlist.encryption.is_none());
        assert_eq!(playlist.len(), 1);
    }

    #[test]
    fn test_other_methods_are_rejected() {
        let manifest = "#EXT-X-KEY:METHOD=SAMPLE-AES,URI=\"k\",IV=0x01\nseg.ts\n";
        assert!(matches!(
            parse_playlist(manifest, PLAYLIST_URL),
            Err(HlsDownloaderError::UnsupportedEncryption(m)) if m == "SAMPLE-AES"
        ));

        let no_iv = "#EXT-X-KEY:METHOD=AES-128,URI=\"k\"\nseg.ts\n";
        assert!(matches!(
            parse_playlist(no_iv, PLAYLIST_URL),
            Err(HlsDownloaderError::UnsupportedEncryption(_))
        ));
    }

    #[test]
    fn test_last_key_line_wins() {
        let manifest = "#EXT-X-KEY:METHOD=AES-128,URI=\"first.key\",IV=0x01\n\
            seg0.ts\n\
            #EXT-X-KEY:METHOD=AES-128,URI=\"second.key\",IV=0x02\n\
            seg1.ts\n";
        let playlist = parse_playlist(manifest, PLAYLIST_URL).unwrap();
        let enc = playlist.encryption.as_ref().unwrap();
        assert_eq!(enc.key_uri, "https://cdn.example.com:8443/second.key");
        assert_eq!(enc.iv[15], 0x02);
        assert_eq!(playlist.len(), 2);

        let cleared = format!("{manifest}#EXT-X-KEY:METHOD=NONE\n");
        assert!(parse_playlist(&cleared, PLAYLIST_URL).unwrap().encryption.is_none());
    }

    #[test]
    fn test_short_iv_is_left_padded() {
        let iv = parse_iv("0x0102").unwrap();
        assert_eq!(&iv[..14], &[0u8; 14]);
        assert_eq!(&iv[14..], &[0x01, 0x02]);
        assert!(parse_iv("0x").is_err());
        assert!(parse_iv(&format!("0x{}", "a".repeat(33))).is_err());
    }

    #[test]
    fn test_summary_lists_every_segment() {
        let playlist = parse_playlist("a.ts\nb.ts\n", PLAYLIST_URL).unwrap();
        let summary = playlist.to_string();
        assert!(summary.starts_with("METHOD: NONE"));
        assert!(summary.contains("Total TS files: 2"));
        assert!(summary.ends_with("2: https://cdn.example.com:8443/b.ts"));
    }

    #[test]
    fn test_file_names() {
        let segment = Segment::new(7, "https://x/y.ts".to_string());
        assert_eq!(segment.raw_file_name(), "segment_7.ts");
        assert_eq!(segment.decrypted_file_name(), "decrypt_7.ts");
    }
}
