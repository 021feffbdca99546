use std::time::Duration;

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};

use crate::proxy::ProxyConfig;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36";

/// HTTP settings for manifest, key and segment requests.
///
/// A zero duration disables the corresponding timeout.
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Whole request, body included
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Longest gap between two body chunks
    pub read_timeout: Duration,
    pub follow_redirects: bool,
    pub user_agent: String,
    /// Sent with every request
    pub headers: HeaderMap,
    /// Explicit proxy; takes precedence over `use_system_proxy`
    pub proxy: Option<ProxyConfig>,
    /// Let reqwest pick up the platform proxy when the client is built
    pub use_system_proxy: bool,
    /// On by default: segment CDNs often present certificates that do not verify
    pub danger_accept_invalid_certs: bool,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: Self::default_headers(),
            proxy: None,
            use_system_proxy: true,
            danger_accept_invalid_certs: true,
        }
    }
}

impl DownloaderConfig {
    pub fn builder() -> crate::builder::DownloaderConfigBuilder {
        crate::builder::DownloaderConfigBuilder::new()
    }

    /// Browser-like headers; compression is negotiated by reqwest itself.
    pub fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        headers
    }
}
