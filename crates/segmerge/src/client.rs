use reqwest::Client;
use rustls::{ClientConfig, crypto::aws_lc_rs};
use rustls_platform_verifier::BuilderVerifierExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{DownloadError, DownloaderConfig};

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &DownloaderConfig) -> Result<Client, DownloadError> {
    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(8)
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if config.danger_accept_invalid_certs {
        // reqwest builds its own rustls config here, which needs a process default provider.
        // Err only means another provider was installed first.
        let _ = aws_lc_rs::default_provider().install_default();
        warn!("TLS certificate validation is disabled for downloads");
        client_builder = client_builder.danger_accept_invalid_certs(true);
    } else {
        let provider = Arc::new(aws_lc_rs::default_provider());
        let tls_config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| DownloadError::TlsError(e.to_string()))?
            .with_platform_verifier()
            .map_err(|e| DownloadError::TlsError(e.to_string()))?
            .with_no_client_auth();
        client_builder = client_builder.use_preconfigured_tls(tls_config);
    }

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if !config.read_timeout.is_zero() {
        client_builder = client_builder.read_timeout(config.read_timeout);
    }

    if let Some(proxy_config) = &config.proxy {
        let proxy = proxy_config.to_reqwest().map_err(DownloadError::ProxyError)?;
        client_builder = client_builder.proxy(proxy);
        info!(proxy_url = %proxy_config.url, "Using explicitly configured proxy for downloads");
    } else if config.use_system_proxy {
        // reqwest reads the system proxy once, while building the client
        info!("Using system proxy settings for downloads");
    } else {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled for downloads");
    }

    client_builder.build().map_err(DownloadError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_client_with_defaults() {
        let config = DownloaderConfig::default();
        assert!(create_client(&config).is_ok());
    }

    #[test]
    fn test_create_client_rejects_bad_proxy() {
        let config = DownloaderConfig::builder()
            .with_proxy(crate::ProxyConfig::new("http://[::1", crate::ProxyType::Http))
            .build();
        assert!(matches!(
            create_client(&config),
            Err(DownloadError::ProxyError(_))
        ));
    }
}
