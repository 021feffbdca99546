use std::str::FromStr;

use reqwest::Proxy;

/// Which requests a proxy applies to.
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum ProxyType {
    Http,
    Https,
    /// Tunnels every scheme; a bare `host:port` gets the `socks5://` prefix.
    Socks5,
    All,
}

impl FromStr for ProxyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(ProxyType::Http),
            "https" => Ok(ProxyType::Https),
            "socks5" => Ok(ProxyType::Socks5),
            "all" => Ok(ProxyType::All),
            other => Err(format!("Invalid proxy type: '{other}'")),
        }
    }
}

/// Basic auth credentials sent to the proxy.
#[derive(Debug, Clone)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// e.g. `http://proxy.example.com:8080`
    pub url: String,
    pub proxy_type: ProxyType,
    pub auth: Option<ProxyAuth>,
}

impl ProxyConfig {
    pub fn new(url: impl Into<String>, proxy_type: ProxyType) -> Self {
        Self {
            url: url.into(),
            proxy_type,
            auth: None,
        }
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(ProxyAuth {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Translate into the reqwest proxy the client is built with.
    pub fn to_reqwest(&self) -> Result<Proxy, String> {
        let built = match self.proxy_type {
            ProxyType::Http => Proxy::http(&self.url),
            ProxyType::Https => Proxy::https(&self.url),
            ProxyType::Socks5 if self.url.starts_with("socks5://") => Proxy::all(&self.url),
            ProxyType::Socks5 => Proxy::all(format!("socks5://{}", self.url)),
            ProxyType::All => Proxy::all(&self.url),
        };
        let proxy = built.map_err(|e| format!("Invalid {:?} proxy URL {}: {e}", self.proxy_type, self.url))?;

        Ok(match &self.auth {
            Some(auth) => proxy.basic_auth(&auth.username, &auth.password),
            None => proxy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socks5_scheme_is_added() {
        let config = ProxyConfig::new("127.0.0.1:1080", ProxyType::Socks5);
        assert!(config.to_reqwest().is_ok());
    }

    #[test]
    fn test_invalid_http_proxy_is_rejected() {
        let config = ProxyConfig::new("http://[::1", ProxyType::Http).with_auth("user", "pass");
        let err = config.to_reqwest().unwrap_err();
        assert!(err.starts_with("Invalid Http proxy URL"));
    }

    #[test]
    fn test_proxy_type_parsing() {
        assert_eq!("SOCKS5".parse::<ProxyType>(), Ok(ProxyType::Socks5));
        assert_eq!("all".parse::<ProxyType>(), Ok(ProxyType::All));
        assert!("ftp".parse::<ProxyType>().is_err());
    }
}
