//! Server configuration settings

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::EndpointError;

/// Client endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on
    #[serde(default = "default_port")]
    pub listen_port: u16,

    /// Host to bind to
    #[serde(default = "default_host")]
    pub listen_host: String,

    /// Publicly shared endpoint (binds every interface)
    #[serde(default)]
    pub share: bool,

    /// TLS private key (PEM)
    #[serde(default)]
    pub ssl_keyfile: Option<PathBuf>,

    /// TLS certificate chain (PEM)
    #[serde(default)]
    pub ssl_certfile: Option<PathBuf>,

    /// Inline credentials, `user:pass` pairs separated by commas
    #[serde(default)]
    pub auth: Option<String>,

    /// File with more credentials in the same format
    #[serde(default)]
    pub auth_path: Option<PathBuf>,

    /// Mount path prefix for every route
    #[serde(default)]
    pub subpath: Option<String>,

    /// Serve only the API, no interface state or static assets
    #[serde(default)]
    pub api_only: bool,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Enable request logging
    #[serde(default = "default_true")]
    pub request_logging: bool,
}

fn default_port() -> u16 {
    7860
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_port: default_port(),
            listen_host: default_host(),
            share: false,
            ssl_keyfile: None,
            ssl_certfile: None,
            auth: None,
            auth_path: None,
            subpath: None,
            api_only: false,
            cors_enabled: true,
            request_logging: true,
        }
    }
}

impl ServerConfig {
    /// Host to bind, `0.0.0.0` when sharing
    fn bind_host(&self) -> &str {
        if self.share {
            "0.0.0.0"
        } else {
            self.listen_host.trim_start_matches('[').trim_end_matches(']')
        }
    }

    /// Get the socket address string
    pub fn addr(&self) -> String {
        let host = self.bind_host();
        match host.parse::<IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, self.listen_port).to_string(),
            Err(_) => format!("{}:{}", host, self.listen_port),
        }
    }

    /// Resolve the bind address; host names go through the system resolver
    pub async fn socket_addr(&self) -> Result<SocketAddr, EndpointError> {
        let host = self.bind_host();
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.listen_port));
        }

        let mut resolved = tokio::net::lookup_host((host, self.listen_port))
            .await
            .map_err(|_| EndpointError::Address(self.addr()))?;
        resolved
            .next()
            .ok_or_else(|| EndpointError::Address(self.addr()))
    }

    /// TLS key and certificate, if both are configured
    pub fn tls_paths(&self) -> Option<(&PathBuf, &PathBuf)> {
        match (&self.ssl_keyfile, &self.ssl_certfile) {
            (Some(key), Some(cert)) => Some((key, cert)),
            _ => None,
        }
    }

    /// Normalized mount prefix: leading slash, no trailing slash, `None` for root
    pub fn mount_path(&self) -> Option<String> {
        let raw = self.subpath.as_deref()?.trim().trim_matches('/');
        if raw.is_empty() {
            None
        } else {
            Some(format!("/{}", raw))
        }
    }

    /// Whether any credential source is configured
    pub fn has_auth(&self) -> bool {
        self.auth.as_deref().map(|a| !a.trim().is_empty()).unwrap_or(false)
            || self.auth_path.is_some()
    }

    /// Operator warnings about risky flag combinations
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let exposed = self.share || self.listen_host == "0.0.0.0";
        if exposed && !self.has_auth() {
            warnings.push(
                "The endpoint is reachable from other machines without any access password. \
                 Consider --auth or --auth-path."
                    .to_string(),
            );
        }
        if self.ssl_keyfile.is_some() != self.ssl_certfile.is_some() {
            warnings.push(
                "TLS needs both --ssl-keyfile and --ssl-certfile; serving plain HTTP.".to_string(),
            );
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_mount_path_normalization() {
        let mut config = ServerConfig::default();
        assert_eq!(config.mount_path(), None);

        config.subpath = Some("/".to_string());
        assert_eq!(config.mount_path(), None);

        config.subpath = Some("llm/".to_string());
        assert_eq!(config.mount_path(), Some("/llm".to_string()));
    }

    #[test]
    fn test_share_binds_all_interfaces() {
        let config = ServerConfig {
            share: true,
            listen_port: 9000,
            ..Default::default()
        };
        assert_eq!(config.addr(), "0.0.0.0:9000");
        assert_eq!(config.warnings().len(), 1);
    }

    #[test]
    fn test_ipv6_host_is_bracketed() {
        let config = ServerConfig {
            listen_host: "::".to_string(),
            ..Default::default()
        };
        assert_eq!(config.addr(), "[::]:7860");
    }

    #[tokio::test]
    async fn test_socket_addr_accepts_literals_and_names() {
        let mut config = ServerConfig {
            listen_host: "::".to_string(),
            ..Default::default()
        };
        let addr = config.socket_addr().await.unwrap();
        assert!(addr.ip().is_unspecified() && addr.is_ipv6());
        assert_eq!(addr.port(), 7860);

        config.listen_host = "localhost".to_string();
        let addr = config.socket_addr().await.unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 7860);

        config.share = true;
        let addr = config.socket_addr().await.unwrap();
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }

    #[test]
    fn test_partial_tls_warns() {
        let config = ServerConfig {
            ssl_keyfile: Some(PathBuf::from("key.pem")),
            ..Default::default()
        };
        assert!(config.tls_paths().is_none());
        assert_eq!(config.warnings().len(), 1);
    }
}
