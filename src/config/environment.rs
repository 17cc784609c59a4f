// ABOUTME: HTTP server configuration loaded from the process environment
// ABOUTME: Listen address, read/write timeouts and TLS certificate material
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::info;

use super::{env_bool, env_optional_duration, env_parse, env_var_or};

/// Where TLS certificate and key come from
#[derive(Clone, PartialEq, Eq)]
pub enum TlsSource {
    /// PEM files on disk
    Files {
        /// Certificate chain path
        cert: PathBuf,
        /// Private key path
        key: PathBuf,
    },
    /// PEM text held in memory
    Pem {
        /// Certificate chain
        cert: String,
        /// Private key
        key: String,
    },
}

impl std::fmt::Debug for TlsSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Files { cert, key } => f
                .debug_struct("Files")
                .field("cert", cert)
                .field("key", key)
                .finish(),
            Self::Pem { .. } => f.write_str("Pem { .. }"),
        }
    }
}

/// TLS settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// Certificate and key material
    pub source: TlsSource,
}

/// HTTP server settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Listen host
    pub host: IpAddr,
    /// Listen port
    pub port: u16,
    /// Maximum time to receive a full request
    pub read_timeout: Option<Duration>,
    /// Maximum time to produce a response
    pub write_timeout: Option<Duration>,
    /// TLS termination, when enabled
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            read_timeout: None,
            write_timeout: None,
            tls: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error naming the variable whose value cannot be parsed, or
    /// when TLS is enabled without a certificate and key
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            host: env_var_or("HTTP_HOST", "0.0.0.0")
                .parse()
                .context("Invalid HTTP_HOST value")?,
            port: env_parse("HTTP_PORT", defaults.port)?,
            read_timeout: env_optional_duration("HTTP_READ_TIMEOUT")?,
            write_timeout: env_optional_duration("HTTP_WRITE_TIMEOUT")?,
            tls: if env_bool("SSL_ENABLED", false) {
                Some(TlsConfig {
                    source: tls_source_from_env()?,
                })
            } else {
                None
            },
        };

        info!(
            addr = %config.addr(),
            tls = config.tls.is_some(),
            "HTTP server configuration loaded"
        );
        Ok(config)
    }

    /// Socket address to bind
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn tls_source_from_env() -> Result<TlsSource> {
    let non_empty = |key: &str| env::var(key).ok().filter(|v| !v.trim().is_empty());

    if let (Some(cert), Some(key)) = (non_empty("SSL_CERT_PEM"), non_empty("SSL_KEY_PEM")) {
        return Ok(TlsSource::Pem { cert, key });
    }
    if let (Some(cert), Some(key)) = (non_empty("SSL_CERT_FILE"), non_empty("SSL_KEY_FILE")) {
        return Ok(TlsSource::Files {
            cert: PathBuf::from(cert),
            key: PathBuf::from(key),
        });
    }
    Err(anyhow!(
        "SSL_ENABLED is set but neither SSL_CERT_FILE/SSL_KEY_FILE nor SSL_CERT_PEM/SSL_KEY_PEM are provided"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_addr() {
        assert_eq!(ServerConfig::default().addr().to_string(), "0.0.0.0:8080");
    }

    #[test]
    fn test_pem_source_debug_hides_key() {
        let source = TlsSource::Pem {
            cert: "CERT".into(),
            key: "SECRET".into(),
        };
        assert!(!format!("{source:?}").contains("SECRET"));
    }
}
