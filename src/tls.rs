// SPDX-License-Identifier: MIT
//! TLS policy resolution for both transports.
//!
//! Produces a [`TlsPolicy`] - plaintext or TLS, with optional CA bundle,
//! client identity, and a verification-skip flag for self-signed test
//! setups. Loopback targets default to plaintext unless the scheme says
//! `https`, so local collectors work without certificate ceremony.

use std::net::IpAddr;

use tracing::debug;

use crate::config::Config;
use crate::endpoint::{Endpoint, Scheme};
use crate::error::OtlpError;

/// Resolved TLS decision for one connection.
#[derive(Debug, Clone, Default)]
pub struct TlsPolicy {
    /// Dial without TLS at all.
    pub plaintext: bool,
    /// Skip server certificate verification (self-signed test setups).
    pub no_verify: bool,
    /// PEM bytes of a custom CA bundle; None means the system trust store.
    pub ca_pem: Option<Vec<u8>>,
    /// PEM bytes of a client certificate and key, always both or neither.
    pub identity_pem: Option<(Vec<u8>, Vec<u8>)>,
}

/// Build the TLS policy for `endpoint` from the configured TLS settings.
pub async fn resolve_tls(cfg: &Config, endpoint: &Endpoint) -> Result<TlsPolicy, OtlpError> {
    // Unix sockets and http:// can never carry TLS; an explicit insecure
    // flag always forces plaintext; loopback defaults to plaintext unless
    // the scheme demands https.
    let plaintext = cfg.insecure
        || endpoint.insecure
        || (endpoint.scheme != Scheme::Https && host_is_loopback(&endpoint.host).await);

    if plaintext {
        debug!(endpoint = %endpoint, "resolved to plaintext connection");
        return Ok(TlsPolicy {
            plaintext: true,
            ..TlsPolicy::default()
        });
    }

    let ca_pem = match cfg.tls_ca_cert.as_str() {
        "" => None,
        path => Some(tokio::fs::read(path).await.map_err(|e| {
            OtlpError::Config(format!("read CA bundle {path:?}: {e}"))
        })?),
    };

    let identity_pem = match (cfg.tls_client_cert.as_str(), cfg.tls_client_key.as_str()) {
        ("", "") => None,
        ("", _) | (_, "") => {
            return Err(OtlpError::Config(
                "client certificate and key must be configured together".into(),
            ))
        }
        (cert, key) => {
            let cert_pem = tokio::fs::read(cert).await.map_err(|e| {
                OtlpError::Config(format!("read client certificate {cert:?}: {e}"))
            })?;
            let key_pem = tokio::fs::read(key).await.map_err(|e| {
                OtlpError::Config(format!("read client key {key:?}: {e}"))
            })?;
            Some((cert_pem, key_pem))
        }
    };

    Ok(TlsPolicy {
        plaintext: false,
        no_verify: cfg.tls_no_verify,
        ca_pem,
        identity_pem,
    })
}

/// True when `host` is a loopback name, a loopback literal, or a hostname
/// whose every resolved address is loopback.
async fn host_is_loopback(host: &str) -> bool {
    if host == "localhost" {
        return true;
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback();
    }
    match tokio::net::lookup_host((host, 0u16)).await {
        Ok(addrs) => {
            let mut any = false;
            for addr in addrs {
                if !addr.ip().is_loopback() {
                    return false;
                }
                any = true;
            }
            any
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(scheme: Scheme, host: &str) -> Endpoint {
        Endpoint {
            scheme,
            host: host.into(),
            port: Some(4317),
            path: String::new(),
            insecure: scheme == Scheme::Http,
        }
    }

    #[tokio::test]
    async fn loopback_defaults_to_plaintext() {
        let cfg = Config::default();
        for host in ["localhost", "127.0.0.1", "::1"] {
            let policy = resolve_tls(&cfg, &endpoint(Scheme::Grpc, host)).await.unwrap();
            assert!(policy.plaintext, "{host} should be plaintext");
        }
    }

    #[tokio::test]
    async fn https_scheme_keeps_tls_even_on_loopback() {
        let cfg = Config::default();
        let policy = resolve_tls(&cfg, &endpoint(Scheme::Https, "127.0.0.1"))
            .await
            .unwrap();
        assert!(!policy.plaintext);
    }

    #[tokio::test]
    async fn insecure_flag_forces_plaintext() {
        let cfg = Config {
            insecure: true,
            ..Config::default()
        };
        let policy = resolve_tls(&cfg, &endpoint(Scheme::Https, "collector.example.com"))
            .await
            .unwrap();
        assert!(policy.plaintext);
    }

    #[tokio::test]
    async fn lone_client_cert_is_a_config_error() {
        let cfg = Config {
            tls_client_cert: "/does/not/matter.pem".into(),
            ..Config::default()
        };
        let err = resolve_tls(&cfg, &endpoint(Scheme::Https, "collector.example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, OtlpError::Config(_)));
    }

    #[tokio::test]
    async fn no_verify_carries_through() {
        let cfg = Config {
            tls_no_verify: true,
            ..Config::default()
        };
        let policy = resolve_tls(&cfg, &endpoint(Scheme::Https, "collector.example.com"))
            .await
            .unwrap();
        assert!(policy.no_verify);
        assert!(policy.ca_pem.is_none());
    }
}
