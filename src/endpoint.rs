// SPDX-License-Identifier: MIT
//! Endpoint resolution - configured endpoint strings into a normalized
//! transport target.
//!
//! The rules layered on top of plain URL parsing:
//! - a signal-specific endpoint takes precedence over the general one and is
//!   used exactly as given (no path defaulting);
//! - a bare `host[:port]` with no scheme is always gRPC, port 4317 when
//!   omitted;
//! - an explicit protocol override can force gRPC even against an
//!   `http(s)://` value;
//! - HTTP(S) targets reached via the general endpoint get `/v1/traces`
//!   appended exactly once.

use crate::error::OtlpError;

/// Default OTLP/gRPC port.
pub const DEFAULT_GRPC_PORT: u16 = 4317;

/// Path appended to general HTTP(S) endpoints for the traces signal.
pub const DEFAULT_TRACES_PATH: &str = "/v1/traces";

/// Transport protocol selection, as configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Grpc,
    HttpProtobuf,
}

impl std::str::FromStr for Protocol {
    type Err = OtlpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "grpc" => Ok(Protocol::Grpc),
            "http/protobuf" | "http" => Ok(Protocol::HttpProtobuf),
            other => Err(OtlpError::Config(format!(
                "unknown OTLP protocol {other:?} (want \"grpc\" or \"http/protobuf\")"
            ))),
        }
    }
}

/// URL scheme of a resolved endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Grpc,
    Http,
    Https,
    Unix,
}

/// A fully resolved transport target. Computed once per invocation, never
/// mutated afterward.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub scheme: Scheme,
    pub host: String,
    /// None means the scheme default (80/443) for HTTP(S).
    pub port: Option<u16>,
    /// Request path for HTTP, socket path for unix. Empty for gRPC.
    pub path: String,
    /// Derived: true when the scheme can never carry TLS.
    pub insecure: bool,
}

impl Endpoint {
    pub fn is_grpc(&self) -> bool {
        matches!(self.scheme, Scheme::Grpc | Scheme::Unix)
    }

    /// `host:port` for dialing gRPC.
    pub fn grpc_authority(&self) -> String {
        let port = self.port.unwrap_or(DEFAULT_GRPC_PORT);
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, port)
        } else {
            format!("{}:{}", self.host, port)
        }
    }

    /// Full URL for an HTTP POST.
    pub fn http_url(&self) -> String {
        let scheme = match self.scheme {
            Scheme::Https => "https",
            _ => "http",
        };
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        match self.port {
            Some(p) => format!("{scheme}://{host}:{p}{}", self.path),
            None => format!("{scheme}://{host}{}", self.path),
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.scheme {
            Scheme::Unix => write!(f, "unix://{}", self.path),
            Scheme::Grpc => write!(f, "grpc://{}", self.grpc_authority()),
            _ => write!(f, "{}", self.http_url()),
        }
    }
}

/// Resolve the configured endpoint strings into a transport target.
///
/// `signal` (the traces-specific endpoint) wins over `general` when both are
/// set. An empty result means no endpoint is configured at all - disabled
/// mode, served by the Null transport.
pub fn resolve_endpoint(
    general: &str,
    signal: &str,
    protocol: &str,
) -> Result<Option<Endpoint>, OtlpError> {
    let (raw, signal_specific) = if !signal.trim().is_empty() {
        (signal.trim(), true)
    } else if !general.trim().is_empty() {
        (general.trim(), false)
    } else {
        return Ok(None);
    };

    let force: Option<Protocol> = if protocol.trim().is_empty() {
        None
    } else {
        Some(protocol.trim().parse()?)
    };

    let mut endpoint = match raw.split_once("://") {
        None => parse_bare(raw)?,
        Some(("grpc", rest)) => parse_authority(rest, Scheme::Grpc)?,
        Some(("http", rest)) => parse_authority(rest, Scheme::Http)?,
        Some(("https", rest)) => parse_authority(rest, Scheme::Https)?,
        Some(("unix", rest)) => Endpoint {
            scheme: Scheme::Unix,
            host: String::new(),
            port: None,
            path: rest.to_string(),
            insecure: true,
        },
        Some((other, _)) => {
            return Err(OtlpError::Config(format!(
                "unsupported endpoint scheme {other:?}"
            )))
        }
    };

    // An explicit protocol override forces gRPC even against http(s) URLs.
    // The reverse is not honored: a bare host:port is always gRPC.
    if force == Some(Protocol::Grpc) && !endpoint.is_grpc() {
        endpoint = Endpoint {
            scheme: Scheme::Grpc,
            host: endpoint.host,
            port: endpoint.port,
            path: String::new(),
            insecure: endpoint.insecure,
        };
    }

    // General HTTP(S) endpoints get the traces path; signal-specific ones
    // are used exactly as given.
    if !signal_specific && matches!(endpoint.scheme, Scheme::Http | Scheme::Https) {
        endpoint.path = with_traces_path(&endpoint.path);
    }

    Ok(Some(endpoint))
}

fn with_traces_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.ends_with(DEFAULT_TRACES_PATH) {
        trimmed.to_string()
    } else {
        format!("{trimmed}{DEFAULT_TRACES_PATH}")
    }
}

/// `host[:port]` with no scheme: always gRPC.
fn parse_bare(raw: &str) -> Result<Endpoint, OtlpError> {
    let (host, port) = split_host_port(raw)?;
    Ok(Endpoint {
        scheme: Scheme::Grpc,
        host,
        port: Some(port.unwrap_or(DEFAULT_GRPC_PORT)),
        path: String::new(),
        insecure: false,
    })
}

fn parse_authority(rest: &str, scheme: Scheme) -> Result<Endpoint, OtlpError> {
    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], rest[i..].to_string()),
        None => (rest, String::new()),
    };
    let (host, mut port) = split_host_port(authority)?;
    if host.is_empty() {
        return Err(OtlpError::Config(format!("endpoint has no host: {rest:?}")));
    }
    if scheme == Scheme::Grpc {
        port = Some(port.unwrap_or(DEFAULT_GRPC_PORT));
    }
    Ok(Endpoint {
        scheme,
        host,
        port,
        path,
        insecure: scheme == Scheme::Http,
    })
}

/// Split `host[:port]`, tolerating bracketed IPv6 literals.
fn split_host_port(raw: &str) -> Result<(String, Option<u16>), OtlpError> {
    if let Some(rest) = raw.strip_prefix('[') {
        let close = rest
            .find(']')
            .ok_or_else(|| OtlpError::Config(format!("unterminated IPv6 literal: {raw:?}")))?;
        let host = rest[..close].to_string();
        let tail = &rest[close + 1..];
        if tail.is_empty() {
            return Ok((host, None));
        }
        let port = tail
            .strip_prefix(':')
            .and_then(|p| p.parse::<u16>().ok())
            .ok_or_else(|| OtlpError::Config(format!("bad port in {raw:?}")))?;
        return Ok((host, Some(port)));
    }

    // More than one colon without brackets is a bare IPv6 address.
    if raw.matches(':').count() > 1 {
        return Ok((raw.to_string(), None));
    }

    match raw.split_once(':') {
        None => Ok((raw.to_string(), None)),
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| OtlpError::Config(format!("bad port in {raw:?}")))?;
            Ok((host.to_string(), Some(port)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(general: &str, signal: &str, protocol: &str) -> Option<Endpoint> {
        resolve_endpoint(general, signal, protocol).unwrap()
    }

    #[test]
    fn empty_config_is_disabled_mode() {
        assert!(resolve("", "", "").is_none());
        assert!(resolve("  ", "", "").is_none());
    }

    #[test]
    fn bare_host_defaults_to_grpc_4317() {
        let ep = resolve("collector.example.com", "", "").unwrap();
        assert_eq!(ep.scheme, Scheme::Grpc);
        assert_eq!(ep.port, Some(4317));
        assert_eq!(ep.grpc_authority(), "collector.example.com:4317");
    }

    #[test]
    fn bare_host_port_is_always_grpc() {
        let ep = resolve("localhost:9999", "", "").unwrap();
        assert_eq!(ep.scheme, Scheme::Grpc);
        assert_eq!(ep.port, Some(9999));
        // Even an http/protobuf override does not turn a bare host into HTTP.
        let ep = resolve("localhost:9999", "", "http/protobuf").unwrap();
        assert_eq!(ep.scheme, Scheme::Grpc);
    }

    #[test]
    fn http_url_gets_traces_path_once() {
        let ep = resolve("http://collector:4318", "", "").unwrap();
        assert_eq!(ep.scheme, Scheme::Http);
        assert_eq!(ep.path, "/v1/traces");
        assert_eq!(ep.http_url(), "http://collector:4318/v1/traces");

        // Re-resolving an endpoint that already carries the path does not
        // duplicate it.
        let ep = resolve("http://collector:4318/v1/traces", "", "").unwrap();
        assert_eq!(ep.path, "/v1/traces");

        let ep = resolve("https://collector/base/", "", "").unwrap();
        assert_eq!(ep.scheme, Scheme::Https);
        assert_eq!(ep.path, "/base/v1/traces");
    }

    #[test]
    fn signal_endpoint_wins_and_is_verbatim() {
        let ep = resolve(
            "http://general:4318",
            "http://special:4318/custom/path",
            "",
        )
        .unwrap();
        assert_eq!(ep.host, "special");
        assert_eq!(ep.path, "/custom/path");
    }

    #[test]
    fn protocol_override_forces_grpc_over_http() {
        let ep = resolve("http://collector:4317", "", "grpc").unwrap();
        assert_eq!(ep.scheme, Scheme::Grpc);
        assert_eq!(ep.grpc_authority(), "collector:4317");
        assert_eq!(ep.path, "");
    }

    #[test]
    fn grpc_scheme_parses_as_url() {
        let ep = resolve("grpc://collector", "", "").unwrap();
        assert_eq!(ep.scheme, Scheme::Grpc);
        assert_eq!(ep.grpc_authority(), "collector:4317");
    }

    #[test]
    fn unix_socket_endpoint() {
        let ep = resolve("unix:///tmp/otlp.sock", "", "").unwrap();
        assert_eq!(ep.scheme, Scheme::Unix);
        assert_eq!(ep.path, "/tmp/otlp.sock");
        assert!(ep.insecure);
        assert!(ep.is_grpc());
    }

    #[test]
    fn ipv6_literals() {
        let ep = resolve("[::1]:4317", "", "").unwrap();
        assert_eq!(ep.host, "::1");
        assert_eq!(ep.port, Some(4317));
        assert_eq!(ep.grpc_authority(), "[::1]:4317");
    }

    #[test]
    fn bad_inputs_are_config_errors() {
        assert!(resolve_endpoint("ftp://nope", "", "").is_err());
        assert!(resolve_endpoint("host:notaport", "", "").is_err());
        assert!(resolve_endpoint("http://collector", "", "carrier-pigeon").is_err());
    }
}
