// SPDX-License-Identifier: MIT
//! Export configuration - the contract the CLI layer fills in.
//!
//! Flag parsing, environment loading, and JSON config files live outside
//! this crate; whatever produces a `Config`, the core only reads it. The
//! soft-fail switch decides whether export failures are reported and
//! swallowed or propagated to the caller.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::endpoint::{resolve_endpoint, Endpoint};
use crate::error::OtlpError;

const DEFAULT_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_SERVICE_NAME: &str = "otel-cli";

/// Settings consumed by the transports, resolvers, and background session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General OTLP endpoint (any signal).
    pub endpoint: String,
    /// Traces-specific endpoint; wins over `endpoint` when set and is used
    /// exactly as given.
    pub traces_endpoint: String,
    /// Explicit protocol override: `"grpc"`, `"http/protobuf"`, or empty
    /// for scheme sniffing.
    pub protocol: String,
    /// `service.name` resource attribute on exported spans.
    pub service_name: String,
    /// Export deadline, measured from process startup.
    #[serde(with = "duration_ms", rename = "timeout_ms")]
    pub timeout: Duration,
    /// Extra request headers/metadata sent with every export.
    pub headers: BTreeMap<String, String>,
    /// Force plaintext regardless of scheme or host.
    pub insecure: bool,
    /// Skip server certificate verification.
    pub tls_no_verify: bool,
    /// Path to a PEM CA bundle; empty means the system trust store.
    pub tls_ca_cert: String,
    /// Paths to a PEM client certificate and key; both or neither.
    pub tls_client_cert: String,
    pub tls_client_key: String,
    /// Report export failures and carry on instead of surfacing them.
    pub soft_fail: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            traces_endpoint: String::new(),
            protocol: String::new(),
            service_name: DEFAULT_SERVICE_NAME.into(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            headers: BTreeMap::new(),
            insecure: false,
            tls_no_verify: false,
            tls_ca_cert: String::new(),
            tls_client_cert: String::new(),
            tls_client_key: String::new(),
            soft_fail: false,
        }
    }
}

impl Config {
    /// Resolve the configured endpoint strings. `None` means disabled mode.
    pub fn resolve_endpoint(&self) -> Result<Option<Endpoint>, OtlpError> {
        resolve_endpoint(&self.endpoint, &self.traces_endpoint, &self.protocol)
    }

    /// True when no endpoint is configured at all.
    pub fn is_disabled(&self) -> bool {
        self.endpoint.trim().is_empty() && self.traces_endpoint.trim().is_empty()
    }

    /// Soft-fail reporting hook: log the failure; tell the caller whether
    /// to swallow it (`true`) or propagate (`false`).
    pub fn report_failure(&self, err: &OtlpError) -> bool {
        if self.soft_fail {
            warn!(err = %err, "span export failed (soft-fail - continuing)");
        } else {
            error!(err = %err, "span export failed");
        }
        self.soft_fail
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_traces_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.traces_endpoint = endpoint.into();
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = Config::default();
        assert!(cfg.is_disabled());
        assert_eq!(cfg.timeout, Duration::from_millis(1_000));
        assert_eq!(cfg.service_name, "otel-cli");
        assert!(cfg.resolve_endpoint().unwrap().is_none());
    }

    #[test]
    fn serde_round_trip() {
        let cfg = Config::default()
            .with_endpoint("http://collector:4318")
            .with_timeout(Duration::from_millis(2_500))
            .with_header("authorization", "Bearer t");
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"timeout_ms\":2500"));
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.timeout, Duration::from_millis(2_500));
        assert_eq!(back.headers["authorization"], "Bearer t");
    }

    #[test]
    fn empty_json_uses_defaults() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert!(cfg.is_disabled());
        assert!(!cfg.soft_fail);
    }
}
