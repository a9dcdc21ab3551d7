// SPDX-License-Identifier: MIT
//! OTLP/HTTP transport - protobuf POSTed to `<endpoint>/v1/traces`.
//!
//! Response classification: 2xx with a protobuf `ExportTraceServiceResponse`
//! body is success (partial success inside is still terminal, reported as an
//! error but never retried); 429/502/503/504 are retriable; 3xx and other
//! ≥400 codes are final; a 2xx whose content type is not exactly
//! `application/x-protobuf` is an out-of-spec server and final. Connection
//! establishment failures (dial, TLS handshake against a plaintext port) are
//! conservatively never retried.

use prost::Message;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use tracing::debug;

use crate::config::Config;
use crate::endpoint::Endpoint;
use crate::error::OtlpError;
use crate::proto::collector::{ExportTraceServiceRequest, ExportTraceServiceResponse};
use crate::proto::{rpc, trace};
use crate::retry::{retry, Attempt};
use crate::scope::ExportScope;
use crate::tls::resolve_tls;

use super::OtlpClient;

/// The one content type OTLP/HTTP speaks.
pub const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

pub struct HttpClient {
    endpoint: Endpoint,
    config: Config,
    client: Option<reqwest::Client>,
}

impl HttpClient {
    pub fn new(endpoint: Endpoint, config: Config) -> Self {
        Self {
            endpoint,
            config,
            client: None,
        }
    }

    fn headers(&self) -> Result<HeaderMap, OtlpError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(PROTOBUF_CONTENT_TYPE));
        for (k, v) in &self.config.headers {
            let name: HeaderName = k
                .parse()
                .map_err(|_| OtlpError::Config(format!("bad header name {k:?}")))?;
            let value: HeaderValue = v
                .parse()
                .map_err(|_| OtlpError::Config(format!("bad header value for {k:?}")))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

#[async_trait::async_trait]
impl OtlpClient for HttpClient {
    async fn start(&mut self, _scope: &mut ExportScope) -> Result<(), OtlpError> {
        let policy = resolve_tls(&self.config, &self.endpoint).await?;

        // Redirects stay visible so 3xx classifies as a final failure.
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none());

        if let Some(ca) = &policy.ca_pem {
            let cert = reqwest::Certificate::from_pem(ca)
                .map_err(|e| OtlpError::Config(format!("CA bundle: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        if let Some((cert, key)) = &policy.identity_pem {
            let mut combined = cert.clone();
            combined.push(b'\n');
            combined.extend_from_slice(key);
            let identity = reqwest::Identity::from_pem(&combined)
                .map_err(|e| OtlpError::Config(format!("client identity: {e}")))?;
            builder = builder.identity(identity);
        }
        if policy.no_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        self.client = Some(
            builder
                .build()
                .map_err(|e| OtlpError::Config(format!("HTTP client: {e}")))?,
        );
        Ok(())
    }

    async fn upload_traces(
        &mut self,
        scope: &mut ExportScope,
        batch: Vec<trace::ResourceSpans>,
    ) -> Result<(), OtlpError> {
        let client = self
            .client
            .clone()
            .ok_or_else(|| OtlpError::Transport("upload before start".into()))?;
        let headers = self.headers()?;
        let url = self.endpoint.http_url();
        let body = ExportTraceServiceRequest {
            resource_spans: batch,
        }
        .encode_to_vec();
        let deadline = scope.deadline;

        debug!(url = %url, bytes = body.len(), "posting OTLP/HTTP export");
        retry(scope, move || {
            let client = client.clone();
            let headers = headers.clone();
            let url = url.clone();
            let body = body.clone();
            async move {
                let remaining = deadline.saturating_duration_since(std::time::Instant::now());
                let sent = client
                    .post(&url)
                    .headers(headers)
                    .timeout(remaining)
                    .body(body)
                    .send()
                    .await;

                let resp = match sent {
                    Ok(resp) => resp,
                    // Dial/TLS/protocol-mismatch failures: final, no retry.
                    Err(e) => return Attempt::Fatal(OtlpError::Connect(e.to_string())),
                };

                let status = resp.status().as_u16();
                let content_type = resp
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                let bytes = match resp.bytes().await {
                    Ok(b) => b,
                    Err(e) => return Attempt::Fatal(OtlpError::Transport(e.to_string())),
                };

                process_response(status, &content_type, &bytes)
            }
        })
        .await
    }

    async fn stop(&mut self, _scope: &mut ExportScope) -> Result<(), OtlpError> {
        self.client = None;
        Ok(())
    }
}

/// Classify one HTTP response. Pure, so the table is testable without a
/// server.
pub(crate) fn process_response(status: u16, content_type: &str, body: &[u8]) -> Attempt {
    match status {
        200..=299 => {
            if content_type != PROTOBUF_CONTENT_TYPE {
                return Attempt::Fatal(OtlpError::Server {
                    code: status.to_string(),
                    message: format!("out-of-spec content type {content_type:?}"),
                });
            }
            match ExportTraceServiceResponse::decode(body) {
                Ok(resp) => match resp.partial_success {
                    Some(ps) if ps.rejected_spans > 0 || !ps.error_message.is_empty() => {
                        Attempt::Fatal(OtlpError::PartialSuccess {
                            rejected: ps.rejected_spans,
                            message: ps.error_message,
                        })
                    }
                    _ => Attempt::Done,
                },
                Err(e) => Attempt::Fatal(OtlpError::Transport(format!(
                    "malformed export response: {e}"
                ))),
            }
        }
        429 | 502 | 503 | 504 => Attempt::Retry {
            wait: None,
            err: OtlpError::Server {
                code: status.to_string(),
                message: body_message(content_type, body),
            },
        },
        _ => Attempt::Fatal(OtlpError::Server {
            code: status.to_string(),
            message: body_message(content_type, body),
        }),
    }
}

/// Best-effort extraction of a server-provided message from an error body.
fn body_message(content_type: &str, body: &[u8]) -> String {
    if body.is_empty() {
        return String::new();
    }
    if content_type == PROTOBUF_CONTENT_TYPE {
        if let Ok(status) = rpc::Status::decode(body) {
            if !status.message.is_empty() {
                return status.message;
            }
        }
    }
    let text = String::from_utf8_lossy(body);
    text.chars().take(256).collect()
}
