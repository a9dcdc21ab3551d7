// SPDX-License-Identifier: MIT
//! OTLP/gRPC transport - `TraceService/Export` over tonic.
//!
//! Status classification follows the OTLP spec: `Aborted`, `Cancelled`,
//! `DataLoss`, `DeadlineExceeded`, `OutOfRange`, and `Unavailable` are
//! retriable; `ResourceExhausted` is retriable only when the server attaches
//! an explicit `RetryInfo` delay; everything else is final. A success
//! response is always final, even when its partial-success payload reports
//! rejected spans.

use std::time::Duration;

use prost::Message;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint as TonicEndpoint, Identity};
use tonic::{Code, Request, Status};
use tracing::{debug, warn};

use crate::config::Config;
use crate::endpoint::{Endpoint, Scheme};
use crate::error::OtlpError;
use crate::proto::collector::trace_service_client::TraceServiceClient;
use crate::proto::collector::ExportTraceServiceRequest;
use crate::proto::{rpc, trace};
use crate::retry::{retry, Attempt};
use crate::scope::ExportScope;
use crate::tls::resolve_tls;

use super::OtlpClient;

pub struct GrpcClient {
    endpoint: Endpoint,
    config: Config,
    client: Option<TraceServiceClient<Channel>>,
}

impl GrpcClient {
    pub fn new(endpoint: Endpoint, config: Config) -> Self {
        Self {
            endpoint,
            config,
            client: None,
        }
    }

    async fn dial(&self, scope: &ExportScope) -> Result<Channel, OtlpError> {
        if self.endpoint.scheme == Scheme::Unix {
            return self.dial_unix().await;
        }

        let policy = resolve_tls(&self.config, &self.endpoint).await?;
        let scheme = if policy.plaintext { "http" } else { "https" };
        let uri = format!("{scheme}://{}", self.endpoint.grpc_authority());

        let mut ep = TonicEndpoint::from_shared(uri.clone())
            .map_err(|e| OtlpError::Config(format!("bad gRPC target {uri:?}: {e}")))?
            .connect_timeout(scope.remaining())
            .timeout(self.config.timeout);

        if !policy.plaintext {
            let mut tls = ClientTlsConfig::new().with_native_roots();
            if let Some(ca) = &policy.ca_pem {
                tls = tls.ca_certificate(Certificate::from_pem(ca));
            }
            if let Some((cert, key)) = &policy.identity_pem {
                tls = tls.identity(Identity::from_pem(cert, key));
            }
            if policy.no_verify {
                // tonic's rustls integration has no verification-skip knob;
                // the connection still verifies against the configured roots.
                warn!("tls_no_verify is not supported on the gRPC transport - verifying anyway");
            }
            ep = ep
                .tls_config(tls)
                .map_err(|e| OtlpError::Config(format!("TLS configuration: {e}")))?;
        }

        debug!(target = %uri, "dialing OTLP/gRPC");
        tokio::time::timeout(scope.remaining(), ep.connect())
            .await
            .map_err(|_| OtlpError::DeadlineExceeded)?
            .map_err(|e| OtlpError::Connect(format!("dial {uri}: {e}")))
    }

    #[cfg(unix)]
    async fn dial_unix(&self) -> Result<Channel, OtlpError> {
        use hyper_util::rt::TokioIo;
        use tower::service_fn;

        let path = self.endpoint.path.clone();
        debug!(path = %path, "dialing OTLP/gRPC over unix socket");
        // The URI is ignored by the connector; tonic still requires one.
        TonicEndpoint::from_static("http://localhost")
            .connect_with_connector(service_fn(move |_| {
                let path = path.clone();
                async move {
                    Ok::<_, std::io::Error>(TokioIo::new(
                        tokio::net::UnixStream::connect(path).await?,
                    ))
                }
            }))
            .await
            .map_err(|e| OtlpError::Connect(format!("dial unix://{}: {e}", self.endpoint.path)))
    }

    #[cfg(not(unix))]
    async fn dial_unix(&self) -> Result<Channel, OtlpError> {
        Err(OtlpError::Config(
            "unix socket endpoints are only supported on unix platforms".into(),
        ))
    }

    fn metadata(&self) -> Result<tonic::metadata::MetadataMap, OtlpError> {
        let mut meta = tonic::metadata::MetadataMap::new();
        for (k, v) in &self.config.headers {
            let key: tonic::metadata::MetadataKey<_> = k
                .parse()
                .map_err(|_| OtlpError::Config(format!("bad header name {k:?}")))?;
            let value = v
                .parse()
                .map_err(|_| OtlpError::Config(format!("bad header value for {k:?}")))?;
            meta.insert(key, value);
        }
        Ok(meta)
    }
}

#[async_trait::async_trait]
impl OtlpClient for GrpcClient {
    async fn start(&mut self, scope: &mut ExportScope) -> Result<(), OtlpError> {
        let channel = self.dial(scope).await?;
        self.client = Some(TraceServiceClient::new(channel));
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
        let meta = self.metadata()?;
        let payload = ExportTraceServiceRequest {
            resource_spans: batch,
        };
        let deadline = scope.deadline;

        retry(scope, move || {
            let mut client = client.clone();
            let meta = meta.clone();
            let payload = payload.clone();
            async move {
                let mut req = Request::new(payload);
                *req.metadata_mut() = meta;

                let remaining = deadline.saturating_duration_since(std::time::Instant::now());
                let outcome = match tokio::time::timeout(remaining, client.export(req)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        return Attempt::Retry {
                            wait: None,
                            err: OtlpError::DeadlineExceeded,
                        }
                    }
                };

                match outcome {
                    Ok(resp) => match resp.into_inner().partial_success {
                        Some(ps) if ps.rejected_spans > 0 || !ps.error_message.is_empty() => {
                            Attempt::Fatal(OtlpError::PartialSuccess {
                                rejected: ps.rejected_spans,
                                message: ps.error_message,
                            })
                        }
                        _ => Attempt::Done,
                    },
                    Err(status) => {
                        let (keep_going, wait) = classify_status(&status);
                        let err = OtlpError::Server {
                            code: format!("{:?}", status.code()),
                            message: status.message().to_string(),
                        };
                        if keep_going {
                            Attempt::Retry { wait, err }
                        } else {
                            Attempt::Fatal(err)
                        }
                    }
                }
            }
        })
        .await
    }

    async fn stop(&mut self, _scope: &mut ExportScope) -> Result<(), OtlpError> {
        self.client = None;
        Ok(())
    }
}

/// Map a gRPC status onto (keep-going, server-suggested wait).
pub(crate) fn classify_status(status: &Status) -> (bool, Option<Duration>) {
    match status.code() {
        Code::Aborted
        | Code::Cancelled
        | Code::DataLoss
        | Code::DeadlineExceeded
        | Code::OutOfRange
        | Code::Unavailable => (true, None),
        Code::ResourceExhausted => match retry_delay(status) {
            Some(delay) => (true, Some(delay)),
            None => (false, None),
        },
        _ => (false, None),
    }
}

/// Pull a `RetryInfo` delay out of `grpc-status-details-bin`, if present.
fn retry_delay(status: &Status) -> Option<Duration> {
    let details = status.details();
    if details.is_empty() {
        return None;
    }
    let rich = rpc::Status::decode(details).ok()?;
    for any in rich.details {
        if !any.type_url.ends_with(rpc::RETRY_INFO_TYPE_URL) {
            continue;
        }
        let info = rpc::RetryInfo::decode(any.value.as_slice()).ok()?;
        let delay = info.retry_delay?;
        if delay.seconds < 0 || delay.nanos < 0 {
            return None;
        }
        return Some(Duration::new(delay.seconds as u64, delay.nanos as u32));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::bytes::Bytes;

    fn exhausted_with_retry_info(delay: Option<prost_types::Duration>) -> Status {
        let details = match delay {
            Some(d) => vec![prost_types::Any {
                type_url: "type.googleapis.com/google.rpc.RetryInfo".into(),
                value: rpc::RetryInfo {
                    retry_delay: Some(d),
                }
                .encode_to_vec(),
            }],
            None => Vec::new(),
        };
        let rich = rpc::Status {
            code: Code::ResourceExhausted as i32,
            message: "slow down".into(),
            details,
        };
        Status::with_details(
            Code::ResourceExhausted,
            "slow down",
            Bytes::from(rich.encode_to_vec()),
        )
    }

    #[test]
    fn transient_codes_are_retriable_without_wait() {
        for code in [
            Code::Aborted,
            Code::Cancelled,
            Code::DataLoss,
            Code::DeadlineExceeded,
            Code::OutOfRange,
            Code::Unavailable,
        ] {
            let (keep, wait) = classify_status(&Status::new(code, "x"));
            assert!(keep, "{code:?} should be retriable");
            assert!(wait.is_none());
        }
    }

    #[test]
    fn terminal_codes_are_final() {
        for code in [
            Code::InvalidArgument,
            Code::Unauthenticated,
            Code::PermissionDenied,
            Code::Internal,
            Code::Unimplemented,
        ] {
            let (keep, _) = classify_status(&Status::new(code, "x"));
            assert!(!keep, "{code:?} should be final");
        }
    }

    #[test]
    fn resource_exhausted_without_retry_info_is_final() {
        let status = Status::new(Code::ResourceExhausted, "slow down");
        assert_eq!(classify_status(&status), (false, None));
        // Details present but carrying no RetryInfo: still final.
        let status = exhausted_with_retry_info(None);
        assert_eq!(classify_status(&status), (false, None));
    }

    #[test]
    fn resource_exhausted_with_retry_info_suggests_the_wait() {
        let status = exhausted_with_retry_info(Some(prost_types::Duration {
            seconds: 1,
            nanos: 0,
        }));
        let (keep, wait) = classify_status(&status);
        assert!(keep);
        assert_eq!(wait, Some(Duration::from_secs(1)));
    }

    #[test]
    fn negative_retry_delay_is_ignored() {
        let status = exhausted_with_retry_info(Some(prost_types::Duration {
            seconds: -1,
            nanos: 0,
        }));
        assert_eq!(classify_status(&status), (false, None));
    }
}
