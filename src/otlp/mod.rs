// SPDX-License-Identifier: MIT
//! OTLP transports behind one 3-method contract.
//!
//! `client_for` picks the implementation from resolved configuration: gRPC
//! for bare `host:port`, `grpc://`, and `unix://` targets (or when the
//! protocol override forces it), HTTP/protobuf for `http(s)://` targets,
//! and the Null transport when no endpoint is configured at all -
//! unconfigured mode is first-class and silent, never an error.

mod grpc;
mod http;
mod null;

pub use grpc::GrpcClient;
pub use http::HttpClient;
pub use null::NullClient;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::OtlpError;
use crate::proto::common::{any_value, AnyValue, InstrumentationScope, KeyValue};
use crate::proto::resource::Resource;
use crate::proto::trace;
use crate::scope::ExportScope;
use crate::span::{AttrValue, Span, SpanKind, StatusCode};

/// The transport contract: dial, upload, tear down.
///
/// All three methods must be callable in disabled mode; the Null transport
/// satisfies the contract without any I/O.
#[async_trait]
pub trait OtlpClient: Send {
    async fn start(&mut self, scope: &mut ExportScope) -> Result<(), OtlpError>;
    async fn upload_traces(
        &mut self,
        scope: &mut ExportScope,
        batch: Vec<trace::ResourceSpans>,
    ) -> Result<(), OtlpError>;
    async fn stop(&mut self, scope: &mut ExportScope) -> Result<(), OtlpError>;
}

/// Select a transport for the resolved configuration.
pub fn client_for(config: &Config) -> Result<Box<dyn OtlpClient>, OtlpError> {
    match config.resolve_endpoint()? {
        None => Ok(Box::new(NullClient)),
        Some(ep) if ep.is_grpc() => Ok(Box::new(GrpcClient::new(ep, config.clone()))),
        Some(ep) => Ok(Box::new(HttpClient::new(ep, config.clone()))),
    }
}

/// Wrap one span in the OTLP envelope under the configured service name.
pub fn resource_spans(span: &Span, service_name: &str) -> trace::ResourceSpans {
    trace::ResourceSpans {
        resource: Some(Resource {
            attributes: vec![KeyValue {
                key: "service.name".into(),
                value: Some(AnyValue {
                    value: Some(any_value::Value::StringValue(service_name.into())),
                }),
            }],
            dropped_attributes_count: 0,
        }),
        scope_spans: vec![trace::ScopeSpans {
            scope: Some(InstrumentationScope {
                name: "otel-cli".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                attributes: Vec::new(),
                dropped_attributes_count: 0,
            }),
            spans: vec![proto_span(span)],
            schema_url: String::new(),
        }],
        schema_url: String::new(),
    }
}

fn proto_span(span: &Span) -> trace::Span {
    trace::Span {
        trace_id: span.trace_id.to_vec(),
        span_id: span.span_id.to_vec(),
        trace_state: String::new(),
        parent_span_id: span
            .parent_span_id
            .map(|id| id.to_vec())
            .unwrap_or_default(),
        name: span.name.clone(),
        kind: proto_kind(span.kind) as i32,
        start_time_unix_nano: span.start_unix_nano,
        end_time_unix_nano: span.end_unix_nano,
        attributes: key_values(&span.attributes),
        dropped_attributes_count: 0,
        events: span
            .events
            .iter()
            .map(|ev| trace::span::Event {
                time_unix_nano: ev.time_unix_nano,
                name: ev.name.clone(),
                attributes: key_values(&ev.attributes),
                dropped_attributes_count: 0,
            })
            .collect(),
        dropped_events_count: 0,
        links: Vec::new(),
        dropped_links_count: 0,
        status: Some(trace::Status {
            message: span.status.message.clone(),
            code: proto_status(span.status.code) as i32,
        }),
    }
}

fn key_values(attrs: &[(String, AttrValue)]) -> Vec<KeyValue> {
    attrs
        .iter()
        .map(|(k, v)| KeyValue {
            key: k.clone(),
            value: Some(AnyValue {
                value: Some(match v {
                    AttrValue::Str(s) => any_value::Value::StringValue(s.clone()),
                    AttrValue::Int(i) => any_value::Value::IntValue(*i),
                    AttrValue::Float(f) => any_value::Value::DoubleValue(*f),
                    AttrValue::Bool(b) => any_value::Value::BoolValue(*b),
                }),
            }),
        })
        .collect()
}

fn proto_kind(kind: SpanKind) -> trace::span::SpanKind {
    match kind {
        SpanKind::Unspecified => trace::span::SpanKind::Unspecified,
        SpanKind::Internal => trace::span::SpanKind::Internal,
        SpanKind::Server => trace::span::SpanKind::Server,
        SpanKind::Client => trace::span::SpanKind::Client,
        SpanKind::Producer => trace::span::SpanKind::Producer,
        SpanKind::Consumer => trace::span::SpanKind::Consumer,
    }
}

fn proto_status(code: StatusCode) -> trace::status::StatusCode {
    match code {
        StatusCode::Unset => trace::status::StatusCode::Unset,
        StatusCode::Ok => trace::status::StatusCode::Ok,
        StatusCode::Error => trace::status::StatusCode::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::SpanEvent;
    use std::time::{Duration, Instant};

    #[test]
    fn selection_prefers_null_when_unconfigured() {
        // Just verifies the selection path; the Null transport itself is
        // exercised below.
        assert!(client_for(&Config::default()).is_ok());
        assert!(client_for(&Config::default().with_endpoint("localhost:4317")).is_ok());
        assert!(client_for(&Config::default().with_endpoint("http://c:4318")).is_ok());
        assert!(client_for(&Config::default().with_endpoint("ftp://c")).is_err());
    }

    #[tokio::test]
    async fn null_transport_round_trip_never_errors() {
        let mut client = client_for(&Config::default()).unwrap();
        let mut scope = ExportScope::with_timeout(Instant::now(), Duration::from_secs(1));
        client.start(&mut scope).await.unwrap();
        client
            .upload_traces(&mut scope, vec![resource_spans(&Span::non_recording(), "t")])
            .await
            .unwrap();
        client.stop(&mut scope).await.unwrap();
        assert!(scope.errors().is_empty());
    }

    #[test]
    fn envelope_carries_service_name_and_events() {
        let mut span = Span::new("work", SpanKind::Client);
        span.set_attr("k", AttrValue::Int(7));
        span.add_event(SpanEvent::new("checkpoint"));
        span.end(StatusCode::Ok, "");

        let rs = resource_spans(&span, "my-service");
        let resource = rs.resource.as_ref().unwrap();
        assert_eq!(resource.attributes[0].key, "service.name");

        let proto = &rs.scope_spans[0].spans[0];
        assert_eq!(proto.trace_id.len(), 16);
        assert_eq!(proto.span_id.len(), 8);
        assert_eq!(proto.kind, trace::span::SpanKind::Client as i32);
        assert_eq!(proto.events.len(), 1);
        assert_eq!(proto.events[0].name, "checkpoint");
        assert_eq!(
            proto.status.as_ref().unwrap().code,
            trace::status::StatusCode::Ok as i32
        );
        assert!(proto.end_time_unix_nano >= proto.start_time_unix_nano);
    }

    #[test]
    fn root_span_has_empty_parent() {
        let span = Span::new("root", SpanKind::Internal);
        let rs = resource_spans(&span, "t");
        assert!(rs.scope_spans[0].spans[0].parent_span_id.is_empty());
    }
}
