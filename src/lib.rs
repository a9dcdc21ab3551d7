// SPDX-License-Identifier: MIT
//! OTLP trace export core for command-line tools.
//!
//! A command-line invocation emits one OpenTelemetry span describing the
//! work it performed, without an in-process SDK. The pieces:
//!
//! - [`span`] - the in-memory span model;
//! - [`traceparent`] - the W3C trace context codec plus env/file carriers;
//! - [`endpoint`] / [`tls`] - resolution of configured endpoints into a
//!   normalized target and TLS policy;
//! - [`retry`] / [`scope`] - the deadline-bounded retry engine and the
//!   per-export error log;
//! - [`otlp`] - the gRPC, HTTP/protobuf, and Null transports behind one
//!   3-method contract;
//! - [`bgspan`] - the background span session: a single-span daemon on a
//!   Unix socket that sibling processes mutate and close over JSON-RPC.
//!
//! Flag parsing, config files, and output rendering live outside this
//! crate; they integrate through [`Config`], [`Span`], and the
//! [`otlp::OtlpClient`] contract.

#[cfg(unix)]
pub mod bgspan;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod otlp;
pub mod proto;
pub mod retry;
pub mod scope;
pub mod span;
pub mod tls;
pub mod traceparent;

pub use config::Config;
pub use endpoint::{resolve_endpoint, Endpoint, Protocol, Scheme};
pub use error::OtlpError;
pub use otlp::{client_for, resource_spans, OtlpClient};
pub use retry::{retry, Attempt};
pub use scope::{ExportScope, TimestampedError};
pub use span::{AttrValue, Span, SpanEvent, SpanKind, SpanStatus, StatusCode};
pub use tls::{resolve_tls, TlsPolicy};
pub use traceparent::Traceparent;
