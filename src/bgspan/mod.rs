// SPDX-License-Identifier: MIT
//! Background span session - one long-lived process holds one open span so
//! sibling invocations in the same shell pipeline can add events to it and
//! end it.
//!
//! Wire format: line-delimited JSON-RPC 2.0 over a Unix domain socket at a
//! well-known filename inside a configured directory. Methods:
//! `BgSpan.AddEvent`, `BgSpan.End`, and `BgSpan.Wait` (a no-op whose only
//! purpose is to block a caller until the socket is accepting connections).

pub mod client;
pub mod server;

pub use client::BgClient;
pub use server::{run, BgOptions};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known socket filename inside the session directory. One session per
/// socket path.
pub const SOCKET_FILE: &str = "otel-cli-background.sock";

pub const METHOD_ADD_EVENT: &str = "BgSpan.AddEvent";
pub const METHOD_END: &str = "BgSpan.End";
pub const METHOD_WAIT: &str = "BgSpan.Wait";

// ─── JSON-RPC 2.0 types ──────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct RpcRequest {
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct RpcError {
    pub code: i32,
    pub message: String,
}

pub(crate) const PARSE_ERROR: i32 = -32700;
pub(crate) const INVALID_REQUEST: i32 = -32600;
pub(crate) const METHOD_NOT_FOUND: i32 = -32601;
pub(crate) const INVALID_PARAMS: i32 = -32602;

pub(crate) fn ok_response(id: Value, result: Value) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0".into(),
        id,
        result: Some(result),
        error: None,
    }
}

pub(crate) fn error_response(id: Value, code: i32, message: impl Into<String>) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0".into(),
        id,
        result: None,
        error: Some(RpcError {
            code,
            message: message.into(),
        }),
    }
}

// ─── Method payloads ─────────────────────────────────────────────────────────

/// Parameters of `BgSpan.AddEvent`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AddEventParams {
    pub name: String,
    /// Event timestamp; the server's clock when absent.
    pub time_unix_nano: Option<u64>,
    /// String attribute values, sniffed into typed values server-side.
    pub attributes: BTreeMap<String, String>,
}

/// Parameters of `BgSpan.End`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndParams {
    /// `"unset"`, `"ok"`, or `"error"`; unset when absent.
    pub status_code: Option<String>,
    pub status_description: Option<String>,
}

/// Reply shape shared by `AddEvent` and `End`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SpanReply {
    pub trace_id: String,
    pub span_id: String,
    pub traceparent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_omits_empty_fields() {
        let ok = ok_response(Value::from(1), serde_json::json!({}));
        let json = serde_json::to_string(&ok).unwrap();
        assert!(!json.contains("error"));

        let err = error_response(Value::from(2), METHOD_NOT_FOUND, "no such method");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("-32601"));
        assert!(!json.contains("result"));
    }

    #[test]
    fn add_event_params_default_cleanly() {
        let p: AddEventParams = serde_json::from_str(r#"{"name":"x"}"#).unwrap();
        assert_eq!(p.name, "x");
        assert!(p.time_unix_nano.is_none());
        assert!(p.attributes.is_empty());
    }
}
