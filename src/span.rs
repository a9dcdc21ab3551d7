// SPDX-License-Identifier: MIT
//! In-memory span model - ids, timing, attributes, status, and events.
//!
//! One `Span` describes one unit of traced work. It is mutated in place
//! while open (attributes and events appended), becomes effectively
//! immutable once handed to a transport, and is discarded after upload.

use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::error::OtlpError;

// ─── Typed attribute values ──────────────────────────────────────────────────

/// A typed attribute value: string, int64, float64, or bool.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl AttrValue {
    /// Sniff a string into the narrowest matching type.
    ///
    /// Attribute values arrive as strings from every surface (CLI flags,
    /// background-session events), so `"9000"` becomes an int, `"1.5"` a
    /// float, `"true"` a bool, and anything else stays a string.
    pub fn sniff(raw: &str) -> Self {
        if let Ok(i) = raw.parse::<i64>() {
            return AttrValue::Int(i);
        }
        if let Ok(f) = raw.parse::<f64>() {
            return AttrValue::Float(f);
        }
        match raw {
            "true" => AttrValue::Bool(true),
            "false" => AttrValue::Bool(false),
            _ => AttrValue::Str(raw.to_string()),
        }
    }
}

/// Parse a list of `key=value` strings into typed attributes.
///
/// A missing `=` yields an empty string value. Later duplicates win.
pub fn parse_attrs<I, S>(pairs: I) -> Vec<(String, AttrValue)>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<(String, AttrValue)> = Vec::new();
    for pair in pairs {
        let pair = pair.as_ref();
        let (key, value) = match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), AttrValue::sniff(v)),
            None => (pair.to_string(), AttrValue::Str(String::new())),
        };
        if let Some(slot) = out.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            out.push((key, value));
        }
    }
    out
}

// ─── Kind and status ─────────────────────────────────────────────────────────

/// OTLP span kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpanKind {
    #[default]
    Unspecified,
    Internal,
    Client,
    Server,
    Producer,
    Consumer,
}

impl std::str::FromStr for SpanKind {
    type Err = OtlpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unspecified" | "" => Ok(SpanKind::Unspecified),
            "internal" => Ok(SpanKind::Internal),
            "client" => Ok(SpanKind::Client),
            "server" => Ok(SpanKind::Server),
            "producer" => Ok(SpanKind::Producer),
            "consumer" => Ok(SpanKind::Consumer),
            other => Err(OtlpError::Config(format!("unknown span kind {other:?}"))),
        }
    }
}

/// OTLP span status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusCode {
    #[default]
    Unset,
    Ok,
    Error,
}

impl std::str::FromStr for StatusCode {
    type Err = OtlpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unset" | "" => Ok(StatusCode::Unset),
            "ok" => Ok(StatusCode::Ok),
            "error" => Ok(StatusCode::Error),
            other => Err(OtlpError::Config(format!("unknown status code {other:?}"))),
        }
    }
}

/// Final status of a span.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpanStatus {
    pub code: StatusCode,
    pub message: String,
}

// ─── Events ──────────────────────────────────────────────────────────────────

/// A timestamped event attached to a span.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanEvent {
    pub name: String,
    pub time_unix_nano: u64,
    pub attributes: Vec<(String, AttrValue)>,
}

impl SpanEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            time_unix_nano: now_unix_nano(),
            attributes: Vec::new(),
        }
    }
}

// ─── Span ────────────────────────────────────────────────────────────────────

/// One unit of traced work.
///
/// Invariant: `trace_id` and `span_id` are either both all-zero (the
/// non-recording placeholder) or both non-zero values of the correct byte
/// length. Once closed, `end_unix_nano >= start_unix_nano`.
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub trace_id: [u8; 16],
    pub span_id: [u8; 8],
    pub parent_span_id: Option<[u8; 8]>,
    pub name: String,
    pub kind: SpanKind,
    pub start_unix_nano: u64,
    pub end_unix_nano: u64,
    pub attributes: Vec<(String, AttrValue)>,
    pub status: SpanStatus,
    pub events: Vec<SpanEvent>,
}

impl Span {
    /// Create a recording span with fresh random ids, started now.
    pub fn new(name: impl Into<String>, kind: SpanKind) -> Self {
        Self {
            trace_id: random_trace_id(),
            span_id: random_span_id(),
            parent_span_id: None,
            name: name.into(),
            kind,
            start_unix_nano: now_unix_nano(),
            end_unix_nano: 0,
            attributes: Vec::new(),
            status: SpanStatus::default(),
            events: Vec::new(),
        }
    }

    /// The all-zero non-recording placeholder.
    pub fn non_recording() -> Self {
        Self {
            trace_id: [0; 16],
            span_id: [0; 8],
            parent_span_id: None,
            name: String::new(),
            kind: SpanKind::Unspecified,
            start_unix_nano: 0,
            end_unix_nano: 0,
            attributes: Vec::new(),
            status: SpanStatus::default(),
            events: Vec::new(),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.trace_id != [0; 16] && self.span_id != [0; 8]
    }

    pub fn trace_id_hex(&self) -> String {
        hex::encode(self.trace_id)
    }

    pub fn span_id_hex(&self) -> String {
        hex::encode(self.span_id)
    }

    /// Set or replace an attribute.
    pub fn set_attr(&mut self, key: impl Into<String>, value: AttrValue) {
        let key = key.into();
        if let Some(slot) = self.attributes.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.attributes.push((key, value));
        }
    }

    pub fn add_event(&mut self, event: SpanEvent) {
        self.events.push(event);
    }

    /// Close the span: record final status and the end timestamp, clamped
    /// so it never precedes the start.
    pub fn end(&mut self, code: StatusCode, message: impl Into<String>) {
        self.status = SpanStatus {
            code,
            message: message.into(),
        };
        self.end_unix_nano = now_unix_nano().max(self.start_unix_nano);
    }

    pub fn is_ended(&self) -> bool {
        self.end_unix_nano != 0
    }
}

/// Nanoseconds since the UNIX epoch, by wall clock.
pub fn now_unix_nano() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

fn random_trace_id() -> [u8; 16] {
    // A v4 uuid is 122 random bits with fixed version/variant bits, so the
    // result is never all-zero.
    *Uuid::new_v4().as_bytes()
}

fn random_span_id() -> [u8; 8] {
    // First half of a v4 uuid; byte 6 carries the version nibble, so the
    // prefix is never all-zero either.
    let bytes = *Uuid::new_v4().as_bytes();
    let mut id = [0u8; 8];
    id.copy_from_slice(&bytes[..8]);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn new_span_has_nonzero_ids() {
        let span = Span::new("work", SpanKind::Client);
        assert!(span.is_recording());
        assert_ne!(span.trace_id, [0; 16]);
        assert_ne!(span.span_id, [0; 8]);
        assert_eq!(span.trace_id_hex().len(), 32);
        assert_eq!(span.span_id_hex().len(), 16);
    }

    #[test]
    fn non_recording_is_all_zero() {
        let span = Span::non_recording();
        assert!(!span.is_recording());
    }

    #[test]
    fn end_never_precedes_start() {
        let mut span = Span::new("work", SpanKind::Internal);
        // Force a start in the future; the clamp keeps end >= start.
        span.start_unix_nano = now_unix_nano() + 1_000_000_000;
        span.end(StatusCode::Ok, "");
        assert!(span.end_unix_nano >= span.start_unix_nano);
    }

    #[test]
    fn attr_sniffing() {
        assert_eq!(AttrValue::sniff("9000"), AttrValue::Int(9000));
        assert_eq!(AttrValue::sniff("1.5"), AttrValue::Float(1.5));
        assert_eq!(AttrValue::sniff("true"), AttrValue::Bool(true));
        assert_eq!(AttrValue::sniff("false"), AttrValue::Bool(false));
        assert_eq!(AttrValue::sniff("hello"), AttrValue::Str("hello".into()));
        // Leading-zero and signed forms still parse as ints.
        assert_eq!(AttrValue::sniff("-3"), AttrValue::Int(-3));
    }

    #[test]
    fn parse_attrs_last_duplicate_wins() {
        let attrs = parse_attrs(["k=1", "k=2", "flag"]);
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0], ("k".into(), AttrValue::Int(2)));
        assert_eq!(attrs[1], ("flag".into(), AttrValue::Str(String::new())));
    }

    #[test]
    fn kind_and_status_parsing() {
        assert_eq!(SpanKind::from_str("server").unwrap(), SpanKind::Server);
        assert_eq!(SpanKind::from_str("").unwrap(), SpanKind::Unspecified);
        assert!(SpanKind::from_str("bogus").is_err());
        assert_eq!(StatusCode::from_str("error").unwrap(), StatusCode::Error);
        assert!(StatusCode::from_str("fine").is_err());
    }

    #[test]
    fn set_attr_replaces() {
        let mut span = Span::new("work", SpanKind::Internal);
        span.set_attr("k", AttrValue::Int(1));
        span.set_attr("k", AttrValue::Int(2));
        assert_eq!(span.attributes.len(), 1);
        assert_eq!(span.attributes[0].1, AttrValue::Int(2));
    }
}
