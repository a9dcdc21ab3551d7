// SPDX-License-Identifier: MIT
//! Error taxonomy for OTLP export.
//!
//! Four families matter to callers: configuration errors (fatal before any
//! network activity), transient transport errors (absorbed by the retry
//! engine), terminal transport errors (surfaced immediately), and partial
//! success (terminal per OTLP semantics even though some spans landed).

/// An error raised while resolving configuration or exporting spans.
#[derive(Debug, thiserror::Error)]
pub enum OtlpError {
    /// Bad endpoint URI, unknown protocol string, mismatched TLS cert/key
    /// pair, unparseable traceparent - anything wrong before dialing.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection establishment failed (dial, TLS handshake, protocol
    /// mismatch). Never retried - see the HTTP classifier.
    #[error("connection failed: {0}")]
    Connect(String),

    /// A transport-level failure after the connection was up. The retry
    /// engine decides whether to keep going based on the classifier, not
    /// this variant.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a non-success status.
    #[error("server rejected export ({code}): {message}")]
    Server { code: String, message: String },

    /// The server accepted the request but rejected some spans. Terminal,
    /// never retried.
    #[error("partial success: {rejected} span(s) rejected: {message}")]
    PartialSuccess { rejected: i64, message: String },

    /// The configured timeout elapsed before the export completed.
    #[error("deadline exceeded before export completed")]
    DeadlineExceeded,
}
