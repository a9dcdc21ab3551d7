// SPDX-License-Identifier: MIT
//! W3C `traceparent` codec and carriers.
//!
//! The encoded form is `VV-TTTT…T-SSSS…S-FF` (2/32/16/2 hex digits). Values
//! travel in the `TRACEPARENT` environment variable or in a carrier file
//! that is simultaneously machine-readable and shell-`source`-able: a bare
//! value, optionally prefixed with `export ` or `TRACEPARENT=`, with
//! `#`-comment lines ignored.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};

use crate::error::OtlpError;
use crate::span::Span;

/// Environment variable carrying a traceparent between processes.
pub const TRACEPARENT_ENV: &str = "TRACEPARENT";

/// A parsed W3C trace context header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Traceparent {
    pub version: u8,
    pub trace_id: [u8; 16],
    pub span_id: [u8; 8],
    pub sampled: bool,
    /// Distinguishes "parsed successfully" from an absent/zero value.
    pub initialized: bool,
}

impl Default for Traceparent {
    fn default() -> Self {
        Self {
            version: 0,
            trace_id: [0; 16],
            span_id: [0; 8],
            sampled: false,
            initialized: false,
        }
    }
}

impl fmt::Display for Traceparent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags: u8 = if self.sampled { 0x01 } else { 0x00 };
        write!(
            f,
            "{:02x}-{}-{}-{:02x}",
            self.version,
            hex::encode(self.trace_id),
            hex::encode(self.span_id),
            flags
        )
    }
}

impl Traceparent {
    /// Parse the `VV-trace-span-flags` form.
    ///
    /// All-zero trace or span ids are rejected: a zero context is "absent",
    /// never a parse success.
    pub fn parse(raw: &str) -> Result<Self, OtlpError> {
        let raw = raw.trim();
        let parts: Vec<&str> = raw.split('-').collect();
        if parts.len() != 4 {
            return Err(OtlpError::Config(format!(
                "traceparent must have 4 fields, got {}",
                parts.len()
            )));
        }
        if parts[0].len() != 2 || parts[1].len() != 32 || parts[2].len() != 16 || parts[3].len() != 2
        {
            return Err(OtlpError::Config(format!(
                "malformed traceparent {raw:?}"
            )));
        }

        let version = decode_hex_byte(parts[0])?;
        if version == 0xff {
            return Err(OtlpError::Config("traceparent version 0xff is invalid".into()));
        }

        let mut trace_id = [0u8; 16];
        hex::decode_to_slice(parts[1], &mut trace_id)
            .map_err(|e| OtlpError::Config(format!("bad trace id: {e}")))?;
        let mut span_id = [0u8; 8];
        hex::decode_to_slice(parts[2], &mut span_id)
            .map_err(|e| OtlpError::Config(format!("bad span id: {e}")))?;
        let flags = decode_hex_byte(parts[3])?;

        if trace_id == [0; 16] || span_id == [0; 8] {
            return Err(OtlpError::Config("traceparent ids must be non-zero".into()));
        }

        Ok(Self {
            version,
            trace_id,
            span_id,
            sampled: flags & 0x01 == 0x01,
            initialized: true,
        })
    }

    /// Build a traceparent from a span's ids. Non-recording spans yield an
    /// uninitialized value.
    pub fn from_span(span: &Span) -> Self {
        Self {
            version: 0,
            trace_id: span.trace_id,
            span_id: span.span_id,
            sampled: true,
            initialized: span.is_recording(),
        }
    }

    /// Read from the `TRACEPARENT` environment variable.
    pub fn from_env() -> Option<Self> {
        let raw = std::env::var(TRACEPARENT_ENV).ok()?;
        Self::parse(&raw).ok()
    }

    /// Read from a carrier file.
    ///
    /// The first parseable line wins. Lines may be a bare value or carry an
    /// `export ` and/or `TRACEPARENT=` prefix; `#` comments and blank lines
    /// are skipped.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read traceparent carrier: {}", path.display()))?;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = line.strip_prefix("export ").unwrap_or(line).trim_start();
            let line = line.strip_prefix("TRACEPARENT=").unwrap_or(line);
            if let Ok(tp) = Self::parse(line) {
                return Ok(tp);
            }
        }
        anyhow::bail!(
            "no usable traceparent in carrier file {}",
            path.display()
        )
    }

    /// Environment first, file second.
    pub fn load_carrier(file: Option<&Path>) -> Option<Self> {
        if let Some(tp) = Self::from_env() {
            return Some(tp);
        }
        file.and_then(|p| Self::from_file(p).ok())
    }

    /// Write a carrier file that can be `source`d by a shell.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = format!(
            "# traceparent carrier file\n# trace id: {}\nexport TRACEPARENT={}\n",
            hex::encode(self.trace_id),
            self
        );
        std::fs::write(path, content)
            .with_context(|| format!("write traceparent carrier: {}", path.display()))
    }

    /// Propagate into a child span: the span joins this trace and records
    /// our span id as its parent.
    pub fn apply_to(&self, span: &mut Span) {
        if !self.initialized {
            return;
        }
        span.trace_id = self.trace_id;
        span.parent_span_id = Some(self.span_id);
    }
}

fn decode_hex_byte(s: &str) -> Result<u8, OtlpError> {
    u8::from_str_radix(s, 16).map_err(|e| OtlpError::Config(format!("bad hex byte {s:?}: {e}")))
}
