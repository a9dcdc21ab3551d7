// SPDX-License-Identifier: MIT
//! Execution scope for one export - deadline plus the accumulated error log.
//!
//! Every retry attempt that fails is recorded here with a wall-clock
//! timestamp and kept even when a later attempt succeeds, so a caller can
//! audit the full history instead of only the last error. The scope is an
//! explicit value threaded through `Start`/`UploadTraces`/`Stop` rather than
//! process-global state - concurrent sessions in one process (e.g. under
//! test) never cross-contaminate.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::error::OtlpError;

/// One failed attempt, with the wall-clock time it was observed.
#[derive(Debug, Clone)]
pub struct TimestampedError {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Deadline and error accumulator for a single export.
///
/// The deadline is measured from a caller-supplied origin (typically process
/// startup), not from the start of any individual call - a long-blocked
/// retry loop is still cut off at the original deadline.
#[derive(Debug)]
pub struct ExportScope {
    pub deadline: Instant,
    errors: Vec<TimestampedError>,
}

impl ExportScope {
    pub fn new(deadline: Instant) -> Self {
        Self {
            deadline,
            errors: Vec::new(),
        }
    }

    /// Scope whose deadline is `timeout` past `origin`.
    pub fn with_timeout(origin: Instant, timeout: Duration) -> Self {
        Self::new(origin + timeout)
    }

    /// Time left before the deadline, zero if already past.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Append a failed attempt to the log. Entries are never discarded.
    pub fn record(&mut self, err: &OtlpError) {
        self.errors.push(TimestampedError {
            at: Utc::now(),
            message: err.to_string(),
        });
    }

    pub fn errors(&self) -> &[TimestampedError] {
        &self.errors
    }
}
