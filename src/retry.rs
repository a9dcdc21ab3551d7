// SPDX-License-Identifier: MIT
//! Deadline-bounded retry for transport calls.
//!
//! Protocol-agnostic: the caller's closure runs one attempt and classifies
//! the outcome as [`Attempt`]; this loop only decides whether to sleep and
//! try again. Between attempts it sleeps the server-suggested wait when one
//! was given, otherwise a linearly increasing backoff starting at zero and
//! growing by [`BACKOFF_STEP`] per attempt, capped at [`BACKOFF_CAP`]. The
//! loop never sleeps past the scope deadline and returns the last error once
//! the deadline is exceeded.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::OtlpError;
use crate::scope::ExportScope;

/// Linear backoff increment applied after each attempt without a
/// server-suggested wait.
pub const BACKOFF_STEP: Duration = Duration::from_millis(250);

/// Upper bound on the computed backoff.
pub const BACKOFF_CAP: Duration = Duration::from_secs(5);

/// Classified outcome of one transport attempt.
#[derive(Debug)]
pub enum Attempt {
    /// The attempt succeeded; stop immediately.
    Done,
    /// Transient failure - try again. `wait` is a server-suggested delay
    /// (e.g. gRPC RetryInfo); `None` falls back to linear backoff.
    Retry {
        wait: Option<Duration>,
        err: OtlpError,
    },
    /// Terminal failure - stop and surface the error.
    Fatal(OtlpError),
}

/// Run `attempt` until it succeeds, fails terminally, or the scope deadline
/// would be crossed by the next sleep.
///
/// Every failed attempt is recorded into the scope's error log with a
/// timestamp, including attempts that precede an eventual success.
pub async fn retry<F, Fut>(scope: &mut ExportScope, mut attempt: F) -> Result<(), OtlpError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt>,
{
    let mut backoff = Duration::ZERO;
    let mut tries: u32 = 0;

    loop {
        if scope.expired() {
            return Err(OtlpError::DeadlineExceeded);
        }

        tries += 1;
        match attempt().await {
            Attempt::Done => {
                if tries > 1 {
                    debug!(tries, "retry succeeded");
                }
                return Ok(());
            }
            Attempt::Fatal(err) => {
                scope.record(&err);
                warn!(tries, err = %err, "terminal transport error");
                return Err(err);
            }
            Attempt::Retry { wait, err } => {
                scope.record(&err);

                let sleep_for = match wait {
                    Some(w) if w > Duration::ZERO => w,
                    _ => {
                        let current = backoff;
                        backoff = (backoff + BACKOFF_STEP).min(BACKOFF_CAP);
                        current
                    }
                };

                if sleep_for >= scope.remaining() {
                    warn!(tries, err = %err, "deadline reached - giving up");
                    return Err(err);
                }

                warn!(
                    tries,
                    sleep_ms = sleep_for.as_millis() as u64,
                    err = %err,
                    "attempt failed - retrying"
                );
                tokio::time::sleep(sleep_for).await;
            }
        }
    }
}
