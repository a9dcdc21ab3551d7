// SPDX-License-Identifier: MIT
//! The session server - a single-span daemon on a Unix socket.
//!
//! State machine: Listening → Running → ShuttingDown → Stopped. Four
//! independent triggers race to begin shutdown: an explicit `BgSpan.End`
//! RPC, the configured timeout elapsing, a change of the OS parent pid
//! (the owning shell exited without calling end), and a terminating
//! signal. Shutdown runs at most once; the first timed trigger records a
//! synthetic event (`timeout` or `parent_exited`) carrying the elapsed
//! runtime so consumers can see why the session ended. After the listener
//! closes and in-flight RPCs drain, the span is uploaded exactly once.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::OtlpError;
use crate::otlp::{client_for, resource_spans};
use crate::scope::ExportScope;
use crate::span::{now_unix_nano, AttrValue, Span, SpanEvent, StatusCode};
use crate::traceparent::Traceparent;

use super::{
    error_response, ok_response, AddEventParams, EndParams, RpcRequest, RpcResponse, SpanReply,
    INVALID_PARAMS, INVALID_REQUEST, METHOD_ADD_EVENT, METHOD_END, METHOD_NOT_FOUND, METHOD_WAIT,
    PARSE_ERROR, SOCKET_FILE,
};

/// Tunables for one session.
#[derive(Debug, Clone)]
pub struct BgOptions {
    /// How long the session stays up without an explicit end. Zero disables
    /// the timeout trigger.
    pub timeout: Duration,
    /// How often the parent pid is polled. Zero disables the poll.
    pub parent_poll_interval: Duration,
}

impl Default for BgOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            parent_poll_interval: Duration::from_millis(500),
        }
    }
}

struct SessionState {
    span: Mutex<Span>,
    shutdown_started: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    started: Instant,
}

impl SessionState {
    /// Idempotent: the first caller wins, later calls are no-ops. A timed
    /// trigger names itself in a synthetic event before the span closes.
    async fn begin_shutdown(&self, trigger: Option<&'static str>) {
        if self.shutdown_started.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(name) = trigger {
            let mut span = self.span.lock().await;
            let mut ev = SpanEvent::new(name);
            ev.attributes.push((
                "otel-cli.runtime_ms".into(),
                AttrValue::Int(self.started.elapsed().as_millis() as i64),
            ));
            span.add_event(ev);
        }
        info!(trigger = trigger.unwrap_or("end"), "session shutting down");
        let _ = self.shutdown_tx.send(true);
    }
}

/// Run a background span session to completion and return the closed span.
///
/// Binds `otel-cli-background.sock` inside `sock_dir` (unlinking any stale
/// file first), serves RPCs until a shutdown trigger fires, drains in-flight
/// connections, uploads the span once, and removes the socket.
pub async fn run(config: Config, span: Span, sock_dir: &Path, opts: BgOptions) -> Result<Span> {
    let sock_path = sock_dir.join(SOCKET_FILE);
    match std::fs::remove_file(&sock_path) {
        Ok(()) => debug!(socket = %sock_path.display(), "removed stale socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("unlink stale socket {}", sock_path.display()))
        }
    }
    let listener = UnixListener::bind(&sock_path)
        .with_context(|| format!("bind session socket {}", sock_path.display()))?;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let state = Arc::new(SessionState {
        span: Mutex::new(span),
        shutdown_started: AtomicBool::new(false),
        shutdown_tx,
        started: Instant::now(),
    });
    {
        let span = state.span.lock().await;
        info!(
            socket = %sock_path.display(),
            trace_id = %span.trace_id_hex(),
            "background span session listening"
        );
    }

    let mut triggers = Vec::new();
    if opts.timeout > Duration::ZERO {
        let state = state.clone();
        let timeout = opts.timeout;
        triggers.push(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            state.begin_shutdown(Some("timeout")).await;
        }));
    }
    if opts.parent_poll_interval > Duration::ZERO {
        let state = state.clone();
        let interval = opts.parent_poll_interval;
        triggers.push(tokio::spawn(async move {
            let initial = unsafe { libc::getppid() };
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                if unsafe { libc::getppid() } != initial {
                    state.begin_shutdown(Some("parent_exited")).await;
                    break;
                }
            }
        }));
    }
    {
        let state = state.clone();
        triggers.push(tokio::spawn(async move {
            terminating_signal().await;
            state.begin_shutdown(None).await;
        }));
    }

    // Accept loop: one task per connection, all racing against shutdown.
    let mut connections: JoinSet<()> = JoinSet::new();
    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => break,

            conn = listener.accept() => {
                match conn {
                    Ok((stream, _)) => {
                        let state = state.clone();
                        let rx = state.shutdown_tx.subscribe();
                        connections.spawn(handle_connection(stream, state, rx));
                    }
                    Err(e) => {
                        error!(err = %e, "accept error");
                        continue;
                    }
                }
            }
        }
    }

    // Stop accepting, then let every in-flight RPC finish before upload.
    drop(listener);
    let _ = std::fs::remove_file(&sock_path);
    while connections.join_next().await.is_some() {}
    for t in triggers {
        t.abort();
    }

    let mut span = state.span.lock().await.clone();
    if !span.is_ended() {
        let code = span.status.code;
        let message = span.status.message.clone();
        span.end(code, message);
    }

    if let Err(err) = upload_span(&config, &span).await {
        if !config.report_failure(&err) {
            return Err(err.into());
        }
    }
    info!("background span session stopped");
    Ok(span)
}

async fn upload_span(config: &Config, span: &Span) -> Result<(), OtlpError> {
    let mut scope = ExportScope::with_timeout(Instant::now(), config.timeout);
    let mut client = client_for(config)?;
    client.start(&mut scope).await?;
    client
        .upload_traces(&mut scope, vec![resource_spans(span, &config.service_name)])
        .await?;
    client.stop(&mut scope).await
}

async fn handle_connection(
    stream: UnixStream,
    state: Arc<SessionState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        if *shutdown_rx.borrow_and_update() {
            break;
        }
        let line = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            line = lines.next_line() => match line {
                Ok(Some(l)) => l,
                Ok(None) => break,
                Err(e) => {
                    debug!(err = %e, "connection read error");
                    break;
                }
            },
        };
        if line.trim().is_empty() {
            continue;
        }

        let (response, end_requested) = dispatch(&line, &state).await;
        let mut out = match serde_json::to_string(&response) {
            Ok(s) => s,
            Err(e) => {
                warn!(err = %e, "response serialization failed");
                break;
            }
        };
        out.push('\n');
        if writer.write_all(out.as_bytes()).await.is_err() {
            break;
        }
        let _ = writer.flush().await;

        if end_requested {
            // The reply is already on the wire, so the caller never sees a
            // connection reset from the teardown that follows.
            state.begin_shutdown(None).await;
        }
    }
}

/// Handle one request line. The bool asks the caller to begin shutdown
/// after the reply has been written.
async fn dispatch(line: &str, state: &SessionState) -> (RpcResponse, bool) {
    let req: RpcRequest = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            return (
                error_response(Value::Null, PARSE_ERROR, format!("parse error: {e}")),
                false,
            )
        }
    };
    let id = req.id.unwrap_or(Value::Null);
    let params = req.params.unwrap_or(Value::Null);

    match req.method.as_str() {
        METHOD_WAIT => (ok_response(id, serde_json::json!({})), false),

        METHOD_ADD_EVENT => {
            if state.shutdown_started.load(Ordering::SeqCst) {
                return (
                    error_response(id, INVALID_REQUEST, "session is shutting down"),
                    false,
                );
            }
            let params: AddEventParams = match parse_params(params) {
                Ok(p) => p,
                Err(e) => return (error_response(id, INVALID_PARAMS, e.to_string()), false),
            };
            let mut span = state.span.lock().await;
            span.add_event(SpanEvent {
                name: params.name,
                time_unix_nano: params.time_unix_nano.unwrap_or_else(now_unix_nano),
                attributes: params
                    .attributes
                    .iter()
                    .map(|(k, v)| (k.clone(), AttrValue::sniff(v)))
                    .collect(),
            });
            (ok_response(id, span_reply(&span)), false)
        }

        METHOD_END => {
            if state.shutdown_started.load(Ordering::SeqCst) {
                return (
                    error_response(id, INVALID_REQUEST, "session already ended"),
                    false,
                );
            }
            let params: EndParams = match parse_params(params) {
                Ok(p) => p,
                Err(e) => return (error_response(id, INVALID_PARAMS, e.to_string()), false),
            };
            let code = match params.status_code.as_deref().unwrap_or("").parse::<StatusCode>() {
                Ok(c) => c,
                Err(e) => return (error_response(id, INVALID_PARAMS, e.to_string()), false),
            };
            let mut span = state.span.lock().await;
            span.end(code, params.status_description.unwrap_or_default());
            (ok_response(id, span_reply(&span)), true)
        }

        other => (
            error_response(id, METHOD_NOT_FOUND, format!("unknown method {other:?}")),
            false,
        ),
    }
}

/// Absent params mean "all defaults" rather than a parse failure.
fn parse_params<T>(params: Value) -> Result<T, serde_json::Error>
where
    T: serde::de::DeserializeOwned + Default,
{
    if params.is_null() {
        Ok(T::default())
    } else {
        serde_json::from_value(params)
    }
}

fn span_reply(span: &Span) -> Value {
    serde_json::json!(SpanReply {
        trace_id: span.trace_id_hex(),
        span_id: span.span_id_hex(),
        traceparent: Traceparent::from_span(span).to_string(),
        error: None,
    })
}

/// Resolves on SIGTERM or Ctrl-C.
async fn terminating_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(err = %e, "cannot install SIGTERM handler");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };
    tokio::select! {
        _ = term.recv() => {},
        _ = tokio::signal::ctrl_c() => {},
    }
}
