// SPDX-License-Identifier: MIT
//! HTTP/protobuf transport against a canned-response server.

use std::time::{Duration, Instant};

use prost::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use otel_cli::otlp::client_for;
use otel_cli::proto::collector::{ExportTracePartialSuccess, ExportTraceServiceResponse};
use otel_cli::span::{Span, SpanKind};
use otel_cli::{resource_spans, Config, ExportScope, OtlpError};

/// Serve the same canned HTTP/1.1 response to every connection.
async fn canned_server(status: &'static str, content_type: &'static str, body: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let body = body.clone();
            tokio::spawn(async move {
                // Consume the request: headers, then content-length bytes.
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let header_end = loop {
                    match stream.read(&mut chunk).await {
                        Ok(0) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        Err(_) => return,
                    }
                    if let Some(i) = find_blank_line(&buf) {
                        break i;
                    }
                };
                let headers = String::from_utf8_lossy(&buf[..header_end]).to_string();
                let want = content_length(&headers);
                let mut have = buf.len() - (header_end + 4);
                while have < want {
                    match stream.read(&mut chunk).await {
                        Ok(0) => break,
                        Ok(n) => have += n,
                        Err(_) => return,
                    }
                }

                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.write_all(&body).await;
                let _ = stream.flush().await;
            });
        }
    });
    format!("http://{addr}/v1/traces")
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn content_length(headers: &str) -> usize {
    headers
        .lines()
        .find_map(|l| {
            let (name, value) = l.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse().ok())?
        })
        .unwrap_or(0)
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("otel_cli=debug")
        .with_test_writer()
        .try_init();
}

fn config_for(url: &str, timeout: Duration) -> Config {
    Config::default()
        .with_traces_endpoint(url)
        .with_timeout(timeout)
}

fn batch() -> Vec<otel_cli::proto::trace::ResourceSpans> {
    let mut span = Span::new("upload-me", SpanKind::Client);
    span.end(otel_cli::StatusCode::Ok, "");
    vec![resource_spans(&span, "itest")]
}

async fn export(cfg: &Config) -> (Result<(), OtlpError>, ExportScope) {
    init_logging();
    let mut scope = ExportScope::with_timeout(Instant::now(), cfg.timeout);
    let mut client = client_for(cfg).unwrap();
    client.start(&mut scope).await.unwrap();
    let result = client.upload_traces(&mut scope, batch()).await;
    client.stop(&mut scope).await.unwrap();
    (result, scope)
}

#[tokio::test]
async fn success_response_uploads_cleanly() {
    let body = ExportTraceServiceResponse {
        partial_success: None,
    }
    .encode_to_vec();
    let url = canned_server("200 OK", "application/x-protobuf", body).await;
    let cfg = config_for(&url, Duration::from_secs(5));

    let (result, scope) = export(&cfg).await;
    result.unwrap();
    assert!(scope.errors().is_empty());
}

#[tokio::test]
async fn server_error_500_is_final_after_one_attempt() {
    let url = canned_server("500 Internal Server Error", "text/plain", b"boom".to_vec()).await;
    let cfg = config_for(&url, Duration::from_secs(5));

    let (result, scope) = export(&cfg).await;
    match result {
        Err(OtlpError::Server { code, message }) => {
            assert_eq!(code, "500");
            assert!(message.contains("boom"));
        }
        other => panic!("expected server error, got {other:?}"),
    }
    // Final errors are not retried: exactly one recorded attempt.
    assert_eq!(scope.errors().len(), 1);
}

#[tokio::test]
async fn unavailable_503_retries_until_the_deadline() {
    let url = canned_server("503 Service Unavailable", "text/plain", Vec::new()).await;
    let cfg = config_for(&url, Duration::from_millis(400));

    let started = Instant::now();
    let (result, scope) = export(&cfg).await;
    assert!(result.is_err());
    assert!(started.elapsed() < Duration::from_secs(3));
    // At least two attempts made it into the log before the deadline cut in.
    assert!(scope.errors().len() >= 2, "errors: {:?}", scope.errors());
}

#[tokio::test]
async fn partial_success_is_an_error_but_not_retried() {
    let body = ExportTraceServiceResponse {
        partial_success: Some(ExportTracePartialSuccess {
            rejected_spans: 1,
            error_message: "span too old".into(),
        }),
    }
    .encode_to_vec();
    let url = canned_server("200 OK", "application/x-protobuf", body).await;
    let cfg = config_for(&url, Duration::from_secs(5));

    let (result, scope) = export(&cfg).await;
    match result {
        Err(OtlpError::PartialSuccess { rejected, message }) => {
            assert_eq!(rejected, 1);
            assert!(message.contains("span too old"));
        }
        other => panic!("expected partial success, got {other:?}"),
    }
    assert_eq!(scope.errors().len(), 1);
}

#[tokio::test]
async fn wrong_content_type_on_success_is_final() {
    let url = canned_server("200 OK", "application/json", b"{}".to_vec()).await;
    let cfg = config_for(&url, Duration::from_secs(5));

    let (result, _) = export(&cfg).await;
    assert!(matches!(result, Err(OtlpError::Server { .. })));
}

#[tokio::test]
async fn connection_refused_is_final_not_retried() {
    // Bind then drop to get a port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let cfg = config_for(&format!("http://{addr}/v1/traces"), Duration::from_secs(5));
    let started = Instant::now();
    let (result, scope) = export(&cfg).await;
    assert!(matches!(result, Err(OtlpError::Connect(_))));
    assert_eq!(scope.errors().len(), 1);
    assert!(started.elapsed() < Duration::from_secs(2));
}
