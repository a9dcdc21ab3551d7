// SPDX-License-Identifier: MIT
//! Client side of the session socket, used by sibling invocations.
//!
//! Connecting retries until the deadline so a caller started in the same
//! pipeline as the server does not race its startup; pairing `connect` with
//! `wait()` guarantees the session is serving before the caller proceeds.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use super::{AddEventParams, EndParams, RpcResponse, SpanReply, SOCKET_FILE};

/// One point-to-point connection to a background span session.
pub struct BgClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_id: u64,
}

impl BgClient {
    /// Connect to the session socket in `sock_dir`, retrying until
    /// `timeout` so callers can start before the server finishes binding.
    pub async fn connect(sock_dir: &Path, timeout: Duration) -> Result<Self> {
        let path = sock_dir.join(SOCKET_FILE);
        let deadline = Instant::now() + timeout;
        loop {
            match UnixStream::connect(&path).await {
                Ok(stream) => {
                    let (r, w) = stream.into_split();
                    return Ok(Self {
                        reader: BufReader::new(r),
                        writer: w,
                        next_id: 0,
                    });
                }
                Err(e) if Instant::now() >= deadline => {
                    return Err(e)
                        .with_context(|| format!("connect session socket {}", path.display()));
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(25)).await,
            }
        }
    }

    /// `BgSpan.AddEvent` - append an event to the held span.
    pub async fn add_event(
        &mut self,
        name: impl Into<String>,
        time_unix_nano: Option<u64>,
        attributes: BTreeMap<String, String>,
    ) -> Result<SpanReply> {
        let params = AddEventParams {
            name: name.into(),
            time_unix_nano,
            attributes,
        };
        let result = self
            .call(super::METHOD_ADD_EVENT, serde_json::json!(params))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// `BgSpan.End` - set final status and end the session.
    pub async fn end(
        &mut self,
        status_code: Option<&str>,
        status_description: Option<&str>,
    ) -> Result<SpanReply> {
        let params = EndParams {
            status_code: status_code.map(Into::into),
            status_description: status_description.map(Into::into),
        };
        let result = self.call(super::METHOD_END, serde_json::json!(params)).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// `BgSpan.Wait` - returns once the session is serving requests.
    pub async fn wait(&mut self) -> Result<()> {
        self.call(super::METHOD_WAIT, serde_json::json!({})).await?;
        Ok(())
    }

    async fn call(&mut self, method: &str, params: Value) -> Result<Value> {
        self.next_id += 1;
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": self.next_id,
            "method": method,
            "params": params,
        });
        let mut line = request.to_string();
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .context("write rpc request")?;
        self.writer.flush().await.context("flush rpc request")?;

        let mut reply = String::new();
        let n = self
            .reader
            .read_line(&mut reply)
            .await
            .context("read rpc response")?;
        if n == 0 {
            bail!("session closed the connection");
        }
        let response: RpcResponse =
            serde_json::from_str(&reply).context("parse rpc response")?;
        if let Some(err) = response.error {
            bail!("rpc error {}: {}", err.code, err.message);
        }
        Ok(response.result.unwrap_or(Value::Null))
    }
}
