//! Transports for upstream MCP servers.
//!
//! - [`StdioTransport`]: spawn a child process, exchange newline-delimited
//!   JSON-RPC over its stdin/stdout.
//! - [`HttpTransport`]: POST JSON-RPC to an HTTP endpoint, accepting plain
//!   JSON or SSE-framed response bodies.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use crate::protocol::{RpcNotification, RpcRequest, RpcResponse};

/// Per-request timeout once a connection is established.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Trait implemented by both transports.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Send a request and wait for the matching response.
    async fn send_request(&self, method: &str, params: Option<Value>)
        -> Result<RpcResponse, TransportError>;

    /// Send a notification (no response expected).
    async fn send_notification(&self, method: &str) -> Result<(), TransportError>;

    /// Whether the transport can still carry requests.
    fn is_alive(&self) -> bool;

    /// Tear the transport down.
    async fn shutdown(&self);
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP transport error: {0}")]
    Http(String),

    #[error("upstream process has exited")]
    ProcessExited,

    #[error("timeout waiting for response")]
    Timeout,
}

// ── stdio ────────────────────────────────────────────────────────────

/// How many non-JSON stdout lines to tolerate before declaring the
/// upstream broken. Protects against servers that log to stdout.
const MAX_SKIP_LINES: usize = 1000;

/// Child-process transport. One writer, one reader; the `request_lock`
/// serializes whole request/response cycles so concurrent callers cannot
/// read each other's responses.
pub struct StdioTransport {
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    child: Mutex<Child>,
    request_lock: Mutex<()>,
    next_id: AtomicU64,
    alive: AtomicBool,
}

impl StdioTransport {
    /// Spawn the upstream command. The child inherits the parent
    /// environment with `env` entries layered on top (child entries win).
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<Self, TransportError> {
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdin",
            ))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdout",
            ))
        })?;

        // Drain child stderr into our logs so the pipe never fills up.
        if let Some(stderr) = child.stderr.take() {
            let command = command.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(command = %command, line = %line, "upstream stderr");
                }
            });
        }

        Ok(Self {
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            child: Mutex::new(child),
            request_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
        })
    }

    async fn write_line(&self, json: &str) -> Result<(), TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Read the next JSON line from stdout, skipping noise up to
    /// [`MAX_SKIP_LINES`]. EOF flips the transport into its terminal
    /// broken state.
    async fn read_json_line(&self) -> Result<String, TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }
        let mut stdout = self.stdout.lock().await;
        let mut skipped = 0usize;
        loop {
            let mut line = String::new();
            let n = stdout.read_line(&mut line).await?;
            if n == 0 {
                self.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::ProcessExited);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with('{') {
                return Ok(trimmed.to_string());
            }
            skipped += 1;
            if skipped >= MAX_SKIP_LINES {
                self.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "upstream produced too many non-JSON lines on stdout",
                )));
            }
            tracing::debug!(line = %trimmed, "skipping non-JSON stdout line");
        }
    }
}

#[async_trait]
impl RpcTransport for StdioTransport {
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<RpcResponse, TransportError> {
        let _guard = self.request_lock.lock().await;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let json = serde_json::to_string(&RpcRequest::new(id, method, params))?;
        tracing::debug!(id, method, "sending upstream request");
        self.write_line(&json).await?;

        // Servers may interleave notifications; skip anything that is not
        // the response to our id.
        let wait = tokio::time::timeout(REQUEST_TIMEOUT, async {
            loop {
                let line = self.read_json_line().await?;
                if let Ok(resp) = serde_json::from_str::<RpcResponse>(&line) {
                    if resp.id == id {
                        return Ok(resp);
                    }
                    tracing::debug!(expected = id, got = resp.id, "response id mismatch, skipping");
                    continue;
                }
                tracing::debug!(line = %line, "skipping non-response message");
            }
        })
        .await;

        match wait {
            Ok(inner) => inner,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn send_notification(&self, method: &str) -> Result<(), TransportError> {
        let json = serde_json::to_string(&RpcNotification::new(method))?;
        tracing::debug!(method, "sending upstream notification");
        self.write_line(&json).await
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let mut child = self.child.lock().await;
        {
            let mut stdin = self.stdin.lock().await;
            if let Err(e) = stdin.shutdown().await {
                tracing::debug!(error = %e, "error closing upstream stdin");
            }
        }
        match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(?status, "upstream process exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "error waiting for upstream process");
            }
            Err(_) => {
                tracing::warn!("upstream did not exit within grace period, killing");
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill upstream process");
                }
            }
        }
    }
}

// ── http ─────────────────────────────────────────────────────────────

/// HTTP transport: one reused `reqwest` client POSTing JSON-RPC messages
/// to the configured endpoint. Streamable-HTTP servers frame responses as
/// SSE and hand out a session id on `initialize`; both are handled here.
pub struct HttpTransport {
    url: String,
    http: reqwest::Client,
    session_id: parking_lot::Mutex<Option<String>>,
    next_id: AtomicU64,
    alive: AtomicBool,
}

impl HttpTransport {
    pub fn new(url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            url,
            http,
            session_id: parking_lot::Mutex::new(None),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
        }
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, TransportError> {
        let mut req = self
            .http
            .post(&self.url)
            .header("accept", "application/json, text/event-stream")
            .json(body);
        if let Some(session) = self.session_id.lock().clone() {
            req = req.header("mcp-session-id", session);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        if let Some(session) = resp
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock() = Some(session.to_string());
        }
        Ok(resp)
    }

    /// Pull the JSON-RPC response for `id` out of a response body that is
    /// either plain JSON or an SSE stream of `data:` lines.
    fn parse_body(body: &str, id: u64) -> Result<RpcResponse, TransportError> {
        if let Ok(resp) = serde_json::from_str::<RpcResponse>(body) {
            return Ok(resp);
        }
        for line in body.lines() {
            if let Some(data) = line.strip_prefix("data:") {
                if let Ok(resp) = serde_json::from_str::<RpcResponse>(data.trim()) {
                    if resp.id == id {
                        return Ok(resp);
                    }
                }
            }
        }
        Err(TransportError::Http(format!(
            "no JSON-RPC response for id {id} in body"
        )))
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<RpcResponse, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::to_value(RpcRequest::new(id, method, params))?;
        tracing::debug!(id, method, url = %self.url, "sending upstream HTTP request");

        let resp = self.post(&body).await?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(TransportError::Http(format!(
                "upstream returned {status}: {text}"
            )));
        }
        Self::parse_body(&text, id)
    }

    async fn send_notification(&self, method: &str) -> Result<(), TransportError> {
        let body = serde_json::to_value(RpcNotification::new(method))?;
        let resp = self.post(&body).await?;
        let status = resp.status();
        if !status.is_success() && status != reqwest::StatusCode::ACCEPTED {
            return Err(TransportError::Http(format!(
                "notification rejected with {status}"
            )));
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_json_body() {
        let body = r#"{"jsonrpc":"2.0","id":3,"result":{"ok":true}}"#;
        let resp = HttpTransport::parse_body(body, 3).unwrap();
        assert_eq!(resp.id, 3);
        assert!(!resp.is_error());
    }

    #[test]
    fn parse_sse_framed_body() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":5,\"result\":{\"tools\":[]}}\n\n";
        let resp = HttpTransport::parse_body(body, 5).unwrap();
        assert_eq!(resp.id, 5);
    }

    #[test]
    fn parse_body_rejects_garbage() {
        assert!(HttpTransport::parse_body("not json at all", 1).is_err());
    }

    #[test]
    fn parse_sse_skips_other_ids() {
        let body = concat!(
            "data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n",
            "data: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{\"ok\":true}}\n",
        );
        let resp = HttpTransport::parse_body(body, 2).unwrap();
        assert_eq!(resp.id, 2);
    }
}
