//! One connected upstream: handshake, tool discovery, call forwarding.

use std::time::Duration;

use serde_json::Value;

use mg_domain::plan::{ServerPlan, Transport};
use mg_domain::CallResult;

use crate::protocol::{self, ToolDef, ToolsListResult};
use crate::transport::{HttpTransport, RpcTransport, StdioTransport, TransportError};

/// Upper bound on the whole connect sequence (spawn/connect, `initialize`,
/// `notifications/initialized`, `tools/list`). Exceeding it fails the
/// mount attempt for this upstream.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("handshake timed out after {}s", HANDSHAKE_TIMEOUT.as_secs())]
    HandshakeTimeout,

    #[error("upstream '{0}' is closed")]
    Closed(String),
}

/// A live connection to one upstream MCP server.
pub struct UpstreamClient {
    pub name: String,
    /// Tools discovered during the handshake.
    pub tools: Vec<ToolDef>,
    transport: Box<dyn RpcTransport>,
}

impl UpstreamClient {
    /// Connect to the upstream described by `plan` and run the MCP
    /// handshake under [`HANDSHAKE_TIMEOUT`].
    pub async fn connect(plan: &ServerPlan) -> Result<Self, UpstreamError> {
        let transport: Box<dyn RpcTransport> = match &plan.transport {
            Transport::Stdio { command, args, env } => {
                tracing::info!(server = %plan.name, command = %command, "spawning stdio upstream");
                Box::new(StdioTransport::spawn(command, args, env)?)
            }
            Transport::Http { url } => {
                tracing::info!(server = %plan.name, url = %url, "connecting http upstream");
                Box::new(HttpTransport::new(url.clone()))
            }
        };

        let handshake = Self::handshake(&*transport, &plan.name);
        match tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake).await {
            Ok(Ok(tools)) => {
                tracing::info!(server = %plan.name, tool_count = tools.len(), "upstream connected");
                Ok(Self {
                    name: plan.name.clone(),
                    tools,
                    transport,
                })
            }
            Ok(Err(e)) => {
                transport.shutdown().await;
                Err(e)
            }
            Err(_) => {
                tracing::error!(server = %plan.name, "upstream handshake timed out");
                transport.shutdown().await;
                Err(UpstreamError::HandshakeTimeout)
            }
        }
    }

    async fn handshake(
        transport: &dyn RpcTransport,
        name: &str,
    ) -> Result<Vec<ToolDef>, UpstreamError> {
        let resp = transport
            .send_request("initialize", Some(protocol::initialize_params()))
            .await?;
        if let Err(err) = resp.into_result() {
            return Err(UpstreamError::Protocol(format!("initialize failed: {err}")));
        }

        transport
            .send_notification("notifications/initialized")
            .await?;

        let resp = transport.send_request("tools/list", None).await?;
        let tools = match resp.into_result() {
            Ok(value) => match serde_json::from_value::<ToolsListResult>(value) {
                Ok(r) => r.tools,
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "failed to parse tools/list result");
                    Vec::new()
                }
            },
            Err(err) => {
                tracing::warn!(server = %name, error = %err, "tools/list returned error, no tools");
                Vec::new()
            }
        };
        Ok(tools)
    }

    /// Whether the underlying transport can still carry calls. A false
    /// value is terminal; calls fail fast until the mount is rebuilt.
    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }

    /// Forward one tool call. A result with `is_error` set is still `Ok`
    /// here — it is the upstream's answer, not a transport failure.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<CallResult, UpstreamError> {
        if !self.transport.is_alive() {
            return Err(UpstreamError::Closed(self.name.clone()));
        }

        let resp = self
            .transport
            .send_request("tools/call", Some(protocol::call_params(tool_name, arguments)))
            .await?;

        let value = resp
            .into_result()
            .map_err(|err| UpstreamError::Protocol(format!("tools/call failed: {err}")))?;

        serde_json::from_value::<CallResult>(value)
            .map_err(|e| UpstreamError::Protocol(format!("failed to parse tools/call result: {e}")))
    }

    /// Gracefully close the connection (and reap a stdio child).
    pub async fn shutdown(&self) {
        tracing::info!(server = %self.name, "shutting down upstream");
        self.transport.shutdown().await;
    }
}
