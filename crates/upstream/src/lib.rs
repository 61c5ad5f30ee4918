//! `mg-upstream` — client side of the proxy.
//!
//! One [`UpstreamClient`] per configured upstream MCP server. The client
//! speaks JSON-RPC 2.0 over one of two transports:
//! - **stdio**: spawn the configured command as a child process and frame
//!   newline-delimited JSON over its stdin/stdout.
//! - **http**: POST JSON-RPC messages to the configured URL (plain JSON and
//!   SSE-framed responses are both accepted).
//!
//! Connecting performs the MCP handshake (`initialize` →
//! `notifications/initialized` → `tools/list`) under a hard 10 second
//! timeout; a timeout is fatal to the mount attempt for that upstream.

pub mod client;
pub mod protocol;
pub mod transport;

pub use client::{UpstreamClient, UpstreamError, HANDSHAKE_TIMEOUT};
pub use protocol::ToolDef;
pub use transport::TransportError;
