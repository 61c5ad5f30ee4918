//! A front-end: one bound port hosting one or more governed mounts.
//!
//! The server is deliberately thin. It resolves an incoming call to the
//! right mount by its exposed (prefixed) tool name and delegates to the
//! mount's interceptor; everything else is bookkeeping. Lifecycle runs
//! `init → listening → draining → stopped`, with the drain driven by
//! axum's graceful shutdown.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Notify;

use mg_upstream::ToolDef;

use crate::mount::Mount;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Init,
    Listening,
    Draining,
    Stopped,
}

/// One exposed tool: which mount serves it, and its upstream definition
/// (`tool.name` is the original, unprefixed name).
pub struct RouteEntry {
    pub mount: Arc<Mount>,
    pub tool: ToolDef,
}

pub struct FrontEnd {
    pub name: String,
    pub host: String,
    pub port: u16,
    routes: HashMap<String, RouteEntry>,
    state: Mutex<ServerState>,
}

impl FrontEnd {
    /// Build the routing table for the given mounts. Exposed names must
    /// be unique per front-end; a duplicate is reported and skipped so
    /// the first registration wins.
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        mounts: &[Arc<Mount>],
    ) -> Self {
        let name = name.into();
        let mut routes: HashMap<String, RouteEntry> = HashMap::new();
        for mount in mounts {
            for (exposed, tool) in mount.tool_surface() {
                if routes.contains_key(&exposed) {
                    tracing::error!(
                        front_end = %name,
                        tool = %exposed,
                        server = %mount.server_name,
                        "duplicate exposed tool name, skipping registration"
                    );
                    continue;
                }
                routes.insert(
                    exposed,
                    RouteEntry {
                        mount: mount.clone(),
                        tool,
                    },
                );
            }
        }
        Self {
            name,
            host: host.into(),
            port,
            routes,
            state: Mutex::new(ServerState::Init),
        }
    }

    pub fn resolve(&self, exposed_name: &str) -> Option<&RouteEntry> {
        self.routes.get(exposed_name)
    }

    pub fn tool_count(&self) -> usize {
        self.routes.len()
    }

    /// The composed `tools/list` surface, sorted by exposed name.
    pub fn tools(&self) -> Vec<Value> {
        let mut names: Vec<&String> = self.routes.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|exposed| {
                let entry = &self.routes[exposed];
                json!({
                    "name": exposed,
                    "description": entry.tool.description,
                    "inputSchema": entry.tool.input_schema,
                })
            })
            .collect()
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock()
    }

    fn set_state(&self, state: ServerState) {
        *self.state.lock() = state;
    }

    /// Bind and serve until `shutdown` fires, then drain in-flight calls
    /// and stop.
    pub async fn serve(
        self: Arc<Self>,
        app: AppState,
        shutdown: Arc<Notify>,
    ) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding front-end '{}' to {addr}", self.name))?;
        self.set_state(ServerState::Listening);
        tracing::info!(
            front_end = %self.name,
            addr = %addr,
            tools = self.tool_count(),
            "front-end listening"
        );

        let ctx = ServerContext {
            app,
            front_end: self.clone(),
        };
        let router = crate::api::router(ctx);

        let draining = self.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.notified().await;
                draining.set_state(ServerState::Draining);
                tracing::info!(front_end = %draining.name, "draining, no new calls accepted");
            })
            .await
            .with_context(|| format!("front-end '{}' server error", self.name))?;

        self.set_state(ServerState::Stopped);
        tracing::info!(front_end = %self.name, "front-end stopped");
        Ok(())
    }
}

/// Per-front-end axum state: the shared [`AppState`] plus this instance's
/// routing table.
#[derive(Clone)]
pub struct ServerContext {
    pub app: AppState,
    pub front_end: Arc<FrontEnd>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount::{ActiveCallTracker, Mount, ToolBackend};
    use async_trait::async_trait;
    use mg_audit::{AuditGateway, MemoryAuditStore};
    use mg_domain::plan::GovernancePolicy;
    use mg_domain::CallResult;
    use mg_policy::{ManualClock, PolicyEngine};
    use mg_upstream::UpstreamError;

    struct StaticBackend {
        tools: Vec<&'static str>,
    }

    #[async_trait]
    impl ToolBackend for StaticBackend {
        fn list_tools(&self) -> Vec<ToolDef> {
            self.tools
                .iter()
                .map(|name| ToolDef {
                    name: (*name).to_string(),
                    description: String::new(),
                    input_schema: json!({ "type": "object" }),
                })
                .collect()
        }

        async fn call(&self, _: &str, _: Value) -> Result<CallResult, UpstreamError> {
            Ok(CallResult::text("ok"))
        }

        fn is_alive(&self) -> bool {
            true
        }

        async fn shutdown(&self) {}
    }

    fn mount_with(server: &str, tools: Vec<&'static str>, policy: GovernancePolicy) -> Arc<Mount> {
        let store = Arc::new(MemoryAuditStore::new());
        let audit = Arc::new(AuditGateway::new(store, "unified"));
        let clock = Arc::new(ManualClock::at_hour(12));
        Arc::new(Mount::new(
            server,
            policy,
            Arc::new(StaticBackend { tools }),
            audit,
            Arc::new(PolicyEngine::new(clock.clone())),
            clock,
            Arc::new(ActiveCallTracker::new()),
            true,
        ))
    }

    #[tokio::test]
    async fn surface_is_composed_and_sorted() {
        let a = mount_with("a", vec!["read", "write"], GovernancePolicy::default());
        let mut other = GovernancePolicy::default();
        other.governance_prefix = "gx_".into();
        let b = mount_with("b", vec!["query"], other);

        let fe = FrontEnd::new("unified", "127.0.0.1", 0, &[a, b]);
        assert_eq!(fe.tool_count(), 3);
        let names: Vec<String> = fe
            .tools()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["governed_read", "governed_write", "gx_query"]);
        assert!(fe.resolve("governed_read").is_some());
        assert!(fe.resolve("read").is_none());
    }

    #[tokio::test]
    async fn duplicate_exposed_names_keep_first_registration() {
        let a = mount_with("a", vec!["read"], GovernancePolicy::default());
        let b = mount_with("b", vec!["read"], GovernancePolicy::default());
        let fe = FrontEnd::new("unified", "127.0.0.1", 0, &[a, b]);
        assert_eq!(fe.tool_count(), 1);
        assert_eq!(
            fe.resolve("governed_read").unwrap().mount.server_name,
            "a"
        );
    }

    #[test]
    fn starts_in_init_state() {
        let fe = FrontEnd::new("unified", "127.0.0.1", 0, &[]);
        assert_eq!(fe.state(), ServerState::Init);
    }
}
