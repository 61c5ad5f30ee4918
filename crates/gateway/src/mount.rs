//! The proxy/mount engine.
//!
//! A [`Mount`] wraps one upstream behind the governance interceptor: every
//! forwarded call allocates a session id, writes the invocation record,
//! asks the policy engine for a decision, forwards on allow, and writes
//! the completion record — denial, success, or transport error. The
//! upstream's answer passes through untouched apart from bookkeeping.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use mg_audit::{AuditGateway, CallStatus};
use mg_domain::plan::GovernancePolicy;
use mg_domain::CallResult;
use mg_policy::{Clock, PolicyEngine};
use mg_upstream::{ToolDef, UpstreamClient, UpstreamError};

/// What the mount needs from an upstream connection. Production uses
/// [`UpstreamClient`]; tests plug in fakes.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    fn list_tools(&self) -> Vec<ToolDef>;
    async fn call(&self, tool_name: &str, arguments: Value) -> Result<CallResult, UpstreamError>;
    fn is_alive(&self) -> bool;
    async fn shutdown(&self);
}

#[async_trait]
impl ToolBackend for UpstreamClient {
    fn list_tools(&self) -> Vec<ToolDef> {
        self.tools.clone()
    }

    async fn call(&self, tool_name: &str, arguments: Value) -> Result<CallResult, UpstreamError> {
        self.call_tool(tool_name, arguments).await
    }

    fn is_alive(&self) -> bool {
        UpstreamClient::is_alive(self)
    }

    async fn shutdown(&self) {
        UpstreamClient::shutdown(self).await;
    }
}

// ── in-flight call tracking ──────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ActiveCall {
    pub server_name: String,
    pub tool_name: String,
    pub started_at: DateTime<Utc>,
    pub log_enabled: bool,
    pub detailed_tracking: bool,
}

/// Real-time view of in-flight calls, shared across mounts. The sweeper
/// force-completes entries that outlive the maximum call age.
#[derive(Default)]
pub struct ActiveCallTracker {
    calls: Mutex<HashMap<String, ActiveCall>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RealTimeStats {
    pub active_sessions: usize,
    pub active_servers: usize,
    pub active_tools: usize,
    pub servers: Vec<String>,
    pub tools: Vec<String>,
}

impl ActiveCallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, session_id: &str, call: ActiveCall) {
        self.calls.lock().insert(session_id.to_string(), call);
    }

    pub fn finish(&self, session_id: &str) -> Option<ActiveCall> {
        self.calls.lock().remove(session_id)
    }

    /// Remove and return calls older than `max_age`.
    pub fn sweep_stale(
        &self,
        max_age: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Vec<(String, ActiveCall)> {
        let cutoff = now - max_age;
        let mut calls = self.calls.lock();
        let stale: Vec<String> = calls
            .iter()
            .filter(|(_, c)| c.started_at < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        stale
            .into_iter()
            .filter_map(|id| calls.remove(&id).map(|c| (id, c)))
            .collect()
    }

    pub fn stats(&self) -> RealTimeStats {
        let calls = self.calls.lock();
        let servers: BTreeSet<String> = calls.values().map(|c| c.server_name.clone()).collect();
        let tools: BTreeSet<String> = calls
            .values()
            .map(|c| format!("{}.{}", c.server_name, c.tool_name))
            .collect();
        RealTimeStats {
            active_sessions: calls.len(),
            active_servers: servers.len(),
            active_tools: tools.len(),
            servers: servers.into_iter().collect(),
            tools: tools.into_iter().collect(),
        }
    }
}

/// Milliseconds between two instants, microsecond-accurate.
pub fn duration_ms(t0: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - t0)
        .num_microseconds()
        .map(|us| us as f64 / 1000.0)
        .unwrap_or_else(|| (now - t0).num_milliseconds() as f64)
}

// ── the mount ────────────────────────────────────────────────────────

pub struct Mount {
    pub server_name: String,
    plan_policy: GovernancePolicy,
    backend: Arc<dyn ToolBackend>,
    audit: Arc<AuditGateway>,
    engine: Arc<PolicyEngine>,
    clock: Arc<dyn Clock>,
    active: Arc<ActiveCallTracker>,
    /// Deployment-level `enable_tracking`; off means no tool logs at all.
    tracking_enabled: bool,
    /// Read-mostly cache over the stored governance config; replaced
    /// atomically, falls back to the plan's embedded policy.
    cached_policy: RwLock<Option<Arc<GovernancePolicy>>>,
}

impl Mount {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        server_name: impl Into<String>,
        plan_policy: GovernancePolicy,
        backend: Arc<dyn ToolBackend>,
        audit: Arc<AuditGateway>,
        engine: Arc<PolicyEngine>,
        clock: Arc<dyn Clock>,
        active: Arc<ActiveCallTracker>,
        tracking_enabled: bool,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            plan_policy,
            backend,
            audit,
            engine,
            clock,
            active,
            tracking_enabled,
            cached_policy: RwLock::new(None),
        }
    }

    pub fn backend(&self) -> &Arc<dyn ToolBackend> {
        &self.backend
    }

    pub fn is_alive(&self) -> bool {
        self.backend.is_alive()
    }

    /// Effective governance policy: cached, else loaded from the stored
    /// governance config, else the plan's.
    pub async fn load_policy(&self) -> Arc<GovernancePolicy> {
        if let Some(policy) = self.cached_policy.read().clone() {
            return policy;
        }
        let policy = match self.audit.get_governance_config(&self.server_name).await {
            Ok(Some(doc)) => match serde_json::from_value::<GovernancePolicy>(doc.clone()) {
                Ok(p) => Arc::new(p),
                Err(e) => {
                    tracing::warn!(
                        server = %self.server_name,
                        error = %e,
                        "stored governance config unusable, using plan policy"
                    );
                    Arc::new(self.plan_policy.clone())
                }
            },
            Ok(None) => Arc::new(self.plan_policy.clone()),
            Err(e) => {
                tracing::error!(
                    server = %self.server_name,
                    error = %e,
                    "failed to load governance config, using plan policy"
                );
                Arc::new(self.plan_policy.clone())
            }
        };
        *self.cached_policy.write() = Some(policy.clone());
        policy
    }

    /// Drop the cached policy so the next call reloads from the store.
    pub fn invalidate_policy_cache(&self) {
        *self.cached_policy.write() = None;
    }

    /// The tool names this mount exposes: always the prefixed surface,
    /// plus the unprefixed names when `hide_original_tools` is off (both
    /// run through the interceptor).
    pub fn tool_surface(&self) -> Vec<(String, ToolDef)> {
        let prefix = &self.plan_policy.governance_prefix;
        let mut surface = Vec::new();
        for tool in self.backend.list_tools() {
            surface.push((format!("{prefix}{}", tool.name), tool.clone()));
            if !self.plan_policy.hide_original_tools {
                surface.push((tool.name.clone(), tool));
            }
        }
        surface
    }

    /// The interceptor. Runs policy and audit around one forwarded call
    /// and returns the protocol-level result either way.
    pub async fn handle_call(&self, tool_name: &str, arguments: Value) -> CallResult {
        let session_id = Uuid::new_v4().to_string();
        let t0 = self.clock.now();
        let policy = self.load_policy().await;
        let log_enabled = self.tracking_enabled && policy.enable_tool_logging;
        let detailed = policy.detailed_tracking;

        self.active.begin(
            &session_id,
            ActiveCall {
                server_name: self.server_name.clone(),
                tool_name: tool_name.to_string(),
                started_at: t0,
                log_enabled,
                detailed_tracking: detailed,
            },
        );
        if log_enabled {
            self.audit
                .log_invocation(&session_id, &self.server_name, tool_name, &arguments, detailed, t0);
        }

        let decision = self
            .engine
            .check(&self.server_name, tool_name, &arguments, &policy);
        let snapshot = serde_json::to_value(policy.as_ref()).unwrap_or_else(|_| json!({}));
        self.audit.log_decision(
            &self.server_name,
            tool_name,
            decision.decision_str(),
            snapshot,
            self.clock.now(),
        );

        if !decision.allowed {
            let reason = decision
                .reason
                .clone()
                .unwrap_or_else(|| "policy denied".to_string());
            tracing::warn!(
                server = %self.server_name,
                tool = %tool_name,
                session = %session_id,
                reason = %reason,
                "governance denied tool call"
            );
            self.complete(
                &session_id,
                tool_name,
                CallStatus::Denied,
                None,
                Some(reason.clone()),
                t0,
                log_enabled,
                detailed,
            );
            return CallResult::error(format!("Governance denied: {reason}"));
        }

        tracing::info!(
            server = %self.server_name,
            tool = %tool_name,
            session = %session_id,
            "forwarding tool call"
        );
        match self.backend.call(tool_name, arguments).await {
            Ok(result) => {
                let outputs = serde_json::to_value(&result).ok();
                self.complete(
                    &session_id,
                    tool_name,
                    CallStatus::Success,
                    outputs.as_ref(),
                    None,
                    t0,
                    log_enabled,
                    detailed,
                );
                result
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(
                    server = %self.server_name,
                    tool = %tool_name,
                    session = %session_id,
                    error = %message,
                    "upstream call failed"
                );
                self.complete(
                    &session_id,
                    tool_name,
                    CallStatus::Error,
                    None,
                    Some(message.clone()),
                    t0,
                    log_enabled,
                    detailed,
                );
                CallResult::error(message)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn complete(
        &self,
        session_id: &str,
        tool_name: &str,
        status: CallStatus,
        outputs: Option<&Value>,
        error_message: Option<String>,
        t0: DateTime<Utc>,
        log_enabled: bool,
        detailed: bool,
    ) {
        self.active.finish(session_id);
        let now = self.clock.now();
        if log_enabled {
            self.audit.log_completion(
                session_id,
                &self.server_name,
                tool_name,
                status,
                outputs,
                error_message,
                duration_ms(t0, now),
                detailed,
                now,
            );
        }
    }
}

/// All mounts built at startup, immutable thereafter.
#[derive(Default)]
pub struct MountSet {
    mounts: Vec<Arc<Mount>>,
}

impl MountSet {
    pub fn new(mounts: Vec<Arc<Mount>>) -> Self {
        Self { mounts }
    }

    pub fn get(&self, server_name: &str) -> Option<Arc<Mount>> {
        self.mounts
            .iter()
            .find(|m| m.server_name == server_name)
            .cloned()
    }

    pub fn all(&self) -> &[Arc<Mount>] {
        &self.mounts
    }

    pub fn subset(&self, names: &[String]) -> Vec<Arc<Mount>> {
        names.iter().filter_map(|n| self.get(n)).collect()
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    /// Shut down every upstream concurrently.
    pub async fn shutdown(&self) {
        let futures: Vec<_> = self
            .mounts
            .iter()
            .map(|m| async move { m.backend().shutdown().await })
            .collect();
        futures_util::future::join_all(futures).await;
    }
}
