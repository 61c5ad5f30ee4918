//! Typed operations over the audit store.
//!
//! [`AuditGateway`] is the only thing the rest of the system talks to:
//! log writes go through the bounded [`AuditQueue`], metadata upserts and
//! queries go straight to the backend. All payloads are bounded before
//! they leave this module.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use mg_domain::Result;

use crate::bounded::{bound_payload, payload_size};
use crate::queue::{AuditQueue, AuditWrite, DEFAULT_CAPACITY};
use crate::record::{
    iso, round2, AnalyticsSummary, CallStatus, CompletionRecord, Environment, EventType,
    GovernanceLogRecord, GovernanceMetrics, InvocationRecord, ToolAnalytics, ToolRecord,
    ToolRollup, UsageMetrics, UsageSummary, GOVERNANCE_VERSION,
};
use crate::store::{collections, AuditStore, FindQuery};

/// Query filters for `tool_logs`, shaped to deserialize straight from the
/// dashboard endpoint's query string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolLogFilter {
    pub server_name: Option<String>,
    pub tool_name: Option<String>,
    pub session_id: Option<String>,
    pub hours: Option<i64>,
    pub limit: Option<usize>,
}

pub struct AuditGateway {
    store: Arc<dyn AuditStore>,
    queue: AuditQueue,
    deployment_mode: String,
}

impl AuditGateway {
    pub fn new(store: Arc<dyn AuditStore>, deployment_mode: &str) -> Self {
        let queue = AuditQueue::new(store.clone(), DEFAULT_CAPACITY);
        Self {
            store,
            queue,
            deployment_mode: deployment_mode.to_string(),
        }
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    pub fn dropped_writes(&self) -> u64 {
        self.queue.dropped()
    }

    /// Drain pending log writes (shutdown and tests).
    pub async fn flush(&self) {
        self.queue.flush().await;
        if let Err(e) = self.store.flush().await {
            tracing::error!(error = %e, "audit store flush failed");
        }
    }

    fn submit(&self, write: AuditWrite) {
        self.queue.submit(write);
    }

    fn window(hours: i64, now: DateTime<Utc>) -> (String, String) {
        (iso(now - Duration::hours(hours)), iso(now))
    }

    // ── log writes (queued, never blocking) ──────────────────────────

    /// Record the begin half of a call. Submitted before the upstream
    /// dispatch starts.
    pub fn log_invocation(
        &self,
        session_id: &str,
        server_name: &str,
        tool_name: &str,
        inputs: &Value,
        detailed_tracking: bool,
        now: DateTime<Utc>,
    ) {
        let stored_inputs = if detailed_tracking {
            bound_payload(inputs)
        } else {
            json!({ "_tracked": false })
        };
        let record = InvocationRecord {
            session_id: session_id.to_string(),
            server_name: server_name.to_string(),
            tool_name: tool_name.to_string(),
            event_type: EventType::Invocation,
            timestamp: iso(now),
            start_time: iso(now),
            inputs: stored_inputs,
            input_size: payload_size(inputs),
            environment: Environment {
                deployment_mode: self.deployment_mode.clone(),
                governance_enabled: true,
                detailed_tracking,
            },
        };
        match serde_json::to_value(&record) {
            Ok(doc) => self.submit(AuditWrite::ToolLog(doc)),
            Err(e) => tracing::error!(error = %e, "failed to serialize invocation record"),
        }
    }

    /// Record the end half of a call.
    #[allow(clippy::too_many_arguments)]
    pub fn log_completion(
        &self,
        session_id: &str,
        server_name: &str,
        tool_name: &str,
        status: CallStatus,
        outputs: Option<&Value>,
        error_message: Option<String>,
        duration_ms: f64,
        detailed_tracking: bool,
        now: DateTime<Utc>,
    ) {
        let (stored_outputs, output_size) = match (status, outputs) {
            (CallStatus::Success, Some(v)) => {
                if detailed_tracking {
                    (Some(bound_payload(v)), Some(payload_size(v)))
                } else {
                    (Some(json!({ "_tracked": false })), None)
                }
            }
            _ => (None, None),
        };
        let record = CompletionRecord {
            session_id: session_id.to_string(),
            server_name: server_name.to_string(),
            tool_name: tool_name.to_string(),
            event_type: EventType::Completion,
            timestamp: iso(now),
            end_time: iso(now),
            status,
            duration_ms,
            error_message,
            outputs: stored_outputs,
            output_size,
        };
        match serde_json::to_value(&record) {
            Ok(doc) => self.submit(AuditWrite::ToolLog(doc)),
            Err(e) => tracing::error!(error = %e, "failed to serialize completion record"),
        }
    }

    /// Record one governance decision, allow or deny.
    pub fn log_decision(
        &self,
        server_name: &str,
        tool_name: &str,
        decision: &str,
        policy_applied: Value,
        now: DateTime<Utc>,
    ) {
        let record = GovernanceLogRecord {
            server_name: server_name.to_string(),
            tool_name: tool_name.to_string(),
            decision: decision.to_string(),
            policy_applied,
            timestamp: iso(now),
            governance_version: GOVERNANCE_VERSION,
        };
        match serde_json::to_value(&record) {
            Ok(doc) => self.submit(AuditWrite::GovernanceLog(doc)),
            Err(e) => tracing::error!(error = %e, "failed to serialize governance record"),
        }
    }

    // ── metadata upserts ─────────────────────────────────────────────

    pub async fn upsert_server_info(&self, server_name: &str, mut info: Value) -> Result<()> {
        if let Some(obj) = info.as_object_mut() {
            obj.insert("server_name".into(), json!(server_name));
            obj.insert("stored_at".into(), json!(iso(Utc::now())));
        }
        self.store
            .upsert(collections::SERVERS, &[("server_name", server_name)], info)
            .await
    }

    pub async fn upsert_server_tools(&self, records: Vec<ToolRecord>) -> Result<()> {
        for record in records {
            let key_server = record.server_name.clone();
            let key_tool = record.tool_name.clone();
            let doc = serde_json::to_value(&record)?;
            self.store
                .upsert(
                    collections::SERVER_TOOLS,
                    &[
                        ("server_name", key_server.as_str()),
                        ("tool_name", key_tool.as_str()),
                    ],
                    doc,
                )
                .await?;
        }
        Ok(())
    }

    pub async fn upsert_governance_config(&self, server_name: &str, mut config: Value) -> Result<()> {
        if let Some(obj) = config.as_object_mut() {
            obj.insert("server_name".into(), json!(server_name));
            obj.insert("stored_at".into(), json!(iso(Utc::now())));
        }
        self.store
            .upsert(
                collections::GOVERNANCE_CONFIGS,
                &[("server_name", server_name)],
                config,
            )
            .await
    }

    pub async fn get_governance_config(&self, server_name: &str) -> Result<Option<Value>> {
        let hits = self
            .store
            .find(
                collections::GOVERNANCE_CONFIGS,
                FindQuery::new().eq("server_name", server_name).limit(1),
            )
            .await?;
        Ok(hits.into_iter().next())
    }

    pub async fn upsert_server_policy(&self, server_name: &str, policy: Value) -> Result<()> {
        let doc = json!({
            "server_name": server_name,
            "policy": policy,
            "updated_at": iso(Utc::now()),
        });
        self.store
            .upsert(
                collections::SERVER_POLICIES,
                &[("server_name", server_name)],
                doc,
            )
            .await
    }

    pub async fn upsert_deployment_info(&self, mut info: Value) -> Result<()> {
        if let Some(obj) = info.as_object_mut() {
            obj.insert("deployment_mode".into(), json!(self.deployment_mode));
            obj.insert("stored_at".into(), json!(iso(Utc::now())));
        }
        let mode = self.deployment_mode.clone();
        self.store
            .upsert(
                collections::DEPLOYMENTS,
                &[("deployment_mode", mode.as_str())],
                info,
            )
            .await
    }

    pub async fn server_list(&self) -> Result<Vec<Value>> {
        self.store
            .find(collections::SERVERS, FindQuery::new().sort_asc("server_name"))
            .await
    }

    // ── queries ──────────────────────────────────────────────────────

    pub async fn tool_logs(&self, filter: &ToolLogFilter, now: DateTime<Utc>) -> Result<Vec<Value>> {
        let mut query = FindQuery::new().sort_desc("timestamp");
        if let Some(server) = &filter.server_name {
            query = query.eq("server_name", server.clone());
        }
        if let Some(tool) = &filter.tool_name {
            query = query.eq("tool_name", tool.clone());
        }
        if let Some(session) = &filter.session_id {
            query = query.eq("session_id", session.clone());
        }
        let hours = filter.hours.unwrap_or(24);
        if hours > 0 {
            let (from, to) = Self::window(hours, now);
            query = query.between(from, to);
        }
        query = query.limit(filter.limit.unwrap_or(100));
        self.store.find(collections::TOOL_LOGS, query).await
    }

    pub async fn tool_analytics(
        &self,
        server_name: Option<&str>,
        hours: i64,
        now: DateTime<Utc>,
    ) -> Result<ToolAnalytics> {
        let (from, to) = Self::window(hours.max(0), now);
        let tools = self.store.tool_analytics(server_name, &from, &to).await?;

        let total_calls: i64 = tools.iter().map(|t| t.total_calls).sum();
        let total_successful: i64 = tools.iter().map(|t| t.successful_calls).sum();
        let summary = AnalyticsSummary {
            total_unique_tools: tools.len(),
            total_calls,
            total_successful,
            total_failed: tools.iter().map(|t| t.failed_calls).sum(),
            total_denied: tools.iter().map(|t| t.denied_calls).sum(),
            overall_success_rate: if total_calls > 0 {
                round2(total_successful as f64 / total_calls as f64 * 100.0)
            } else {
                0.0
            },
            most_used_tool: tools.first().cloned(),
        };
        Ok(ToolAnalytics {
            summary,
            tools,
            time_range_hours: hours,
        })
    }

    pub async fn usage_metrics(&self, hours: i64, now: DateTime<Utc>) -> Result<UsageMetrics> {
        let analytics = self.tool_analytics(None, hours, now).await?;
        let servers: BTreeSet<String> = analytics
            .tools
            .iter()
            .map(|t| t.server_name.clone())
            .collect();
        let tool_names: Vec<String> = analytics
            .tools
            .iter()
            .map(|t| format!("{}.{}", t.server_name, t.tool_name))
            .collect();

        Ok(UsageMetrics {
            summary: UsageSummary {
                total_sessions: analytics.summary.total_calls,
                successful_sessions: analytics.summary.total_successful,
                failed_sessions: analytics.summary.total_failed,
                success_rate: analytics.summary.overall_success_rate,
                avg_duration_ms: weighted_avg_duration(&analytics.tools),
                unique_servers: servers.len(),
                unique_tools: analytics.tools.len(),
            },
            servers: servers.into_iter().collect(),
            tools: tool_names,
        })
    }

    pub async fn server_usage(
        &self,
        server_name: &str,
        hours: i64,
        now: DateTime<Utc>,
    ) -> Result<Value> {
        let analytics = self.tool_analytics(Some(server_name), hours, now).await?;
        let tools: Vec<Value> = analytics
            .tools
            .iter()
            .map(|t| {
                json!({
                    "tool_name": t.tool_name,
                    "usage_count": t.total_calls,
                    "avg_duration": t.avg_duration_ms,
                    "success_count": t.successful_calls,
                })
            })
            .collect();
        let total_usage: i64 = analytics.tools.iter().map(|t| t.total_calls).sum();
        Ok(json!({
            "server_name": server_name,
            "time_range_hours": hours,
            "tools": tools,
            "total_tools": analytics.tools.len(),
            "total_usage": total_usage,
        }))
    }

    pub async fn tool_usage(
        &self,
        server_name: &str,
        tool_name: &str,
        hours: i64,
        now: DateTime<Utc>,
    ) -> Result<Value> {
        let analytics = self.tool_analytics(Some(server_name), hours, now).await?;
        let rollup = analytics.tools.iter().find(|t| t.tool_name == tool_name);
        Ok(match rollup {
            Some(t) => json!({
                "server_name": server_name,
                "tool_name": tool_name,
                "usage_count": t.total_calls,
                "success_count": t.successful_calls,
                "error_count": t.failed_calls,
                "success_rate": t.success_rate,
                "avg_duration_ms": t.avg_duration_ms,
            }),
            None => json!({
                "server_name": server_name,
                "tool_name": tool_name,
                "usage_count": 0,
                "success_count": 0,
                "error_count": 0,
                "success_rate": 0.0,
                "avg_duration_ms": 0.0,
            }),
        })
    }

    pub async fn governance_metrics(
        &self,
        hours: i64,
        now: DateTime<Utc>,
    ) -> Result<GovernanceMetrics> {
        let (from, to) = Self::window(hours.max(0), now);
        let logs = self
            .store
            .find(
                collections::GOVERNANCE_LOGS,
                FindQuery::new().between(from, to),
            )
            .await?;
        if logs.is_empty() {
            return Ok(GovernanceMetrics::empty(hours));
        }

        let total = logs.len() as i64;
        let allowed = logs
            .iter()
            .filter(|l| l.get("decision").and_then(Value::as_str) == Some("allowed"))
            .count() as i64;
        let denied = total - allowed;
        let servers: BTreeSet<String> = logs
            .iter()
            .filter_map(|l| l.get("server_name").and_then(Value::as_str))
            .map(String::from)
            .collect();
        let tools: BTreeSet<String> = logs
            .iter()
            .filter_map(|l| l.get("tool_name").and_then(Value::as_str))
            .map(String::from)
            .collect();

        Ok(GovernanceMetrics {
            total_decisions: total,
            allowed_decisions: allowed,
            denied_decisions: denied,
            approval_rate: round2(allowed as f64 / total.max(1) as f64 * 100.0),
            denial_rate: round2(denied as f64 / total.max(1) as f64 * 100.0),
            unique_servers: servers.len(),
            unique_tools: tools.len(),
            servers: servers.into_iter().collect(),
            tools: tools.into_iter().collect(),
            time_range_hours: hours,
        })
    }

    /// Denied governance decisions plus denied completions, merged
    /// newest-first.
    pub async fn governance_violations(
        &self,
        hours: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Value>> {
        let (from, to) = Self::window(hours.max(0), now);

        let decision_denials = self
            .store
            .find(
                collections::GOVERNANCE_LOGS,
                FindQuery::new()
                    .ne("decision", "allowed")
                    .between(from.clone(), to.clone())
                    .sort_desc("timestamp"),
            )
            .await?;

        let mut violations: Vec<Value> = decision_denials
            .iter()
            .map(|v| {
                let decision = v
                    .get("decision")
                    .and_then(Value::as_str)
                    .unwrap_or("denied");
                json!({
                    "timestamp": v.get("timestamp").cloned().unwrap_or(Value::Null),
                    "server_name": v.get("server_name").cloned().unwrap_or(Value::Null),
                    "tool_name": v.get("tool_name").cloned().unwrap_or(Value::Null),
                    "policy_violation": decision,
                    "reason": format!("Governance denied: {decision}"),
                    "session_id": Value::Null,
                    "source": "governance_log",
                    "policy_applied": v.get("policy_applied").cloned().unwrap_or(json!({})),
                    "governance_version": v.get("governance_version").cloned().unwrap_or(Value::Null),
                })
            })
            .collect();

        let denied_completions = self
            .store
            .find(
                collections::TOOL_LOGS,
                FindQuery::new()
                    .eq("event_type", "completion")
                    .eq("status", "denied")
                    .between(from, to)
                    .sort_desc("timestamp"),
            )
            .await?;

        violations.extend(denied_completions.iter().map(|v| {
            json!({
                "timestamp": v.get("timestamp").cloned().unwrap_or(Value::Null),
                "server_name": v.get("server_name").cloned().unwrap_or(Value::Null),
                "tool_name": v.get("tool_name").cloned().unwrap_or(Value::Null),
                "policy_violation": "execution_denied",
                "reason": v
                    .get("error_message")
                    .and_then(Value::as_str)
                    .unwrap_or("Tool execution denied"),
                "session_id": v.get("session_id").cloned().unwrap_or(Value::Null),
                "source": "tool_log",
                "duration_ms": v.get("duration_ms").cloned().unwrap_or(json!(0)),
                "inputs": v.get("inputs").cloned().unwrap_or(json!({})),
            })
        }));

        violations.sort_by(|a, b| {
            let ta = a.get("timestamp").and_then(Value::as_str).unwrap_or("");
            let tb = b.get("timestamp").and_then(Value::as_str).unwrap_or("");
            tb.cmp(ta)
        });
        Ok(violations)
    }

    pub async fn governance_timeline(
        &self,
        hours: i64,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Value>> {
        let (from, to) = Self::window(hours.max(0), now);
        self.store
            .find(
                collections::GOVERNANCE_LOGS,
                FindQuery::new()
                    .between(from, to)
                    .sort_desc("timestamp")
                    .limit(limit),
            )
            .await
    }
}

/// Call-weighted average duration across rollups.
fn weighted_avg_duration(tools: &[ToolRollup]) -> f64 {
    let total_calls: i64 = tools.iter().map(|t| t.total_calls).sum();
    if total_calls == 0 {
        return 0.0;
    }
    let weighted: f64 = tools
        .iter()
        .map(|t| t.avg_duration_ms * t.total_calls as f64)
        .sum();
    weighted / total_calls as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAuditStore;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn gateway() -> (AuditGateway, Arc<MemoryAuditStore>) {
        let store = Arc::new(MemoryAuditStore::new());
        (AuditGateway::new(store.clone(), "unified"), store)
    }

    #[tokio::test]
    async fn invocation_and_completion_pair_share_session() {
        let (gw, store) = gateway();
        let inputs = json!({ "msg": "hi" });
        gw.log_invocation("sess-1", "srv", "echo", &inputs, true, now());
        gw.log_completion(
            "sess-1",
            "srv",
            "echo",
            CallStatus::Success,
            Some(&json!({ "content": [{ "type": "text", "text": "hi" }] })),
            None,
            12.5,
            true,
            now() + Duration::milliseconds(13),
        );
        gw.flush().await;

        assert_eq!(store.count(collections::TOOL_LOGS), 2);
        let logs = gw
            .tool_logs(
                &ToolLogFilter {
                    session_id: Some("sess-1".into()),
                    ..Default::default()
                },
                now() + Duration::minutes(1),
            )
            .await
            .unwrap();
        assert_eq!(logs.len(), 2);
        // Sorted newest first: completion then invocation.
        assert_eq!(logs[0]["event_type"], "completion");
        assert_eq!(logs[0]["status"], "success");
        assert_eq!(logs[0]["duration_ms"], 12.5);
        assert_eq!(logs[1]["event_type"], "invocation");
        assert!(logs[1]["timestamp"].as_str().unwrap() <= logs[0]["timestamp"].as_str().unwrap());
    }

    #[tokio::test]
    async fn oversized_outputs_are_stubbed_in_the_store() {
        let (gw, _) = gateway();
        let big = json!({ "content": [{ "type": "text", "text": "x".repeat(50 * 1024) }] });
        gw.log_completion(
            "s", "srv", "t",
            CallStatus::Success,
            Some(&big),
            None,
            1.0,
            true,
            now(),
        );
        gw.flush().await;
        let logs = gw.tool_logs(&ToolLogFilter::default(), now()).await.unwrap();
        let outputs = &logs[0]["outputs"];
        assert_eq!(outputs["truncated"], true);
        assert!(outputs["original_size"].as_u64().unwrap() >= 50 * 1024);
    }

    #[tokio::test]
    async fn detailed_tracking_off_stubs_payloads() {
        let (gw, _) = gateway();
        gw.log_invocation("s", "srv", "t", &json!({ "secret": 1 }), false, now());
        gw.flush().await;
        let logs = gw.tool_logs(&ToolLogFilter::default(), now()).await.unwrap();
        assert_eq!(logs[0]["inputs"], json!({ "_tracked": false }));
    }

    #[tokio::test]
    async fn decisions_feed_metrics_and_violations() {
        let (gw, _) = gateway();
        gw.log_decision("srv", "t", "allowed", json!({ "rate_limit": 100 }), now());
        gw.log_decision("srv", "t", "rate_limit", json!({ "rate_limit": 2 }), now());
        gw.flush().await;

        let metrics = gw.governance_metrics(24, now()).await.unwrap();
        assert_eq!(metrics.total_decisions, 2);
        assert_eq!(metrics.allowed_decisions, 1);
        assert_eq!(metrics.denied_decisions, 1);
        assert_eq!(metrics.approval_rate, 50.0);
        assert_eq!(metrics.unique_servers, 1);

        let violations = gw.governance_violations(24, now()).await.unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0]["policy_violation"], "rate_limit");
        assert_eq!(violations[0]["source"], "governance_log");
    }

    #[tokio::test]
    async fn empty_window_metrics_report_full_approval() {
        let (gw, _) = gateway();
        let metrics = gw.governance_metrics(24, now()).await.unwrap();
        assert_eq!(metrics.total_decisions, 0);
        assert_eq!(metrics.approval_rate, 100.0);
    }

    #[tokio::test]
    async fn denied_completions_appear_as_violations() {
        let (gw, _) = gateway();
        gw.log_completion(
            "s", "srv", "t",
            CallStatus::Denied,
            None,
            Some("Governance denied: Rate limit exceeded".into()),
            0.4,
            true,
            now(),
        );
        gw.flush().await;
        let violations = gw.governance_violations(24, now()).await.unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0]["policy_violation"], "execution_denied");
        assert_eq!(violations[0]["source"], "tool_log");
        assert!(violations[0]["reason"]
            .as_str()
            .unwrap()
            .contains("Rate limit exceeded"));
    }

    #[tokio::test]
    async fn analytics_summary_rolls_up() {
        let (gw, _) = gateway();
        for status in [CallStatus::Success, CallStatus::Success, CallStatus::Error] {
            gw.log_completion("s", "srv", "t", status, None, None, 10.0, true, now());
        }
        gw.flush().await;
        let analytics = gw.tool_analytics(None, 24, now()).await.unwrap();
        assert_eq!(analytics.summary.total_calls, 3);
        assert_eq!(analytics.summary.total_successful, 2);
        assert_eq!(analytics.summary.overall_success_rate, 66.67);
        assert_eq!(
            analytics.summary.most_used_tool.as_ref().unwrap().tool_name,
            "t"
        );

        let usage = gw.usage_metrics(24, now()).await.unwrap();
        assert_eq!(usage.summary.total_sessions, 3);
        assert_eq!(usage.servers, vec!["srv".to_string()]);
        assert_eq!(usage.tools, vec!["srv.t".to_string()]);

        let per_tool = gw.tool_usage("srv", "t", 24, now()).await.unwrap();
        assert_eq!(per_tool["usage_count"], 3);
        assert_eq!(per_tool["error_count"], 1);

        let missing = gw.tool_usage("srv", "nope", 24, now()).await.unwrap();
        assert_eq!(missing["usage_count"], 0);
    }

    #[tokio::test]
    async fn governance_config_roundtrip() {
        let (gw, _) = gateway();
        gw.upsert_governance_config("srv", json!({ "rate_limit": 5 }))
            .await
            .unwrap();
        let config = gw.get_governance_config("srv").await.unwrap().unwrap();
        assert_eq!(config["rate_limit"], 5);
        assert_eq!(config["server_name"], "srv");
        assert!(gw.get_governance_config("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn server_tools_upsert_is_keyed() {
        let (gw, store) = gateway();
        let record = |desc: &str| ToolRecord {
            server_name: "srv".into(),
            tool_name: "echo".into(),
            description: desc.into(),
            input_schema: json!({ "type": "object" }),
            discovered_at: iso(now()),
        };
        gw.upsert_server_tools(vec![record("first")]).await.unwrap();
        gw.upsert_server_tools(vec![record("second")]).await.unwrap();
        assert_eq!(store.count(collections::SERVER_TOOLS), 1);
    }

    #[tokio::test]
    async fn timeline_is_limited_and_desc() {
        let (gw, _) = gateway();
        for i in 0..5 {
            gw.log_decision(
                "srv",
                "t",
                "allowed",
                json!({}),
                now() + Duration::seconds(i),
            );
        }
        gw.flush().await;
        let timeline = gw.governance_timeline(24, 3, now() + Duration::hours(1)).await.unwrap();
        assert_eq!(timeline.len(), 3);
        assert!(timeline[0]["timestamp"].as_str() >= timeline[1]["timestamp"].as_str());
    }
}
