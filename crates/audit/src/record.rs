//! Record and rollup types stored and served by the audit gateway.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Format a timestamp the way every stored document carries it: RFC 3339,
/// UTC, fixed millisecond precision. Fixed width keeps lexicographic
/// ordering equal to chronological ordering, which the range queries rely
/// on.
pub fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Invocation,
    Completion,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invocation => "invocation",
            Self::Completion => "completion",
        }
    }
}

/// Terminal status of a call, carried on completion records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Success,
    Error,
    Denied,
    Timeout,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Denied => "denied",
            Self::Timeout => "timeout",
        }
    }
}

/// The begin record of a call.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationRecord {
    pub session_id: String,
    pub server_name: String,
    pub tool_name: String,
    pub event_type: EventType,
    pub timestamp: String,
    pub start_time: String,
    /// Bounded; see [`crate::bounded`].
    pub inputs: Value,
    pub input_size: usize,
    pub environment: Environment,
}

/// Deployment context captured on invocation records.
#[derive(Debug, Clone, Serialize)]
pub struct Environment {
    pub deployment_mode: String,
    pub governance_enabled: bool,
    pub detailed_tracking: bool,
}

/// The end record of a call.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRecord {
    pub session_id: String,
    pub server_name: String,
    pub tool_name: String,
    pub event_type: EventType,
    pub timestamp: String,
    pub end_time: String,
    pub status: CallStatus,
    pub duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Bounded; present only on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_size: Option<usize>,
}

/// One governance decision (allow or deny).
#[derive(Debug, Clone, Serialize)]
pub struct GovernanceLogRecord {
    pub server_name: String,
    pub tool_name: String,
    /// `"allowed"` or the violation kind.
    pub decision: String,
    pub policy_applied: Value,
    pub timestamp: String,
    pub governance_version: &'static str,
}

pub const GOVERNANCE_VERSION: &str = "1.0";

/// One discovered tool on one upstream, upserted by
/// `(server_name, tool_name)` on every successful handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRecord {
    pub server_name: String,
    pub tool_name: String,
    pub description: String,
    pub input_schema: Value,
    pub discovered_at: String,
}

// ── rollups ──────────────────────────────────────────────────────────

/// Per-tool completion rollup over a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRollup {
    pub server_name: String,
    pub tool_name: String,
    pub total_calls: i64,
    pub successful_calls: i64,
    pub failed_calls: i64,
    pub denied_calls: i64,
    /// `successful / total * 100`, rounded to two decimals.
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub max_duration_ms: f64,
    pub min_duration_ms: f64,
    pub avg_output_size: f64,
}

/// Summary across all rollups in a window.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsSummary {
    pub total_unique_tools: usize,
    pub total_calls: i64,
    pub total_successful: i64,
    pub total_failed: i64,
    pub total_denied: i64,
    pub overall_success_rate: f64,
    pub most_used_tool: Option<ToolRollup>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolAnalytics {
    pub summary: AnalyticsSummary,
    pub tools: Vec<ToolRollup>,
    pub time_range_hours: i64,
}

/// Deployment-level usage rollup.
#[derive(Debug, Clone, Serialize)]
pub struct UsageMetrics {
    pub summary: UsageSummary,
    pub servers: Vec<String>,
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageSummary {
    pub total_sessions: i64,
    pub successful_sessions: i64,
    pub failed_sessions: i64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub unique_servers: usize,
    pub unique_tools: usize,
}

/// Governance decision rollup over a window.
#[derive(Debug, Clone, Serialize)]
pub struct GovernanceMetrics {
    pub total_decisions: i64,
    pub allowed_decisions: i64,
    pub denied_decisions: i64,
    pub approval_rate: f64,
    pub denial_rate: f64,
    pub unique_servers: usize,
    pub unique_tools: usize,
    pub servers: Vec<String>,
    pub tools: Vec<String>,
    pub time_range_hours: i64,
}

impl GovernanceMetrics {
    /// The empty-window shape: no decisions means a 100% approval rate.
    pub fn empty(hours: i64) -> Self {
        Self {
            total_decisions: 0,
            allowed_decisions: 0,
            denied_decisions: 0,
            approval_rate: 100.0,
            denial_rate: 0.0,
            unique_servers: 0,
            unique_tools: 0,
            servers: Vec::new(),
            tools: Vec::new(),
            time_range_hours: hours,
        }
    }
}

/// Round to two decimal places, the precision every rollup reports.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn iso_is_fixed_width_millis() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 6, 7, 8).unwrap();
        assert_eq!(iso(ts), "2024-03-05T06:07:08.000Z");
    }

    #[test]
    fn iso_ordering_matches_chronological() {
        let a = Utc.with_ymd_and_hms(2024, 3, 5, 6, 7, 8).unwrap();
        let b = a + chrono::Duration::milliseconds(5);
        assert!(iso(a) < iso(b));
    }

    #[test]
    fn event_and_status_serialize_snake_case() {
        assert_eq!(serde_json::to_value(EventType::Invocation).unwrap(), "invocation");
        assert_eq!(serde_json::to_value(CallStatus::Denied).unwrap(), "denied");
        assert_eq!(CallStatus::Timeout.as_str(), "timeout");
    }

    #[test]
    fn round2_behaves() {
        assert_eq!(round2(66.66666), 66.67);
        assert_eq!(round2(100.0), 100.0);
        assert_eq!(round2(0.004), 0.0);
    }
}
