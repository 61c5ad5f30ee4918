//! The policy engine: one decision per tool call.
//!
//! Checks run in a fixed order and short-circuit on the first denial:
//! time window, rate limit, blocked patterns, then (when the policy asks
//! for it) the high-security checks. A panic anywhere in evaluation is
//! converted into a denial — the engine fails closed.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use serde_json::Value;

use mg_domain::plan::GovernancePolicy;

use crate::clock::Clock;
use crate::rate::RateLimiter;

/// Tool-name fragments that deny a call outright in high-security mode.
pub const SENSITIVE_OPERATIONS: &[&str] = &["delete", "remove", "drop", "truncate", "exec", "eval"];

/// Serialized-input ceiling applied in high-security mode.
pub const MAX_PARAMETER_CHARS: usize = 10_000;

/// What a denial was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Violation {
    TimeRestriction,
    RateLimit,
    SecurityPattern,
    HighSecuritySensitiveOperation,
    HighSecurityParameterSize,
    GovernanceError,
}

impl Violation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimeRestriction => "time_restriction",
            Self::RateLimit => "rate_limit",
            Self::SecurityPattern => "security_pattern",
            Self::HighSecuritySensitiveOperation => "high_security_sensitive_operation",
            Self::HighSecurityParameterSize => "high_security_parameter_size",
            Self::GovernanceError => "governance_error",
        }
    }
}

/// The outcome of one governance check.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation: Option<Violation>,
    /// Which blocked pattern matched, for `security_pattern` denials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Remaining rate budget after an allowed call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_requests: Option<u32>,
}

impl PolicyDecision {
    fn allow(remaining_requests: u32) -> Self {
        Self {
            allowed: true,
            reason: None,
            violation: None,
            pattern: None,
            remaining_requests: Some(remaining_requests),
        }
    }

    fn deny(reason: impl Into<String>, violation: Violation) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            violation: Some(violation),
            pattern: None,
            remaining_requests: None,
        }
    }

    /// The decision string written to governance logs: `allowed` or the
    /// violation kind.
    pub fn decision_str(&self) -> &'static str {
        if self.allowed {
            "allowed"
        } else {
            self.violation
                .map(|v| v.as_str())
                .unwrap_or("denied")
        }
    }
}

/// Engine status snapshot (served by the governance API).
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub status: &'static str,
    pub active_rate_limiters: usize,
    pub total_requests_last_minute: usize,
    pub timestamp: String,
}

pub struct PolicyEngine {
    clock: Arc<dyn Clock>,
    rate: RateLimiter,
    /// Case-insensitive regexes, compiled once per distinct pattern.
    compiled: RwLock<HashMap<String, Option<Regex>>>,
}

impl PolicyEngine {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            rate: RateLimiter::new(),
            compiled: RwLock::new(HashMap::new()),
        }
    }

    /// Evaluate one call against `policy`. Never panics outward: an
    /// internal fault denies with [`Violation::GovernanceError`].
    pub fn check(
        &self,
        server_name: &str,
        tool_name: &str,
        inputs: &Value,
        policy: &GovernancePolicy,
    ) -> PolicyDecision {
        let evaluation = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.evaluate(server_name, tool_name, inputs, policy)
        }));
        match evaluation {
            Ok(decision) => decision,
            Err(_) => {
                tracing::error!(
                    server = %server_name,
                    tool = %tool_name,
                    "policy evaluation panicked, failing closed"
                );
                PolicyDecision::deny(
                    "Governance error: policy evaluation failed",
                    Violation::GovernanceError,
                )
            }
        }
    }

    fn evaluate(
        &self,
        server_name: &str,
        tool_name: &str,
        inputs: &Value,
        policy: &GovernancePolicy,
    ) -> PolicyDecision {
        // 1. Time window.
        let hour = self.clock.local_hour();
        if !policy.allowed_hours.contains(&hour) {
            return PolicyDecision::deny(
                format!(
                    "Access not allowed at hour {hour}. Allowed hours: {:?}",
                    policy.allowed_hours
                ),
                Violation::TimeRestriction,
            );
        }

        // 2. Rate limit. Admission is recorded here, so a call later denied
        // by a pattern still consumed its slot.
        let remaining = match self
            .rate
            .try_admit(server_name, policy.rate_limit, self.clock.now())
        {
            Ok(remaining) => remaining,
            Err(count) => {
                return PolicyDecision::deny(
                    format!(
                        "Rate limit exceeded: {count}/{} requests per minute",
                        policy.rate_limit
                    ),
                    Violation::RateLimit,
                );
            }
        };

        // 3. Blocked patterns against the stringified, lower-cased inputs.
        let input_text = serde_json::to_string(inputs)
            .unwrap_or_default()
            .to_lowercase();
        for pattern in &policy.blocked_patterns {
            if self.pattern_matches(pattern, &input_text) {
                let mut decision = PolicyDecision::deny(
                    format!("Security pattern detected: {pattern}"),
                    Violation::SecurityPattern,
                );
                decision.pattern = Some(pattern.clone());
                return decision;
            }
        }

        // 4. High-security mode.
        if policy.high_security_mode {
            let tool_lower = tool_name.to_lowercase();
            if SENSITIVE_OPERATIONS.iter().any(|op| tool_lower.contains(op)) {
                return PolicyDecision::deny(
                    format!("High security mode: {tool_name} contains sensitive operation"),
                    Violation::HighSecuritySensitiveOperation,
                );
            }
            let input_len = serde_json::to_string(inputs).unwrap_or_default().len();
            if input_len > MAX_PARAMETER_CHARS {
                return PolicyDecision::deny(
                    format!("High security mode: parameter size too large ({input_len} chars)"),
                    Violation::HighSecurityParameterSize,
                );
            }
        }

        PolicyDecision::allow(remaining)
    }

    fn pattern_matches(&self, pattern: &str, text: &str) -> bool {
        if let Some(entry) = self.compiled.read().get(pattern) {
            return entry.as_ref().is_some_and(|re| re.is_match(text));
        }
        let compiled = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| {
                tracing::warn!(pattern = %pattern, error = %e, "unusable blocked pattern, ignoring");
                e
            })
            .ok();
        let matches = compiled.as_ref().is_some_and(|re| re.is_match(text));
        self.compiled
            .write()
            .insert(pattern.to_string(), compiled);
        matches
    }

    pub fn status(&self) -> EngineStatus {
        let now = self.clock.now();
        EngineStatus {
            status: "active",
            active_rate_limiters: self.rate.active_windows(),
            total_requests_last_minute: self.rate.recent_total(now),
            timestamp: now.to_rfc3339(),
        }
    }

    /// Drop all rate state (test/reset support).
    pub fn clear_rate_limiters(&self) {
        self.rate.clear();
        tracing::info!("rate limiters cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    fn engine_at_hour(hour: u8) -> (PolicyEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_hour(hour));
        (PolicyEngine::new(clock.clone()), clock)
    }

    fn policy() -> GovernancePolicy {
        GovernancePolicy::default()
    }

    #[test]
    fn default_policy_allows_plain_call() {
        let (engine, _) = engine_at_hour(12);
        let decision = engine.check("srv", "echo", &json!({"msg": "hi"}), &policy());
        assert!(decision.allowed);
        assert_eq!(decision.remaining_requests, Some(99));
        assert_eq!(decision.decision_str(), "allowed");
    }

    #[test]
    fn outside_allowed_hours_denies() {
        let (engine, _) = engine_at_hour(2);
        let mut p = policy();
        p.allowed_hours = (9..=17).collect();
        let decision = engine.check("srv", "echo", &json!({}), &p);
        assert!(!decision.allowed);
        assert_eq!(decision.violation, Some(Violation::TimeRestriction));
        assert!(decision.reason.as_deref().unwrap().contains("hour 2"));
    }

    #[test]
    fn rate_limit_denies_third_call_of_two() {
        let (engine, _) = engine_at_hour(12);
        let mut p = policy();
        p.rate_limit = 2;
        assert!(engine.check("srv", "echo", &json!({}), &p).allowed);
        assert!(engine.check("srv", "echo", &json!({}), &p).allowed);
        let third = engine.check("srv", "echo", &json!({}), &p);
        assert!(!third.allowed);
        assert_eq!(third.violation, Some(Violation::RateLimit));
        assert_eq!(
            third.reason.as_deref().unwrap(),
            "Rate limit exceeded: 2/2 requests per minute"
        );
    }

    #[test]
    fn rate_window_recovers_after_a_minute() {
        let (engine, clock) = engine_at_hour(12);
        let mut p = policy();
        p.rate_limit = 1;
        assert!(engine.check("srv", "echo", &json!({}), &p).allowed);
        assert!(!engine.check("srv", "echo", &json!({}), &p).allowed);
        clock.advance(chrono::Duration::seconds(61));
        assert!(engine.check("srv", "echo", &json!({}), &p).allowed);
    }

    #[test]
    fn blocked_pattern_denies_and_reports_pattern() {
        let (engine, _) = engine_at_hour(12);
        let mut p = policy();
        p.blocked_patterns = vec![r"drop\s+table".into()];
        let decision = engine.check("srv", "query", &json!({"sql": "DROP TABLE users"}), &p);
        assert!(!decision.allowed);
        assert_eq!(decision.violation, Some(Violation::SecurityPattern));
        assert_eq!(decision.pattern.as_deref(), Some(r"drop\s+table"));
    }

    #[test]
    fn default_patterns_catch_credentials() {
        let (engine, _) = engine_at_hour(12);
        let decision = engine.check(
            "srv",
            "write",
            &json!({"body": "password = hunter2"}),
            &policy(),
        );
        assert!(!decision.allowed);
        assert_eq!(decision.violation, Some(Violation::SecurityPattern));
    }

    #[test]
    fn high_security_blocks_sensitive_tool_names() {
        let (engine, _) = engine_at_hour(12);
        let mut p = policy();
        p.high_security_mode = true;
        let decision = engine.check("srv", "delete_file", &json!({}), &p);
        assert!(!decision.allowed);
        assert_eq!(
            decision.violation,
            Some(Violation::HighSecuritySensitiveOperation)
        );
    }

    #[test]
    fn high_security_blocks_oversized_parameters() {
        let (engine, _) = engine_at_hour(12);
        let mut p = policy();
        p.high_security_mode = true;
        let big = "x".repeat(MAX_PARAMETER_CHARS + 1);
        let decision = engine.check("srv", "write", &json!({ "body": big }), &p);
        assert!(!decision.allowed);
        assert_eq!(
            decision.violation,
            Some(Violation::HighSecurityParameterSize)
        );
    }

    #[test]
    fn sensitive_name_without_high_security_is_allowed() {
        let (engine, _) = engine_at_hour(12);
        let decision = engine.check("srv", "delete_file", &json!({}), &policy());
        assert!(decision.allowed);
    }

    #[test]
    fn engine_fails_closed_on_internal_panic() {
        struct PanickingClock;
        impl Clock for PanickingClock {
            fn now(&self) -> DateTime<Utc> {
                Utc::now()
            }
            fn local_hour(&self) -> u8 {
                panic!("clock fault")
            }
        }
        let engine = PolicyEngine::new(Arc::new(PanickingClock));
        let decision = engine.check("srv", "echo", &json!({}), &policy());
        assert!(!decision.allowed);
        assert_eq!(decision.violation, Some(Violation::GovernanceError));
        assert_eq!(decision.decision_str(), "governance_error");
    }

    #[test]
    fn status_reports_recent_admissions() {
        let (engine, _) = engine_at_hour(12);
        engine.check("a", "t", &json!({}), &policy());
        engine.check("b", "t", &json!({}), &policy());
        let status = engine.status();
        assert_eq!(status.active_rate_limiters, 2);
        assert_eq!(status.total_requests_last_minute, 2);
        engine.clear_rate_limiters();
        assert_eq!(engine.status().active_rate_limiters, 0);
    }
}
