//! Raw configuration types.
//!
//! These deserialize the governance config file permissively: enum-like
//! fields are plain strings and numbers are wide integers, so a config with
//! bad values still parses. Turning a [`RawConfig`] into something the
//! runtime trusts is the job of [`crate::plan`], which coerces or drops
//! invalid pieces with warnings instead of failing.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Top-level raw config: `{"governance": {...}, "mcpServers": {...}}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub governance: RawGovernance,

    #[serde(default, rename = "mcpServers")]
    pub mcp_servers: BTreeMap<String, RawServer>,
}

/// The `governance` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RawGovernance {
    pub deployment_mode: String,
    pub base_port: Option<i64>,
    pub host: String,
    pub mongodb_uri: Option<String>,
    pub enable_tracking: bool,
    pub enable_dashboard: bool,
}

impl Default for RawGovernance {
    fn default() -> Self {
        Self {
            deployment_mode: "unified".into(),
            base_port: None,
            host: "0.0.0.0".into(),
            mongodb_uri: None,
            enable_tracking: true,
            enable_dashboard: true,
        }
    }
}

/// One entry under `mcpServers`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawServer {
    pub transport: Option<String>,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub url: Option<String>,
    pub governance: RawServerGovernance,
}

/// The per-server `governance` block.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawServerGovernance {
    pub rate_limit: Option<i64>,
    pub allowed_hours: Option<Vec<i64>>,
    pub blocked_patterns: Option<Vec<String>>,
    pub high_security: Option<bool>,
    pub security_level: Option<String>,
    pub mode: Option<String>,
    pub port: Option<i64>,
    pub governance_prefix: Option<String>,
    pub hide_original_tools: Option<bool>,
    pub detailed_tracking: Option<bool>,
    pub enable_tool_logging: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_parses() {
        let cfg: RawConfig = serde_json::from_str("{}").unwrap();
        assert!(cfg.mcp_servers.is_empty());
        assert_eq!(cfg.governance.deployment_mode, "unified");
        assert_eq!(cfg.governance.host, "0.0.0.0");
        assert!(cfg.governance.enable_tracking);
    }

    #[test]
    fn server_entry_parses() {
        let raw = r#"{
            "mcpServers": {
                "files": {
                    "transport": "stdio",
                    "command": "npx",
                    "args": ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"],
                    "env": { "NODE_ENV": "production" },
                    "governance": { "rate_limit": 5, "mode": "separate_port", "port": 9001 }
                }
            }
        }"#;
        let cfg: RawConfig = serde_json::from_str(raw).unwrap();
        let server = &cfg.mcp_servers["files"];
        assert_eq!(server.transport.as_deref(), Some("stdio"));
        assert_eq!(server.command.as_deref(), Some("npx"));
        assert_eq!(server.args.len(), 3);
        assert_eq!(server.env["NODE_ENV"], "production");
        assert_eq!(server.governance.rate_limit, Some(5));
        assert_eq!(server.governance.port, Some(9001));
    }

    #[test]
    fn bogus_enum_values_still_parse() {
        let raw = r#"{
            "governance": { "deployment_mode": "sideways", "base_port": 99 },
            "mcpServers": { "x": { "transport": "carrier-pigeon" } }
        }"#;
        let cfg: RawConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.governance.deployment_mode, "sideways");
        assert_eq!(cfg.governance.base_port, Some(99));
    }
}
