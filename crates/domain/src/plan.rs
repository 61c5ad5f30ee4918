//! Validated deployment plan.
//!
//! [`DeploymentPlan::from_raw`] turns a permissive [`RawConfig`] into the
//! immutable plan the runtime is wired from. Validation is total and lossy
//! with notice: bad enum values and out-of-range numbers are coerced to
//! defaults, upstreams missing required fields are dropped, and every
//! coercion or drop is reported as a warning. Nothing here is fatal — an
//! unusable config degrades to an empty plan.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::{RawConfig, RawServer, RawServerGovernance};

pub const DEFAULT_BASE_PORT: u16 = 8173;
pub const DEFAULT_SEPARATE_PORT: u16 = 8174;
pub const DEFAULT_RATE_LIMIT: u32 = 100;
pub const DEFAULT_GOVERNANCE_PREFIX: &str = "governed_";
pub const DEFAULT_MONGODB_URI: &str = "mongodb://localhost:27017";

/// Built-in blocked patterns applied when a server configures none.
/// They cover the obvious credential, shell, SQL and eval shapes.
pub const DEFAULT_BLOCKED_PATTERNS: &[&str] = &[
    r"(password|secret|token|key)\s*[:=]\s*\w+",
    r"(rm|del|delete)\s+-rf",
    r"drop\s+table",
    r"eval\s*\(",
    r"exec\s*\(",
];

const PORT_RANGE: std::ops::RangeInclusive<i64> = 1024..=65535;

/// How front-ends are laid out across ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentMode {
    Unified,
    MultiPort,
    Hybrid,
}

impl DeploymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unified => "unified",
            Self::MultiPort => "multi-port",
            Self::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an upstream shares the unified front-end or gets its own port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountMode {
    Unified,
    SeparatePort,
}

impl MountMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unified => "unified",
            Self::SeparatePort => "separate_port",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Low,
    Medium,
    High,
}

/// How to reach one upstream server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum Transport {
    Stdio {
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    },
    Http {
        url: String,
    },
}

impl Transport {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Http { .. } => "http",
        }
    }
}

/// Per-upstream governance policy, fully defaulted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernancePolicy {
    /// Max admissions per rolling 60 seconds.
    pub rate_limit: u32,
    /// Local hours (0-23) during which calls are allowed. Sorted, deduped.
    pub allowed_hours: Vec<u8>,
    /// Case-insensitive regexes that deny a call when matched against the
    /// stringified inputs.
    pub blocked_patterns: Vec<String>,
    pub high_security_mode: bool,
    pub security_level: SecurityLevel,
    pub mode: MountMode,
    /// Dedicated port; always present when `mode` is `separate_port`.
    pub port: Option<u16>,
    pub governance_prefix: String,
    pub hide_original_tools: bool,
    pub detailed_tracking: bool,
    pub enable_tool_logging: bool,
}

impl Default for GovernancePolicy {
    fn default() -> Self {
        Self {
            rate_limit: DEFAULT_RATE_LIMIT,
            allowed_hours: (0..24).collect(),
            blocked_patterns: DEFAULT_BLOCKED_PATTERNS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            high_security_mode: false,
            security_level: SecurityLevel::Medium,
            mode: MountMode::Unified,
            port: None,
            governance_prefix: DEFAULT_GOVERNANCE_PREFIX.into(),
            hide_original_tools: true,
            detailed_tracking: true,
            enable_tool_logging: true,
        }
    }
}

/// One validated upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerPlan {
    pub name: String,
    #[serde(flatten)]
    pub transport: Transport,
    pub governance: GovernancePolicy,
}

/// The validated, immutable runtime plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub deployment_mode: DeploymentMode,
    pub base_port: u16,
    pub host: String,
    pub mongodb_uri: String,
    pub enable_tracking: bool,
    pub enable_dashboard: bool,
    /// Sorted by server name.
    pub servers: Vec<ServerPlan>,
}

impl Default for DeploymentPlan {
    fn default() -> Self {
        Self {
            deployment_mode: DeploymentMode::Unified,
            base_port: DEFAULT_BASE_PORT,
            host: "0.0.0.0".into(),
            mongodb_uri: DEFAULT_MONGODB_URI.into(),
            enable_tracking: true,
            enable_dashboard: true,
            servers: Vec::new(),
        }
    }
}

/// One front-end to bind: which port, and which upstreams it hosts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrontEndPlan {
    pub name: String,
    pub port: u16,
    pub servers: Vec<String>,
}

impl DeploymentPlan {
    /// Validate a raw config into a plan, collecting warnings for every
    /// coercion and drop along the way.
    pub fn from_raw(raw: &RawConfig) -> (Self, Vec<String>) {
        let mut warnings = Vec::new();
        let g = &raw.governance;

        let deployment_mode = match g.deployment_mode.as_str() {
            "unified" => DeploymentMode::Unified,
            "multi-port" => DeploymentMode::MultiPort,
            "hybrid" => DeploymentMode::Hybrid,
            other => {
                warnings.push(format!(
                    "invalid deployment_mode '{other}', using 'unified'"
                ));
                DeploymentMode::Unified
            }
        };

        let base_port = match g.base_port {
            None => DEFAULT_BASE_PORT,
            Some(p) if PORT_RANGE.contains(&p) => p as u16,
            Some(p) => {
                warnings.push(format!(
                    "invalid base_port {p}, using {DEFAULT_BASE_PORT}"
                ));
                DEFAULT_BASE_PORT
            }
        };

        let mongodb_uri = match g.mongodb_uri.as_deref() {
            Some(uri) if !uri.trim().is_empty() => uri.to_string(),
            Some(_) => {
                warnings.push("empty mongodb_uri, using default".into());
                DEFAULT_MONGODB_URI.into()
            }
            None => DEFAULT_MONGODB_URI.into(),
        };

        let mut servers = Vec::new();
        for (name, raw_server) in &raw.mcp_servers {
            if let Some(server) = validate_server(name, raw_server, &mut warnings) {
                servers.push(server);
            }
        }
        servers.sort_by(|a, b| a.name.cmp(&b.name));

        let plan = Self {
            deployment_mode,
            base_port,
            host: g.host.clone(),
            mongodb_uri,
            enable_tracking: g.enable_tracking,
            enable_dashboard: g.enable_dashboard,
            servers,
        };
        (plan, warnings)
    }

    pub fn server(&self, name: &str) -> Option<&ServerPlan> {
        self.servers.iter().find(|s| s.name == name)
    }

    /// Plan the set of front-ends for the configured deployment mode.
    pub fn front_ends(&self) -> Vec<FrontEndPlan> {
        let all_names: Vec<String> = self.servers.iter().map(|s| s.name.clone()).collect();
        match self.deployment_mode {
            DeploymentMode::Unified => vec![FrontEndPlan {
                name: "unified".into(),
                port: self.base_port,
                servers: all_names,
            }],
            DeploymentMode::MultiPort => self
                .servers
                .iter()
                .map(|s| FrontEndPlan {
                    name: s.name.clone(),
                    port: s.governance.port.unwrap_or(DEFAULT_SEPARATE_PORT),
                    servers: vec![s.name.clone()],
                })
                .collect(),
            DeploymentMode::Hybrid => {
                let mut out = Vec::new();
                let shared: Vec<String> = self
                    .servers
                    .iter()
                    .filter(|s| s.governance.mode == MountMode::Unified)
                    .map(|s| s.name.clone())
                    .collect();
                if !shared.is_empty() {
                    out.push(FrontEndPlan {
                        name: "unified".into(),
                        port: self.base_port,
                        servers: shared,
                    });
                }
                for s in self
                    .servers
                    .iter()
                    .filter(|s| s.governance.mode == MountMode::SeparatePort)
                {
                    out.push(FrontEndPlan {
                        name: s.name.clone(),
                        port: s.governance.port.unwrap_or(DEFAULT_SEPARATE_PORT),
                        servers: vec![s.name.clone()],
                    });
                }
                out
            }
        }
    }

    /// Detect front-ends that would contend for the same port.
    pub fn port_conflicts(&self) -> Vec<String> {
        let mut seen: BTreeMap<u16, String> = BTreeMap::new();
        let mut conflicts = Vec::new();
        for fe in self.front_ends() {
            match seen.get(&fe.port) {
                Some(holder) => conflicts.push(format!(
                    "port {} conflict: '{}' and '{}'",
                    fe.port, holder, fe.name
                )),
                None => {
                    seen.insert(fe.port, fe.name.clone());
                }
            }
        }
        conflicts
    }
}

fn validate_server(
    name: &str,
    raw: &RawServer,
    warnings: &mut Vec<String>,
) -> Option<ServerPlan> {
    let transport = match raw.transport.as_deref() {
        None => {
            warnings.push(format!("server '{name}': missing transport, dropping"));
            return None;
        }
        Some("stdio") => {
            let command = match raw.command.as_deref() {
                Some(c) if !c.is_empty() => c.to_string(),
                _ => {
                    warnings.push(format!(
                        "server '{name}': stdio transport missing command, dropping"
                    ));
                    return None;
                }
            };
            Transport::Stdio {
                command,
                args: raw.args.clone(),
                env: raw.env.clone(),
            }
        }
        Some("http") | Some("streamable-http") => {
            let url = match raw.url.as_deref() {
                Some(u) => u.to_string(),
                None => {
                    warnings.push(format!(
                        "server '{name}': http transport missing url, dropping"
                    ));
                    return None;
                }
            };
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                warnings.push(format!(
                    "server '{name}': invalid url '{url}', dropping"
                ));
                return None;
            }
            Transport::Http { url }
        }
        Some(other) => {
            warnings.push(format!(
                "server '{name}': unsupported transport '{other}', dropping"
            ));
            return None;
        }
    };

    let governance = validate_governance(name, &raw.governance, warnings);
    Some(ServerPlan {
        name: name.to_string(),
        transport,
        governance,
    })
}

fn validate_governance(
    name: &str,
    raw: &RawServerGovernance,
    warnings: &mut Vec<String>,
) -> GovernancePolicy {
    let defaults = GovernancePolicy::default();

    let mode = match raw.mode.as_deref() {
        None | Some("unified") => MountMode::Unified,
        Some("separate_port") => MountMode::SeparatePort,
        Some(other) => {
            warnings.push(format!(
                "server '{name}': invalid governance mode '{other}', using 'unified'"
            ));
            MountMode::Unified
        }
    };

    let rate_limit = match raw.rate_limit {
        None => defaults.rate_limit,
        Some(n) if n >= 1 && n <= i64::from(u32::MAX) => n as u32,
        Some(n) => {
            warnings.push(format!(
                "server '{name}': invalid rate_limit {n}, using {}",
                defaults.rate_limit
            ));
            defaults.rate_limit
        }
    };

    let allowed_hours = match &raw.allowed_hours {
        None => defaults.allowed_hours.clone(),
        Some(hours) if hours.iter().all(|h| (0..=23).contains(h)) => {
            let mut hs: Vec<u8> = hours.iter().map(|h| *h as u8).collect();
            hs.sort_unstable();
            hs.dedup();
            hs
        }
        Some(_) => {
            warnings.push(format!(
                "server '{name}': invalid allowed_hours, using all hours"
            ));
            defaults.allowed_hours.clone()
        }
    };

    let blocked_patterns = match &raw.blocked_patterns {
        None => defaults.blocked_patterns.clone(),
        Some(patterns) => {
            let mut kept = Vec::new();
            for p in patterns {
                match regex::Regex::new(p) {
                    Ok(_) => kept.push(p.clone()),
                    Err(e) => warnings.push(format!(
                        "server '{name}': invalid blocked pattern '{p}' ({e}), dropping it"
                    )),
                }
            }
            kept
        }
    };

    let security_level = match raw.security_level.as_deref() {
        None => defaults.security_level,
        Some("low") => SecurityLevel::Low,
        Some("medium") => SecurityLevel::Medium,
        Some("high") => SecurityLevel::High,
        Some(other) => {
            warnings.push(format!(
                "server '{name}': invalid security_level '{other}', using 'medium'"
            ));
            SecurityLevel::Medium
        }
    };

    let port = match mode {
        MountMode::SeparatePort => Some(match raw.port {
            None => {
                warnings.push(format!(
                    "server '{name}': separate_port mode missing port, using {DEFAULT_SEPARATE_PORT}"
                ));
                DEFAULT_SEPARATE_PORT
            }
            Some(p) if PORT_RANGE.contains(&p) => p as u16,
            Some(p) => {
                warnings.push(format!(
                    "server '{name}': invalid port {p}, using {DEFAULT_SEPARATE_PORT}"
                ));
                DEFAULT_SEPARATE_PORT
            }
        }),
        MountMode::Unified => match raw.port {
            None => None,
            Some(p) if PORT_RANGE.contains(&p) => Some(p as u16),
            Some(p) => {
                warnings.push(format!("server '{name}': invalid port {p}, ignoring"));
                None
            }
        },
    };

    let governance_prefix = match raw.governance_prefix.as_deref() {
        None => defaults.governance_prefix.clone(),
        Some(p) if !p.is_empty() => p.to_string(),
        Some(_) => {
            warnings.push(format!(
                "server '{name}': empty governance_prefix, using '{DEFAULT_GOVERNANCE_PREFIX}'"
            ));
            defaults.governance_prefix.clone()
        }
    };

    GovernancePolicy {
        rate_limit,
        allowed_hours,
        blocked_patterns,
        high_security_mode: raw.high_security.unwrap_or(false),
        security_level,
        mode,
        port,
        governance_prefix,
        hide_original_tools: raw.hide_original_tools.unwrap_or(true),
        detailed_tracking: raw.detailed_tracking.unwrap_or(true),
        enable_tool_logging: raw.enable_tool_logging.unwrap_or(true),
    }
}
