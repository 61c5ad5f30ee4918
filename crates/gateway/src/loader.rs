//! Config loading with content-hash caching.
//!
//! The loader reads the JSON governance config, validates it into a
//! [`DeploymentPlan`], and caches the plan keyed by the file's SHA-256.
//! A reload with unchanged bytes returns the cached plan. A missing or
//! malformed file is never fatal: the built-in default plan (empty
//! upstream set) is returned with a warning.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use mg_domain::config::RawConfig;
use mg_domain::plan::DeploymentPlan;

/// Environment variable overriding the store URI from the config file.
pub const MONGODB_URI_ENV: &str = "MONGODB_URI";
/// Environment variable naming the store database.
pub const MONGODB_DATABASE_ENV: &str = "MONGODB_DATABASE";
pub const DEFAULT_DATABASE: &str = "mcp_governance";

pub struct ConfigLoader {
    path: PathBuf,
    cache: Mutex<Option<(String, Arc<DeploymentPlan>)>>,
}

impl ConfigLoader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load (or reload) the plan. Always returns a usable plan.
    pub fn load(&self) -> Arc<DeploymentPlan> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "config file not readable, using default config"
                );
                return Arc::new(Self::with_env_overrides(DeploymentPlan::default()));
            }
        };

        let hash = format!("{:x}", Sha256::digest(contents.as_bytes()));
        if let Some((cached_hash, plan)) = self.cache.lock().as_ref() {
            if *cached_hash == hash {
                tracing::debug!(path = %self.path.display(), "config unchanged, using cached plan");
                return plan.clone();
            }
        }

        let raw: RawConfig = match serde_json::from_str(&contents) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "invalid JSON in config, using default config"
                );
                return Arc::new(Self::with_env_overrides(DeploymentPlan::default()));
            }
        };

        let (plan, warnings) = DeploymentPlan::from_raw(&raw);
        for warning in &warnings {
            tracing::warn!("config: {warning}");
        }
        let plan = Arc::new(Self::with_env_overrides(plan));
        tracing::info!(
            path = %self.path.display(),
            servers = plan.servers.len(),
            mode = %plan.deployment_mode,
            "configuration loaded and validated"
        );

        *self.cache.lock() = Some((hash, plan.clone()));
        plan
    }

    fn with_env_overrides(mut plan: DeploymentPlan) -> DeploymentPlan {
        if let Ok(uri) = std::env::var(MONGODB_URI_ENV) {
            if !uri.is_empty() {
                plan.mongodb_uri = uri;
            }
        }
        plan
    }
}

/// Database name for the audit store, from the environment.
pub fn database_name() -> String {
    std::env::var(MONGODB_DATABASE_ENV)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_DATABASE.to_string())
}
