use std::sync::Arc;

use chrono::{DateTime, Utc};

use mg_audit::AuditGateway;
use mg_domain::plan::DeploymentPlan;
use mg_policy::{Clock, PolicyEngine};

use crate::mount::ActiveCallTracker;

/// Shared application state handed to every front-end and API handler.
#[derive(Clone)]
pub struct AppState {
    /// The immutable runtime plan.
    pub plan: Arc<DeploymentPlan>,
    pub audit: Arc<AuditGateway>,
    pub engine: Arc<PolicyEngine>,
    pub clock: Arc<dyn Clock>,
    /// In-flight call tracking shared across mounts.
    pub active: Arc<ActiveCallTracker>,
    pub started_at: DateTime<Utc>,
}
