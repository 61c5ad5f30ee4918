//! Runtime construction: store → gateway → policy engine → mounts →
//! front-ends, in dependency order, plus the background tasks.

use std::sync::Arc;

use anyhow::Context;
use serde_json::json;
use sha2::{Digest, Sha256};

use mg_audit::record::{iso, ToolRecord};
use mg_audit::{create_store, AuditGateway, CallStatus};
use mg_domain::plan::{DeploymentPlan, ServerPlan};
use mg_policy::{Clock, PolicyEngine};
use mg_upstream::UpstreamClient;

use crate::loader;
use crate::mount::{duration_ms, ActiveCallTracker, Mount, MountSet};
use crate::server::FrontEnd;
use crate::state::AppState;

/// Invocations without a completion after this many hours are
/// force-completed with `status = timeout` by the sweeper.
pub const MAX_CALL_AGE_HOURS: i64 = 1;

pub struct Runtime {
    pub state: AppState,
    pub mounts: Arc<MountSet>,
    pub front_ends: Vec<Arc<FrontEnd>>,
}

/// Build everything from the plan. The audit store must be reachable;
/// individual upstreams that fail to mount are skipped with an error.
pub async fn build_runtime(
    plan: Arc<DeploymentPlan>,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<Runtime> {
    let database = loader::database_name();
    let store = create_store(&plan.mongodb_uri, &database)
        .await
        .context("connecting to the audit store")?;
    let audit = Arc::new(AuditGateway::new(store, plan.deployment_mode.as_str()));
    tracing::info!(backend = audit.backend(), "audit gateway ready");

    let engine = Arc::new(PolicyEngine::new(clock.clone()));
    tracing::info!("policy engine ready");

    let active = Arc::new(ActiveCallTracker::new());

    if let Err(e) = audit
        .upsert_deployment_info(json!({
            "base_port": plan.base_port,
            "total_servers": plan.servers.len(),
            "setup_time": iso(clock.now()),
            "status": "initializing",
        }))
        .await
    {
        tracing::error!(error = %e, "failed to record deployment info");
    }

    // ── mounts ───────────────────────────────────────────────────────
    let mut mounted = Vec::new();
    for server in &plan.servers {
        match mount_upstream(server, &audit, &engine, &clock, &active, plan.enable_tracking).await {
            Ok(mount) => {
                tracing::info!(server = %server.name, "mounted upstream");
                mounted.push(Arc::new(mount));
            }
            Err(e) => {
                tracing::error!(server = %server.name, error = %e, "failed to mount upstream, skipping");
            }
        }
    }
    tracing::info!(
        mounted = mounted.len(),
        configured = plan.servers.len(),
        "mount pass complete"
    );
    let mounts = Arc::new(MountSet::new(mounted));

    // ── front-ends ───────────────────────────────────────────────────
    let mut front_ends = Vec::new();
    for fe_plan in plan.front_ends() {
        let fe_mounts = mounts.subset(&fe_plan.servers);
        front_ends.push(Arc::new(FrontEnd::new(
            fe_plan.name,
            plan.host.clone(),
            fe_plan.port,
            &fe_mounts,
        )));
    }

    if let Err(e) = audit
        .upsert_deployment_info(json!({
            "base_port": plan.base_port,
            "total_servers": plan.servers.len(),
            "mounted_servers": mounts.len(),
            "setup_time": iso(clock.now()),
            "status": "ready",
        }))
        .await
    {
        tracing::error!(error = %e, "failed to record deployment info");
    }

    let state = AppState {
        plan,
        audit,
        engine,
        clock: clock.clone(),
        active,
        started_at: clock.now(),
    };
    Ok(Runtime {
        state,
        mounts,
        front_ends,
    })
}

/// Connect one upstream, persist its metadata, and wrap it in a mount.
async fn mount_upstream(
    server: &ServerPlan,
    audit: &Arc<AuditGateway>,
    engine: &Arc<PolicyEngine>,
    clock: &Arc<dyn Clock>,
    active: &Arc<ActiveCallTracker>,
    tracking_enabled: bool,
) -> anyhow::Result<Mount> {
    let client = UpstreamClient::connect(server)
        .await
        .with_context(|| format!("connecting upstream '{}'", server.name))?;

    let discovered_at = iso(clock.now());
    let records: Vec<ToolRecord> = client
        .tools
        .iter()
        .map(|tool| ToolRecord {
            server_name: server.name.clone(),
            tool_name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool.input_schema.clone(),
            discovered_at: discovered_at.clone(),
        })
        .collect();
    if let Err(e) = audit.upsert_server_tools(records).await {
        tracing::error!(server = %server.name, error = %e, "failed to persist tool records");
    }

    let config_hash = format!(
        "{:x}",
        Sha256::digest(serde_json::to_string(server).unwrap_or_default().as_bytes())
    );
    if let Err(e) = audit
        .upsert_server_info(
            &server.name,
            json!({
                "transport": server.transport.kind(),
                "governance_mode": server.governance.mode.as_str(),
                "rate_limit": server.governance.rate_limit,
                "port": server.governance.port,
                "is_active": true,
                "registered_at": discovered_at,
                "config_hash": config_hash,
            }),
        )
        .await
    {
        tracing::error!(server = %server.name, error = %e, "failed to persist server info");
    }

    let governance_doc = serde_json::to_value(&server.governance)?;
    if let Err(e) = audit
        .upsert_governance_config(&server.name, governance_doc)
        .await
    {
        tracing::error!(server = %server.name, error = %e, "failed to persist governance config");
    }

    let mount = Mount::new(
        server.name.clone(),
        server.governance.clone(),
        Arc::new(client),
        audit.clone(),
        engine.clone(),
        clock.clone(),
        active.clone(),
        tracking_enabled,
    );
    mount.load_policy().await;
    Ok(mount)
}

/// Spawn the stale-call sweeper: any invocation still in flight after
/// [`MAX_CALL_AGE_HOURS`] gets a forced `timeout` completion.
pub fn spawn_background_tasks(runtime: &Runtime) {
    let audit = runtime.state.audit.clone();
    let active = runtime.state.active.clone();
    let clock = runtime.state.clock.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            let now = clock.now();
            let stale = active.sweep_stale(chrono::Duration::hours(MAX_CALL_AGE_HOURS), now);
            for (session_id, call) in stale {
                tracing::warn!(
                    session = %session_id,
                    server = %call.server_name,
                    tool = %call.tool_name,
                    "force-completing stale call"
                );
                if call.log_enabled {
                    audit.log_completion(
                        &session_id,
                        &call.server_name,
                        &call.tool_name,
                        CallStatus::Timeout,
                        None,
                        Some("Session exceeded maximum duration".to_string()),
                        duration_ms(call.started_at, now),
                        call.detailed_tracking,
                        now,
                    );
                }
            }
        }
    });
    tracing::info!("background tasks spawned");
}
