//! Lifecycle supervisor: startup ordering, signal-driven drain, shutdown.

use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use serde_json::json;
use tokio::sync::Notify;

use mg_audit::record::iso;
use mg_domain::plan::DeploymentPlan;
use mg_policy::{Clock, SystemClock};

use crate::bootstrap;

/// Run the proxy until every front-end has stopped.
///
/// Startup: verify port assignments, build the runtime (store → policy →
/// mounts → front-ends), spawn background tasks, then serve. A fatal
/// error in any front-end, or SIGINT/SIGTERM, drains everything.
pub async fn run(plan: Arc<DeploymentPlan>) -> anyhow::Result<()> {
    tracing::info!(
        mode = %plan.deployment_mode,
        servers = plan.servers.len(),
        "mcpguard starting"
    );

    let conflicts = plan.port_conflicts();
    if !conflicts.is_empty() {
        for conflict in &conflicts {
            tracing::error!("config: {conflict}");
        }
        anyhow::bail!(
            "refusing to start with {} port conflict(s)",
            conflicts.len()
        );
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let runtime = bootstrap::build_runtime(plan, clock).await?;

    if runtime.front_ends.is_empty() {
        tracing::warn!("no front-ends to run");
        return Ok(());
    }

    bootstrap::spawn_background_tasks(&runtime);

    let shutdown = Arc::new(Notify::new());
    spawn_signal_listener(shutdown.clone());

    let mut serving = FuturesUnordered::new();
    for front_end in &runtime.front_ends {
        let fe = front_end.clone();
        let app = runtime.state.clone();
        let drain = shutdown.clone();
        serving.push(tokio::spawn(async move {
            let name = fe.name.clone();
            (name, fe.serve(app, drain).await)
        }));
    }
    tracing::info!(count = runtime.front_ends.len(), "front-end(s) started");

    while let Some(joined) = serving.next().await {
        match joined {
            Ok((name, Ok(()))) => {
                tracing::info!(front_end = %name, "front-end finished");
            }
            Ok((name, Err(e))) => {
                tracing::error!(front_end = %name, error = %e, "front-end failed, draining all");
                shutdown.notify_waiters();
            }
            Err(e) => {
                tracing::error!(error = %e, "front-end task panicked, draining all");
                shutdown.notify_waiters();
            }
        }
    }

    tracing::info!("all front-ends stopped, shutting down");
    runtime.mounts.shutdown().await;
    runtime.state.audit.flush().await;
    if let Err(e) = runtime
        .state
        .audit
        .upsert_deployment_info(json!({
            "status": "stopped",
            "stopped_at": iso(runtime.state.clock.now()),
        }))
        .await
    {
        tracing::error!(error = %e, "failed to record shutdown");
    }
    tracing::info!("mcpguard stopped");
    Ok(())
}

/// SIGINT/SIGTERM → graceful drain.
fn spawn_signal_listener(shutdown: Arc<Notify>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => tracing::info!("SIGINT received, draining"),
                        _ = sigterm.recv() => tracing::info!("SIGTERM received, draining"),
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "cannot listen for SIGTERM, SIGINT only");
                    let _ = tokio::signal::ctrl_c().await;
                    tracing::info!("SIGINT received, draining");
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("interrupt received, draining");
        }
        shutdown.notify_waiters();
    });
}
