//! Read-only governance/dashboard endpoints.
//!
//! All data endpoints answer `{ "status": "success", "data": ... }` or
//! `{ "status": "error", "error": ... }`; the dashboard consumes these
//! shapes directly.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use mg_audit::record::iso;
use mg_audit::ToolLogFilter;

use crate::server::{ServerContext, ServerState};

/// Where `GET /dashboard` points; the dashboard itself is an external
/// read-only browser over the audit store.
const DASHBOARD_URL: &str = "http://localhost:8501";

#[derive(Debug, Deserialize)]
pub struct HoursQuery {
    pub hours: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TimelineQuery {
    pub hours: Option<i64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    pub server_name: Option<String>,
    pub hours: Option<i64>,
}

fn ok(data: impl Serialize) -> Response {
    Json(json!({ "status": "success", "data": data })).into_response()
}

fn fail(error: impl std::fmt::Display) -> Response {
    Json(json!({ "status": "error", "error": error.to_string() })).into_response()
}

// ── service surface ──────────────────────────────────────────────────

pub async fn root(State(ctx): State<ServerContext>) -> Response {
    let status = match ctx.front_end.state() {
        ServerState::Listening => "running",
        ServerState::Draining => "draining",
        ServerState::Init => "starting",
        ServerState::Stopped => "stopped",
    };
    Json(json!({
        "service": "mcpguard",
        "version": env!("CARGO_PKG_VERSION"),
        "mode": ctx.app.plan.deployment_mode.as_str(),
        "status": status,
        "timestamp": iso(ctx.app.clock.now()),
    }))
    .into_response()
}

pub async fn dashboard() -> Redirect {
    Redirect::temporary(DASHBOARD_URL)
}

// ── audit reads ──────────────────────────────────────────────────────

pub async fn tool_logs(
    State(ctx): State<ServerContext>,
    Query(filter): Query<ToolLogFilter>,
) -> Response {
    match ctx.app.audit.tool_logs(&filter, ctx.app.clock.now()).await {
        Ok(data) => ok(data),
        Err(e) => fail(e),
    }
}

pub async fn analytics(
    State(ctx): State<ServerContext>,
    Query(query): Query<AnalyticsQuery>,
) -> Response {
    let hours = query.hours.unwrap_or(24);
    match ctx
        .app
        .audit
        .tool_analytics(query.server_name.as_deref(), hours, ctx.app.clock.now())
        .await
    {
        Ok(data) => ok(data),
        Err(e) => fail(e),
    }
}

pub async fn metrics(
    State(ctx): State<ServerContext>,
    Query(query): Query<HoursQuery>,
) -> Response {
    match ctx
        .app
        .audit
        .governance_metrics(query.hours.unwrap_or(24), ctx.app.clock.now())
        .await
    {
        Ok(data) => ok(data),
        Err(e) => fail(e),
    }
}

pub async fn violations(
    State(ctx): State<ServerContext>,
    Query(query): Query<HoursQuery>,
) -> Response {
    match ctx
        .app
        .audit
        .governance_violations(query.hours.unwrap_or(24), ctx.app.clock.now())
        .await
    {
        Ok(data) => ok(data),
        Err(e) => fail(e),
    }
}

pub async fn timeline(
    State(ctx): State<ServerContext>,
    Query(query): Query<TimelineQuery>,
) -> Response {
    match ctx
        .app
        .audit
        .governance_timeline(
            query.hours.unwrap_or(24),
            query.limit.unwrap_or(100),
            ctx.app.clock.now(),
        )
        .await
    {
        Ok(data) => ok(data),
        Err(e) => fail(e),
    }
}

pub async fn servers(State(ctx): State<ServerContext>) -> Response {
    match ctx.app.audit.server_list().await {
        Ok(data) => ok(data),
        Err(e) => fail(e),
    }
}

pub async fn usage(State(ctx): State<ServerContext>, Query(query): Query<HoursQuery>) -> Response {
    match ctx
        .app
        .audit
        .usage_metrics(query.hours.unwrap_or(24), ctx.app.clock.now())
        .await
    {
        Ok(data) => ok(data),
        Err(e) => fail(e),
    }
}

pub async fn server_usage(
    State(ctx): State<ServerContext>,
    Path(name): Path<String>,
    Query(query): Query<HoursQuery>,
) -> Response {
    match ctx
        .app
        .audit
        .server_usage(&name, query.hours.unwrap_or(24), ctx.app.clock.now())
        .await
    {
        Ok(data) => ok(data),
        Err(e) => fail(e),
    }
}

pub async fn tool_usage(
    State(ctx): State<ServerContext>,
    Path((name, tool)): Path<(String, String)>,
    Query(query): Query<HoursQuery>,
) -> Response {
    match ctx
        .app
        .audit
        .tool_usage(&name, &tool, query.hours.unwrap_or(24), ctx.app.clock.now())
        .await
    {
        Ok(data) => ok(data),
        Err(e) => fail(e),
    }
}

/// Engine + audit + real-time snapshot.
pub async fn status(State(ctx): State<ServerContext>) -> Response {
    ok(json!({
        "governance": ctx.app.engine.status(),
        "audit": {
            "backend": ctx.app.audit.backend(),
            "dropped_writes": ctx.app.audit.dropped_writes(),
        },
        "active": ctx.app.active.stats(),
        "front_end": {
            "name": ctx.front_end.name,
            "state": ctx.front_end.state(),
            "tools": ctx.front_end.tool_count(),
        },
        "started_at": iso(ctx.app.started_at),
    }))
}
