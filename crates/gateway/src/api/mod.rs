pub mod governance;
pub mod mcp;

use axum::routing::{get, post};
use axum::Router;

use crate::server::ServerContext;

/// Build the router for one front-end: the tool-invocation endpoint plus,
/// unless the config disables the dashboard, the read-only governance
/// surface.
pub fn router(ctx: ServerContext) -> Router {
    let mut router = Router::new()
        .route("/", get(governance::root))
        // Tool-invocation protocol (JSON-RPC over POST)
        .route("/mcp", post(mcp::rpc));

    if ctx.app.plan.enable_dashboard {
        router = router
            .route("/dashboard", get(governance::dashboard))
            .route("/governance/tool-logs", get(governance::tool_logs))
            .route("/governance/analytics", get(governance::analytics))
            .route("/governance/metrics", get(governance::metrics))
            .route("/governance/violations", get(governance::violations))
            .route("/governance/timeline", get(governance::timeline))
            .route("/governance/servers", get(governance::servers))
            .route("/governance/usage", get(governance::usage))
            .route("/governance/servers/:name/usage", get(governance::server_usage))
            .route(
                "/governance/servers/:name/tools/:tool/usage",
                get(governance::tool_usage),
            )
            .route("/governance/status", get(governance::status));
    }

    router
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(ctx)
}
