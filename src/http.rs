use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::mcp::TermctlMcpServer;
use crate::service::TerminalService;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    sessions: usize,
}

async fn health(State(service): State<TerminalService>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: service.sessions().len(),
    })
}

/// `/health` plus the MCP Streamable HTTP endpoint at `/mcp`.
///
/// Every MCP client session gets its own server object, but all of them
/// share `service`, so terminal sessions outlive the client that made them.
pub fn router(service: TerminalService) -> Router {
    use rmcp::transport::streamable_http_server::{
        session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
    };

    let mcp_service = {
        let service = service.clone();
        StreamableHttpService::new(
            move || Ok(TermctlMcpServer::new(service.clone())),
            Arc::new(LocalSessionManager::default()),
            StreamableHttpServerConfig::default(),
        )
    };

    Router::new()
        .route("/health", get(health))
        .nest_service("/mcp", mcp_service)
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}
