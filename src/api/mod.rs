mod errors;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::engine::RunStateEngine;
use crate::storage::StateStore;

/// Shared application state accessible by all handlers.
pub struct AppState {
    pub engine: Arc<RunStateEngine>,
    pub store: Arc<dyn StateStore>,
}

/// Dashboard-facing routes: live run document, change stream, stored runs.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/run", get(handlers::current_run))
        .route("/run/cases/{id}/verdict", get(handlers::case_verdict))
        .route("/events", get(handlers::events))
        .route("/runs", get(handlers::list_runs))
        .route("/runs/{id}", get(handlers::get_run).delete(handlers::delete_run))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the dashboard API server.
pub async fn serve(host: &str, port: u16, state: Arc<AppState>) -> Result<()> {
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("benchstate API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
