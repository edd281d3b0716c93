//! HTTP transport for the deliberation engine.
//!
//! Two inbound endpoints: `startSession` returning a chunked NDJSON event
//! stream, and `stopSession` returning 202 while the session winds down.
//! A third lets a disconnected subscriber reattach with `Last-Event-Seq`.

pub mod http;

use council_application::ports::session_store::SessionStore;
use council_application::SessionOrchestrator;
use std::sync::Arc;

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: SessionOrchestrator,
    pub store: Arc<dyn SessionStore>,
}

pub use http::router;

/// Serve the API until the process is stopped.
pub async fn serve(state: AppState, bind: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "council api listening");
    axum::serve(listener, router(state))
        .await
        .map_err(std::io::Error::other)
}
