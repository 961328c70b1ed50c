//! HTTP API for Armory.
//!
//! Everything is mounted under `/api`: task submission and polling in
//! [`tasks`], read access to stored data in [`data`].

pub mod data;
pub mod error;
pub mod tasks;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use armory_core::Dispatcher;
use armory_shared::{ArmoryError, Result, ServerConfig};
use armory_storage::Storage;

pub use error::{ApiError, ApiResult};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub storage: Arc<Storage>,
}

/// Build the full router with tracing and CORS layers.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/scrape", post(tasks::submit))
        .route("/status/:task_id", get(tasks::status).delete(tasks::cancel))
        .route("/debug/status", get(tasks::all_tasks))
        .route("/health", get(tasks::health))
        .route("/countries", get(data::list_countries))
        .route("/countries/:country", get(data::country_summary))
        .route("/countries/:country/:category", get(data::country_units))
        .route("/search", get(data::search))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind `config.host:config.port` and serve until `shutdown` resolves.
pub async fn serve(
    config: &ServerConfig,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| ArmoryError::config(format!("invalid listen address: {e}")))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ArmoryError::Network(format!("failed to bind {addr}: {e}")))?;
    info!(%addr, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ArmoryError::Network(format!("server error: {e}")))?;

    info!("server stopped");
    Ok(())
}
