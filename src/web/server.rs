use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::WebConfig;

use super::api::{
    api_not_found, collection_status, health_check, list_entries, summary_by_country,
    trigger_collection, AppState,
};
use super::auth::require_api_key;

/// Build the application router.
///
/// Everything under `/api`, including unknown paths, sits behind the API-key
/// check; `/health` does not.
pub fn build_router(state: AppState, api_key: &str) -> Router {
    let api_key: Arc<str> = Arc::from(api_key);

    let api_routes = Router::new()
        .route("/collect", post(trigger_collection))
        .route("/collect/status", get(collection_status))
        .route("/entries", get(list_entries))
        .route("/summary/by-country", get(summary_by_country))
        .fallback(api_not_found)
        .layer(middleware::from_fn_with_state(api_key, require_api_key))
        .with_state(state);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes)
        .layer(
            // Trace wraps CORS; CORS answers preflight before the key check
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

/// Serve the API until the shutdown channel flips to true
pub async fn run_server(
    state: AppState,
    web_config: WebConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = build_router(state, &web_config.api_key);

    let listener = tokio::net::TcpListener::bind(&web_config.listen).await?;
    tracing::info!(listen = %web_config.listen, "Web server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|&v| v).await;
            tracing::info!("Web server shutting down gracefully");
        })
        .await?;

    Ok(())
}
