//! Router assembly and the HTTP daemon loop.

use crate::routes::{self, AppState};
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use leadfunnel_kernel::LeadFunnelKernel;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the API router over shared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    // The widget is embedded on clinic pages served from other origins.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/leads", post(routes::start_lead))
        .route("/api/leads/{id}/steps", post(routes::save_step))
        .route("/api/leads/{id}/otp/send", post(routes::send_otp))
        .route("/api/leads/{id}/otp/verify", post(routes::verify_otp))
        .route("/api/leads/{id}/channel", post(routes::set_channel))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API on the configured listen address until Ctrl-C.
pub async fn run_daemon(kernel: LeadFunnelKernel) -> std::io::Result<()> {
    let addr = kernel.config.listen_addr.clone();
    let state = Arc::new(AppState {
        kernel: Arc::new(kernel),
    });
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %listener.local_addr()?, "Lead funnel API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Lead funnel API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
