/// Minimal health/readiness/metrics HTTP surface.
///
/// Grounded on the teacher's `start_web_server` (axum `Router` + CORS layer,
/// bound with `tokio::net::TcpListener` + `axum::serve`), trimmed to the
/// three endpoints this system actually needs: liveness, readiness (can this
/// instance reach the database), and the Prometheus scrape target.
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::metrics;
use crate::types::AppState;

async fn healthz() -> impl IntoResponse {
    metrics::increment_http_requests("/healthz", "200");
    (StatusCode::OK, "ok")
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => {
            metrics::increment_http_requests("/readyz", "200");
            (StatusCode::OK, "ready")
        }
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            metrics::increment_http_requests("/readyz", "503");
            (StatusCode::SERVICE_UNAVAILABLE, "database unreachable")
        }
    }
}

async fn metrics_handler() -> impl IntoResponse {
    metrics::update_uptime();
    metrics::increment_http_requests("/metrics", "200");
    (StatusCode::OK, metrics::gather_metrics())
}

pub async fn serve(state: Arc<AppState>, port: u16) -> Result<(), std::io::Error> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .layer(cors)
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "health server listening");
    axum::serve(listener, app).await
}
