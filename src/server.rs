use axum::{
    extract::Request,
    middleware,
    response::Response,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::Span;

use crate::handlers::{self, AppState};
use crate::rate_limiter::{enforce_rate_limit, RateLimitGate};

/// Lookup bodies are a single short JSON field.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Builds the HTTP surface.
///
/// Both lookup routes share one rate limiter; `/health` bypasses it.
/// Serve with `into_make_service_with_connect_info::<SocketAddr>()` so the
/// limiter can see the peer address.
pub fn build_router(state: Arc<AppState>, rate_limit: RateLimitGate) -> Router {
    let lookup_routes = Router::new()
        .route("/consultar-ruc", post(handlers::consultar_ruc))
        .route("/consultar-dni", post(handlers::consultar_dni))
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn_with_state(rate_limit, enforce_rate_limit))
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES)),
        );

    Router::new()
        .route("/health", get(handlers::health))
        .merge(lookup_routes)
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request| {
                    tracing::info_span!(
                        "http",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                })
                .on_request(())
                .on_response(|response: &Response, latency: Duration, _span: &Span| {
                    tracing::info!(
                        status = response.status().as_u16(),
                        duration_ms = latency.as_millis() as u64,
                        "request completed"
                    );
                }),
        )
        .layer(CorsLayer::permissive())
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
