use crate::cache::CacheStore;
use crate::errors::AppError;
use crate::extractor::TaxpayerLookup;
use crate::models::*;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use std::sync::Arc;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Successful extractions keyed by [`LookupKey`].
    pub cache: Arc<dyn CacheStore>,
    /// Resolves identifiers against the portal on cache misses.
    pub extractor: Arc<dyn TaxpayerLookup>,
}

/// Health check endpoint.
///
/// Not rate limited.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "sunat-ruc-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// POST /consultar-ruc
///
/// Looks up a taxpayer by RUC.
pub async fn consultar_ruc(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RucRequest>, JsonRejection>,
) -> Result<Json<LookupResponse>, AppError> {
    let Json(body) = payload?;
    Ok(Json(lookup(&state, LookupKind::Ruc, &body.ruc).await))
}

/// POST /consultar-dni
///
/// Looks up the taxpayer tied to a DNI. When the DNI maps to several RUCs
/// the first one listed by the portal is returned.
pub async fn consultar_dni(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DniRequest>, JsonRejection>,
) -> Result<Json<LookupResponse>, AppError> {
    let Json(body) = payload?;
    Ok(Json(lookup(&state, LookupKind::Dni, &body.dni).await))
}

/// Cache lookup, then extraction on miss. Only successes are cached.
pub async fn lookup(state: &AppState, kind: LookupKind, identifier: &str) -> LookupResponse {
    let key = LookupKey::new(kind, identifier);

    if let Some(record) = state.cache.get(&key).await {
        tracing::info!("Cache HIT for {}: {}", kind, identifier);
        return LookupResponse::found(record, true);
    }

    tracing::debug!("Cache MISS for {}: {}", kind, identifier);
    match state.extractor.lookup(identifier, kind).await {
        Ok(record) => {
            state.cache.put(key, record.clone()).await;
            LookupResponse::found(record, false)
        }
        Err(e) => LookupResponse::failed(e.client_message()),
    }
}

/// Fallback for unknown routes.
pub async fn not_found() -> AppError {
    AppError::NotFound("Route not found".to_string())
}
