//! Quote API route handlers

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::catalog::CatalogStats;
use crate::error::{AppError, Result};
use crate::AppState;

use super::requests::{QuoteRequest, QuoteRequestBody, WarmLocationRequest};
use super::responses::{AcceptedResponse, Quote};
use super::services::EngineStats;

/// Quote API routes; state is supplied by the caller
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/quote", post(quote))
        .route("/locations/warm", post(warm_location))
        .route("/catalog/sync", post(sync_catalog))
        .route("/catalog", get(catalog))
        .route("/stats", get(stats))
        .route("/health", get(health))
}

/// Price a quote request
async fn quote(
    State(state): State<AppState>,
    body: std::result::Result<Json<QuoteRequestBody>, JsonRejection>,
) -> Result<Json<Quote>> {
    let Json(body) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let request = QuoteRequest::try_from(body)?;
    let quote = state.engine.get_quote(request).await?;
    Ok(Json(quote))
}

/// Start resolving a delivery address ahead of the quote
async fn warm_location(
    State(state): State<AppState>,
    body: std::result::Result<Json<WarmLocationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AcceptedResponse>)> {
    let Json(body) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let key = state.engine.warm_location(&body.address)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            accepted: true,
            key: Some(key),
        }),
    ))
}

/// Refresh the catalog in the background
async fn sync_catalog(State(state): State<AppState>) -> (StatusCode, Json<AcceptedResponse>) {
    state.engine.trigger_catalog_sync();
    (
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            accepted: true,
            key: None,
        }),
    )
}

async fn catalog(State(state): State<AppState>) -> Json<CatalogStats> {
    Json(state.engine.catalog().stats())
}

async fn stats(State(state): State<AppState>) -> Json<EngineStats> {
    Json(state.engine.stats())
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let catalog = state.engine.catalog().snapshot();
    Json(json!({
        "status": "ok",
        "catalog_version": catalog.version,
        "catalog_bootstrap": catalog.is_bootstrap(),
    }))
}
