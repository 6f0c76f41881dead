use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::controller::ApiResponse;
use crate::extractors::tenant_context::{TenantContext, TenantHeaders};
use crate::{AppState, Error};
use domain::error::Error as DomainError;
use log::*;
use sse::TenantStreamKey;

/// Live connection count of the caller's tenant stream.
#[derive(Debug, Serialize, ToSchema)]
pub struct ActiveConnections {
    pub stream_key: String,
    pub active_clients: usize,
}

/// GET counters of the caller's tenant stream
#[utoipa::path(
    get,
    path = "/streams/{stream_key}/metrics",
    params(
        TenantHeaders,
        ("stream_key" = String, Path, description = "Stream key, e.g. shipments-live")
    ),
    responses(
        (status = 200, description = "Stream counters with camelCase keys: activeConnections, totalConnections, dataFetchErrors, lastDataFetch"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "No such stream for this tenant")
    )
)]
pub async fn metrics(
    TenantContext(request_ctx): TenantContext,
    State(app_state): State<AppState>,
    Path(stream_key): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let key = TenantStreamKey::new(&stream_key, &request_ctx);
    debug!("GET metrics for stream {key}");

    let metrics = app_state
        .streaming
        .stream_metrics(&key)
        .ok_or_else(DomainError::not_found)?;

    Ok(Json(ApiResponse::new(StatusCode::OK.into(), metrics)))
}

/// GET the number of clients connected to the caller's tenant stream
#[utoipa::path(
    get,
    path = "/streams/{stream_key}/active",
    params(
        TenantHeaders,
        ("stream_key" = String, Path, description = "Stream key, e.g. shipments-live")
    ),
    responses(
        (status = 200, description = "Connected clients of the caller's tenant", body = ActiveConnections),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn active(
    TenantContext(request_ctx): TenantContext,
    State(app_state): State<AppState>,
    Path(stream_key): Path<String>,
) -> impl IntoResponse {
    let key = TenantStreamKey::new(&stream_key, &request_ctx);
    debug!("GET active clients for stream {key}");

    let active = ActiveConnections {
        active_clients: app_state.streaming.active_clients(&key),
        stream_key,
    };

    Json(ApiResponse::new(StatusCode::OK.into(), active))
}
