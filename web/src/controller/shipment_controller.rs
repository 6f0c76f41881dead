use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use crate::controller::ApiResponse;
use crate::extractors::tenant_context::{TenantContext, TenantHeaders};
use crate::{AppState, Error};
use domain::{Id, NewShipment, ShipmentBoard, SHIPMENTS_STREAM};
use log::*;
use sse::TenantStreamKey;

/// POST create or update a Shipment and push it to the caller's live stream
#[utoipa::path(
    post,
    path = "/shipments",
    params(TenantHeaders),
    request_body = NewShipment,
    responses(
        (status = 201, description = "Successfully stored the Shipment", body = domain::Shipment),
        (status = 401, description = "Unauthorized"),
        (status = 422, description = "Unprocessable Entity")
    )
)]
pub async fn create(
    TenantContext(request_ctx): TenantContext,
    State(app_state): State<AppState>,
    Json(params): Json<NewShipment>,
) -> Result<impl IntoResponse, Error> {
    debug!(
        "POST Shipment {} for {}:{}",
        params.pro_number, request_ctx.org_id, request_ctx.bu_id
    );

    let shipment = app_state.shipments.upsert(&request_ctx, params)?;

    let key = TenantStreamKey::new(SHIPMENTS_STREAM, &request_ctx);
    let delivered = app_state
        .streaming
        .publish::<ShipmentBoard>(&key, std::slice::from_ref(&shipment))
        .await;
    trace!(
        "Published shipment {} to {key} ({delivered} new)",
        shipment.id
    );

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(StatusCode::CREATED.into(), shipment)),
    ))
}

/// GET a particular Shipment of the caller's tenant
#[utoipa::path(
    get,
    path = "/shipments/{id}",
    params(
        TenantHeaders,
        ("id" = String, Path, description = "Shipment id (UUID) to retrieve")
    ),
    responses(
        (status = 200, description = "Successfully retrieved the Shipment", body = domain::Shipment),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Shipment not found")
    )
)]
pub async fn read(
    TenantContext(request_ctx): TenantContext,
    State(app_state): State<AppState>,
    Path(id): Path<Id>,
) -> Result<impl IntoResponse, Error> {
    debug!("GET Shipment by id: {id}");

    let shipment = app_state.shipments.find(&request_ctx, id)?;

    Ok(Json(ApiResponse::new(StatusCode::OK.into(), shipment)))
}
