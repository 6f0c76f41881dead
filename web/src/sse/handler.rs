use crate::extractors::tenant_context::{TenantContext, TenantHeaders};
use crate::{AppState, Error};
use ::sse::StreamResponse;
use axum::extract::State;
use domain::SHIPMENTS_STREAM;
use log::*;

/// SSE handler that streams new and updated shipments of the caller's tenant.
/// The connection stays open until the client leaves, the stream times out or
/// the server shuts down.
#[utoipa::path(
    get,
    path = "/shipments/live",
    params(TenantHeaders),
    responses(
        (status = 200, description = "text/event-stream of connected, new-entry, heartbeat, ping and error events"),
        (status = 401, description = "Unauthorized"),
        (status = 429, description = "Too many connections for this user or stream"),
        (status = 503, description = "Server is shutting down")
    )
)]
pub(crate) async fn shipments_live(
    TenantContext(request_ctx): TenantContext,
    State(app_state): State<AppState>,
) -> Result<StreamResponse, Error> {
    debug!(
        "Establishing shipments stream for user {} of {}:{}",
        request_ctx.user_id, request_ctx.org_id, request_ctx.bu_id
    );

    let response =
        app_state
            .streaming
            .stream(request_ctx, SHIPMENTS_STREAM, app_state.shipments.clone())?;

    Ok(response)
}
