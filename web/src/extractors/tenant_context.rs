use crate::extractors::RejectionType;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
};
use log::*;
use sse::RequestContext;
use utoipa::IntoParams;

pub(crate) const USER_ID_HEADER: &str = "x-user-id";
pub(crate) const ORGANIZATION_ID_HEADER: &str = "x-organization-id";
pub(crate) const BUSINESS_UNIT_ID_HEADER: &str = "x-business-unit-id";

/// The caller's identity and tenant, as set by the upstream auth middleware.
pub(crate) struct TenantContext(pub RequestContext);

/// OpenAPI description of the headers `TenantContext` reads.
#[allow(dead_code)]
#[derive(IntoParams)]
#[into_params(parameter_in = Header)]
pub(crate) struct TenantHeaders {
    /// The authenticated user.
    #[param(rename = "x-user-id", style = Simple, required, example = "usr_01")]
    user_id: String,
    /// The organization the user is acting for.
    #[param(rename = "x-organization-id", style = Simple, required, example = "org_01")]
    organization_id: String,
    /// The business unit the user is acting for.
    #[param(rename = "x-business-unit-id", style = Simple, required, example = "bu_01")]
    business_unit_id: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = RejectionType;

    // Rejects with 401 Unauthorized when any of the identity headers is missing or
    // empty, before any stream state is touched.
    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;
        let request_ctx = RequestContext::new(
            header_value(headers, USER_ID_HEADER),
            header_value(headers, ORGANIZATION_ID_HEADER),
            header_value(headers, BUSINESS_UNIT_ID_HEADER),
        );

        if request_ctx.is_complete() {
            Ok(TenantContext(request_ctx))
        } else {
            warn!(
                "Rejecting {} {}: missing tenant headers",
                parts.method, parts.uri
            );
            Err((StatusCode::UNAUTHORIZED, "Unauthorized".to_string()))
        }
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .unwrap_or_default()
}
