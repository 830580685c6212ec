use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::error::ApiError;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const USER_HEADER: &str = "x-user-id";

/// Tenant and acting user for a request.
///
/// Authentication happens upstream; by the time a request reaches this
/// service the gateway has resolved the caller into these two headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    pub user_id: Option<Uuid>,
}

fn header_uuid(parts: &Parts, name: &str) -> Option<Result<Uuid, ()>> {
    parts.headers.get(name).map(|value| {
        value
            .to_str()
            .ok()
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
            .ok_or(())
    })
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let tenant_id = match header_uuid(parts, TENANT_HEADER) {
            Some(Ok(id)) => id,
            Some(Err(())) => return Err(ApiError::unauthorized("Invalid X-Tenant-Id header").into_response()),
            None => return Err(ApiError::unauthorized("Missing X-Tenant-Id header").into_response()),
        };

        // A malformed actor is treated like an anonymous one.
        let user_id = header_uuid(parts, USER_HEADER).and_then(Result::ok);

        Ok(TenantContext { tenant_id, user_id })
    }
}
