//! Pipeline stages 3 and 4: cross-tenant cross-check and context injection.
//!
//! The verified token's tenant claims must exactly equal the tenant
//! resolved from the host. A valid token for one tenant replayed against
//! another tenant's subdomain fails here; any mismatch is logged as a
//! distinct security event.

use axum::{
    extract::{FromRequestParts, Request},
    http::request::Parts,
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::services::{IdentityClaims, TenantContext};

/// Verified caller identity, injected for downstream handlers after the
/// cross-check passes. Handlers never verify tokens themselves.
#[derive(Debug, Clone)]
pub struct RequestIdentity {
    pub subject: String,
    pub role: String,
}

pub async fn cross_check_middleware(mut req: Request, next: Next) -> Result<Response, AppError> {
    let context = req
        .extensions()
        .get::<TenantContext>()
        .cloned()
        .ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!("cross-check reached without tenant context"))
        })?;
    let claims = req
        .extensions()
        .get::<IdentityClaims>()
        .cloned()
        .ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!("cross-check reached without verified claims"))
        })?;

    if claims.tenant_id != context.tenant_id || claims.subdomain != context.subdomain {
        tracing::warn!(
            target: "security",
            subject = %claims.sub,
            token_tenant_id = %claims.tenant_id,
            token_subdomain = %claims.subdomain,
            resolved_tenant_id = %context.tenant_id,
            resolved_subdomain = %context.subdomain,
            method = %req.method(),
            path = %req.uri().path(),
            "Cross-tenant token mismatch"
        );
        return Err(AppError::TenantMismatch);
    }

    req.extensions_mut().insert(RequestIdentity {
        subject: claims.sub,
        role: claims.role,
    });
    Ok(next.run(req).await)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequestIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestIdentity>()
            .cloned()
            .ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!("Request identity not found in request"))
            })
    }
}
