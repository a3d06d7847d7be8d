//! Pipeline stage 1: tenant resolution.
//!
//! Resolves the request's `Host` header to a `TenantContext` and stores it
//! in request extensions. Failure short-circuits the remaining stages with
//! the corresponding status (404 unknown, 403 suspended).

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::AppState;

pub async fn resolve_tenant_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::InvalidSubdomain("missing host header".to_string()))?;

    let context = state.resolver.resolve(host).await.map_err(|err| {
        match &err {
            AppError::TenantNotFound(subdomain) => {
                tracing::info!(subdomain = %subdomain, "Request for unknown tenant");
            }
            AppError::TenantSuspended(subdomain) => {
                tracing::warn!(subdomain = %subdomain, "Request for suspended tenant");
            }
            _ => {}
        }
        err
    })?;

    req.extensions_mut().insert(context);
    Ok(next.run(req).await)
}
