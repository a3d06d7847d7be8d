//! Pipeline stage 5: audit logging.
//!
//! Runs innermost, after the cross-check has injected identity, and
//! records the handler outcome unconditionally, success or error.

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::middleware::cross_check::RequestIdentity;
use crate::services::TenantContext;

pub async fn audit_middleware(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let tenant_id = req
        .extensions()
        .get::<TenantContext>()
        .map(|ctx| ctx.tenant_id.to_string())
        .unwrap_or_else(|| "-".to_string());
    let subject = req
        .extensions()
        .get::<RequestIdentity>()
        .map(|id| id.subject.clone())
        .unwrap_or_else(|| "-".to_string());

    let started = Instant::now();
    let response = next.run(req).await;

    tracing::info!(
        target: "audit",
        tenant_id = %tenant_id,
        subject = %subject,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        duration_ms = started.elapsed().as_millis() as u64,
        "Request completed"
    );

    response
}
