//! Pipeline-protected sample surface.
//!
//! Handlers here consume the injected context; none of them resolve
//! tenants or verify tokens themselves.

use axum::{extract::State, Json};
use serde_json::json;

use crate::error::AppError;
use crate::middleware::RequestIdentity;
use crate::services::TenantContext;
use crate::AppState;

/// Echo the injected identity and tenant context.
pub async fn whoami(
    context: TenantContext,
    identity: RequestIdentity,
) -> Json<serde_json::Value> {
    Json(json!({
        "subject": identity.subject,
        "role": identity.role,
        "tenant_id": context.tenant_id,
        "subdomain": context.subdomain,
        "resolved_at": context.resolved_at,
    }))
}

/// Borrow a pooled connection for the resolved tenant and ping it. This is
/// the downstream-consumer entry point exercised end to end.
pub async fn tenant_db_ping(
    State(state): State<AppState>,
    context: TenantContext,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut conn = state.pools.borrow(context.tenant_id).await?;
    conn.connection().ping().await?;

    Ok(Json(json!({
        "tenant_id": context.tenant_id,
        "database": "up",
    })))
}
