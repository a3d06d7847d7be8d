//! Administrative tenant operations: thin delegations onto the registry,
//! gated by the pipeline plus the admin role check.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    CreateTenantRequest, RotateCredentialsRequest, TenantPage, TenantResponse,
    UpdateTenantRequest,
};
use crate::services::pool::PoolStats;
use crate::AppState;

pub async fn create_tenant(
    State(state): State<AppState>,
    Json(req): Json<CreateTenantRequest>,
) -> Result<(StatusCode, Json<TenantResponse>), AppError> {
    let tenant = state.registry.create(&req).await?;
    Ok((StatusCode::CREATED, Json(tenant.into())))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn list_tenants(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<TenantPage>, AppError> {
    let page = state.registry.list(query.limit, query.offset).await?;
    Ok(Json(page))
}

pub async fn get_tenant(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TenantResponse>, AppError> {
    let tenant = state.registry.get_by_id(id).await?;
    Ok(Json(tenant.into()))
}

pub async fn update_tenant(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateTenantRequest>,
) -> Result<Json<TenantResponse>, AppError> {
    let tenant = state.registry.update(id, &req).await?;
    Ok(Json(tenant.into()))
}

/// Suspend a tenant. The registry row flips first, then the credential
/// cache entry and any warm pool are revoked so the suspension bites
/// immediately, not at the next resolution.
pub async fn suspend_tenant(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TenantResponse>, AppError> {
    let tenant = state.registry.suspend(id).await?;
    state.pools.revoke(id).await;
    Ok(Json(tenant.into()))
}

pub async fn reactivate_tenant(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TenantResponse>, AppError> {
    let tenant = state.registry.reactivate(id).await?;
    Ok(Json(tenant.into()))
}

/// Rotate a tenant's credentials. Revokes the pool and cached descriptor
/// so new borrows connect with the fresh credentials.
pub async fn rotate_credentials(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RotateCredentialsRequest>,
) -> Result<Json<TenantResponse>, AppError> {
    let tenant = state.registry.rotate_credentials(id, &req).await?;
    state.pools.revoke(id).await;
    Ok(Json(tenant.into()))
}

pub async fn pool_stats(State(state): State<AppState>) -> Json<Vec<PoolStats>> {
    Json(state.pools.stats())
}
