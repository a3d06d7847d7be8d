pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use axum::{
    extract::State,
    http::HeaderValue,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AppConfig;
use crate::error::AppError;
use crate::middleware::{
    audit_middleware, cross_check_middleware, require_admin_middleware,
    resolve_tenant_middleware, verify_token_middleware,
};
use crate::services::{PoolManager, TenantRegistry, TenantResolver, TokenService};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub registry: TenantRegistry,
    pub resolver: Arc<TenantResolver>,
    pub tokens: TokenService,
    pub pools: Arc<PoolManager>,
}

/// Assemble the router.
///
/// The pipeline's fixed stage order is the layer order on the protected
/// groups: tenant resolution, then token verification, then the
/// cross-tenant cross-check with context injection, then audit logging
/// around the handler. Public paths (health, login) carry none of it.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/whoami", get(handlers::app::whoami))
        .route("/tenant/db/ping", get(handlers::app::tenant_db_ping))
        .layer(from_fn(audit_middleware))
        .layer(from_fn(cross_check_middleware))
        .layer(from_fn_with_state(state.clone(), verify_token_middleware))
        .layer(from_fn_with_state(
            state.clone(),
            resolve_tenant_middleware,
        ));

    let admin = Router::new()
        .route(
            "/admin/tenants",
            post(handlers::admin::create_tenant).get(handlers::admin::list_tenants),
        )
        .route(
            "/admin/tenants/:id",
            get(handlers::admin::get_tenant).patch(handlers::admin::update_tenant),
        )
        .route(
            "/admin/tenants/:id/suspend",
            post(handlers::admin::suspend_tenant),
        )
        .route(
            "/admin/tenants/:id/reactivate",
            post(handlers::admin::reactivate_tenant),
        )
        .route(
            "/admin/tenants/:id/rotate-credentials",
            post(handlers::admin::rotate_credentials),
        )
        .route("/admin/pools", get(handlers::admin::pool_stats))
        .layer(from_fn(audit_middleware))
        .layer(from_fn(require_admin_middleware))
        .layer(from_fn(cross_check_middleware))
        .layer(from_fn_with_state(state.clone(), verify_token_middleware))
        .layer(from_fn_with_state(
            state.clone(),
            resolve_tenant_middleware,
        ));

    let cors = CorsLayer::new().allow_origin(
        state
            .config
            .security
            .allowed_origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::error!(origin = %origin, error = %e, "Invalid CORS origin, skipping");
                    None
                }
            })
            .collect::<Vec<HeaderValue>>(),
    );

    Router::new()
        .route("/health", get(health_check))
        .route("/auth/login", post(handlers::auth::login))
        .merge(protected)
        .merge(admin)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Service health check: liveness plus registry connectivity.
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.registry.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Registry health check failed");
        e
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "checks": {
            "postgres": "up"
        }
    })))
}
