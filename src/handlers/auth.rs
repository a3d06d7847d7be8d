//! Token issuance (public path).
//!
//! Login resolves the tenant from the `Host` header itself because public
//! paths bypass the pipeline. Verifying the subject's own credentials
//! (passwords, SSO) belongs to the external identity collaborator; this
//! service only binds a verified subject to its tenant and signs the
//! result.

use axum::{
    extract::{Host, State},
    Json,
};
use serde::Deserialize;
use validator::Validate;

use crate::error::AppError;
use crate::services::token::TokenResponse;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 200))]
    pub subject: String,
    #[validate(length(min = 1, max = 64))]
    pub role: String,
}

pub async fn login(
    State(state): State<AppState>,
    Host(host): Host,
    Json(login): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    login.validate()?;

    let context = state.resolver.resolve(&host).await?;

    let access_token = state
        .tokens
        .issue_default(
            &login.subject,
            context.tenant_id,
            &context.subdomain,
            &login.role,
        )
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("token issuance failed: {}", e)))?;

    tracing::info!(
        tenant_id = %context.tenant_id,
        subject = %login.subject,
        role = %login.role,
        "Identity token issued"
    );

    Ok(Json(TokenResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.tokens.default_ttl_seconds(),
    }))
}
