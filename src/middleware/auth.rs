//! Pipeline stage 2: identity verification.
//!
//! Extracts the bearer token and verifies its signature, expiry, and claim
//! set. Every failure mode maps to the same 401; the precise cause only
//! reaches the logs.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::AppState;

pub async fn verify_token_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    let claims = state.tokens.verify(token).map_err(|err| {
        tracing::debug!(reason = %err, "Token verification failed");
        AppError::Unauthorized
    })?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
