//! Admin role gate, applied after context injection on the administrative
//! surface.

use axum::{extract::Request, middleware::Next, response::Response};

use crate::error::AppError;
use crate::middleware::cross_check::RequestIdentity;

const ADMIN_ROLE: &str = "admin";

pub async fn require_admin_middleware(req: Request, next: Next) -> Result<Response, AppError> {
    let identity = req.extensions().get::<RequestIdentity>().ok_or_else(|| {
        AppError::InternalError(anyhow::anyhow!("admin gate reached without identity"))
    })?;

    if identity.role != ADMIN_ROLE {
        tracing::warn!(
            target: "security",
            subject = %identity.subject,
            role = %identity.role,
            path = %req.uri().path(),
            "Non-admin access to administrative surface denied"
        );
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Administrative role required"
        )));
    }

    Ok(next.run(req).await)
}
