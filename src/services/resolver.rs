//! Tenant context resolution: raw host string to `TenantContext`.

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{validate_subdomain, Tenant};

/// Lookup seam between the resolver and the registry. Lets the pipeline be
/// exercised against an in-memory directory in tests.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Case-insensitive lookup by subdomain.
    async fn tenant_by_subdomain(&self, subdomain: &str) -> Result<Option<Tenant>, AppError>;
}

/// Request-scoped tenant context. Carries no credentials: the connection
/// descriptor is resolved lazily by the pool manager on first borrow, so
/// requests that never touch tenant data never pay the decryption cost.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    pub subdomain: String,
    pub resolved_at: DateTime<Utc>,
}

pub struct TenantResolver {
    directory: Arc<dyn TenantDirectory>,
    root_domain: String,
    default_tenant_subdomain: String,
}

impl TenantResolver {
    pub fn new(
        directory: Arc<dyn TenantDirectory>,
        root_domain: &str,
        default_tenant_subdomain: &str,
    ) -> Self {
        Self {
            directory,
            root_domain: root_domain.to_ascii_lowercase(),
            default_tenant_subdomain: default_tenant_subdomain.to_ascii_lowercase(),
        }
    }

    /// Resolve the raw `Host` header value to a tenant context.
    ///
    /// The left-most dot-separated label is the subdomain candidate; the
    /// bare root domain and loopback hosts map to the default tenant.
    /// Malformed candidates are rejected before any registry lookup.
    pub async fn resolve(&self, host: &str) -> Result<TenantContext, AppError> {
        let candidate = self.subdomain_candidate(host);
        validate_subdomain(&candidate)?;

        let tenant = self
            .directory
            .tenant_by_subdomain(&candidate)
            .await?
            .ok_or_else(|| AppError::TenantNotFound(candidate.clone()))?;

        if !tenant.is_active {
            return Err(AppError::TenantSuspended(tenant.subdomain));
        }

        Ok(TenantContext {
            tenant_id: tenant.id,
            subdomain: tenant.subdomain,
            resolved_at: Utc::now(),
        })
    }

    fn subdomain_candidate(&self, host: &str) -> String {
        let host = strip_port(host).to_ascii_lowercase();

        if host == self.root_domain || is_loopback(&host) {
            return self.default_tenant_subdomain.clone();
        }

        match host.split_once('.') {
            Some((label, _)) => label.to_string(),
            None => host,
        }
    }
}

fn strip_port(host: &str) -> &str {
    // Bracketed IPv6 hosts keep their brackets so the colon inside is not
    // mistaken for a port separator.
    if let Some(rest) = host.strip_prefix('[') {
        match rest.split_once(']') {
            Some((addr, _)) => return addr,
            None => return host,
        }
    }
    match host.split_once(':') {
        Some((name, _)) => name,
        None => host,
    }
}

fn is_loopback(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<TenantContext>()
            .cloned()
            .ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!("Tenant context not found in request"))
            })
    }
}
