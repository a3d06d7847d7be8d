//! Tenant model - root of the isolation hierarchy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;

/// Maximum subdomain length, matching the DNS label bound.
const MAX_SUBDOMAIN_LEN: usize = 63;

/// Tenant entity as persisted in the `tenants` table.
///
/// Lifecycle is soft: rows are suspended and reactivated, never deleted.
/// Invariant: `is_active` and a non-null `suspended_at` never hold together.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub id: Uuid,
    pub subdomain: String,
    pub display_name: String,
    /// AES-256-GCM ciphertext of the connection descriptor.
    pub encrypted_connection: String,
    /// Optional ciphertext for vendor-specific extra credentials.
    pub encrypted_extra_credentials: Option<String>,
    pub is_active: bool,
    pub suspended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validate the subdomain grammar: lowercase alphanumeric plus internal
/// hyphens, no leading or trailing hyphen, at most one DNS label long.
pub fn validate_subdomain(candidate: &str) -> Result<(), AppError> {
    let bytes = candidate.as_bytes();

    let well_formed = !bytes.is_empty()
        && bytes.len() <= MAX_SUBDOMAIN_LEN
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes[0] != b'-'
        && bytes[bytes.len() - 1] != b'-';

    if well_formed {
        Ok(())
    } else {
        Err(AppError::InvalidSubdomain(candidate.to_string()))
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTenantRequest {
    pub subdomain: String,
    #[validate(length(min = 1, max = 200))]
    pub display_name: String,
    #[validate(length(min = 1))]
    pub connection_string: String,
    pub extra_credentials: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateTenantRequest {
    #[validate(length(min = 1, max = 200))]
    pub display_name: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RotateCredentialsRequest {
    #[validate(length(min = 1))]
    pub connection_string: String,
    pub extra_credentials: Option<String>,
}

/// Tenant as exposed over the API. Credential ciphertext never leaves the
/// service, so the encrypted columns are deliberately absent here.
#[derive(Debug, Serialize)]
pub struct TenantResponse {
    pub id: Uuid,
    pub subdomain: String,
    pub display_name: String,
    pub is_active: bool,
    pub suspended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Tenant> for TenantResponse {
    fn from(t: Tenant) -> Self {
        Self {
            id: t.id,
            subdomain: t.subdomain,
            display_name: t.display_name,
            is_active: t.is_active,
            suspended_at: t.suspended_at,
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TenantPage {
    pub tenants: Vec<TenantResponse>,
    pub limit: i64,
    pub offset: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_subdomains() {
        for s in ["acme", "acme-corp", "a", "tenant42", "4chan", "a-b-c"] {
            assert!(validate_subdomain(s).is_ok(), "{} should be valid", s);
        }
    }

    #[test]
    fn rejects_malformed_subdomains() {
        for s in [
            "",
            "-acme",
            "acme-",
            "Acme",
            "acme.corp",
            "acme_corp",
            "acme corp",
            "tenant!",
            "über",
        ] {
            assert!(validate_subdomain(s).is_err(), "{} should be rejected", s);
        }
    }

    #[test]
    fn rejects_overlong_subdomain() {
        let long = "a".repeat(64);
        assert!(validate_subdomain(&long).is_err());
        let max = "a".repeat(63);
        assert!(validate_subdomain(&max).is_ok());
    }
}
