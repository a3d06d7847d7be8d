//! Tenant registry store over PostgreSQL.
//!
//! Owns all reads and writes of the `tenants` table. Credential fields are
//! encrypted through the cipher before they are persisted; the only decrypt
//! path out of this module is the `CredentialSource` impl consumed by the
//! pool manager.

use async_trait::async_trait;
use chrono::Utc;
use secrecy::Secret;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::crypto::CredentialCipher;
use crate::error::AppError;
use crate::models::{
    validate_subdomain, CreateTenantRequest, RotateCredentialsRequest, Tenant, TenantPage,
    TenantResponse, UpdateTenantRequest,
};
use crate::services::credentials::CredentialSource;
use crate::services::resolver::TenantDirectory;

const RETURNING_COLUMNS: &str = "id, subdomain, display_name, encrypted_connection, \
     encrypted_extra_credentials, is_active, suspended_at, created_at, updated_at";

/// Create the registry's own connection pool.
pub async fn create_pool(
    url: &str,
    max_connections: u32,
    min_connections: u32,
) -> Result<PgPool, AppError> {
    info!("Connecting to PostgreSQL");

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect(url)
        .await?;

    info!("Successfully connected to PostgreSQL");
    Ok(pool)
}

/// Run registry migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), AppError> {
    info!("Running database migrations");
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations completed");
    Ok(())
}

#[derive(Clone)]
pub struct TenantRegistry {
    pool: PgPool,
    cipher: Arc<CredentialCipher>,
}

impl TenantRegistry {
    pub fn new(pool: PgPool, cipher: Arc<CredentialCipher>) -> Self {
        Self { pool, cipher }
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Create a tenant. The subdomain is validated against the grammar and
    /// both credential fields are encrypted before the row is written.
    #[instrument(skip(self, req), fields(subdomain = %req.subdomain))]
    pub async fn create(&self, req: &CreateTenantRequest) -> Result<Tenant, AppError> {
        req.validate()?;
        validate_subdomain(&req.subdomain)?;

        let encrypted_connection = self.cipher.encrypt(&req.connection_string)?;
        let encrypted_extra = req
            .extra_credentials
            .as_deref()
            .map(|extra| self.cipher.encrypt(extra))
            .transpose()?;

        let tenant = sqlx::query_as::<_, Tenant>(&format!(
            "INSERT INTO tenants (id, subdomain, display_name, encrypted_connection, \
             encrypted_extra_credentials, is_active, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, TRUE, now(), now()) \
             RETURNING {RETURNING_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&req.subdomain)
        .bind(&req.display_name)
        .bind(&encrypted_connection)
        .bind(&encrypted_extra)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::DuplicateSubdomain(req.subdomain.clone())
            }
            _ => AppError::from(e),
        })?;

        info!(tenant_id = %tenant.id, subdomain = %tenant.subdomain, "Tenant created");
        Ok(tenant)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Tenant, AppError> {
        sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {RETURNING_COLUMNS} FROM tenants WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Tenant {} not found", id)))
    }

    /// Case-insensitive subdomain lookup.
    pub async fn get_by_subdomain(&self, subdomain: &str) -> Result<Option<Tenant>, AppError> {
        let tenant = sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {RETURNING_COLUMNS} FROM tenants WHERE lower(subdomain) = lower($1)"
        ))
        .bind(subdomain)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tenant)
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<TenantPage, AppError> {
        let limit = limit.clamp(1, 200);
        let offset = offset.max(0);

        let tenants = sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {RETURNING_COLUMNS} FROM tenants ORDER BY created_at LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(TenantPage {
            tenants: tenants.into_iter().map(TenantResponse::from).collect(),
            limit,
            offset,
        })
    }

    /// Update mutable metadata. Credentials and subdomain are not reachable
    /// through this path.
    pub async fn update(&self, id: Uuid, req: &UpdateTenantRequest) -> Result<Tenant, AppError> {
        req.validate()?;

        sqlx::query_as::<_, Tenant>(&format!(
            "UPDATE tenants SET display_name = $2, updated_at = now() WHERE id = $1 \
             RETURNING {RETURNING_COLUMNS}"
        ))
        .bind(id)
        .bind(&req.display_name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Tenant {} not found", id)))
    }

    #[instrument(skip(self))]
    pub async fn suspend(&self, id: Uuid) -> Result<Tenant, AppError> {
        let tenant = self.get_by_id(id).await?;
        if !tenant.is_active {
            return Ok(tenant);
        }

        let tenant = sqlx::query_as::<_, Tenant>(&format!(
            "UPDATE tenants SET is_active = FALSE, suspended_at = $2, updated_at = now() \
             WHERE id = $1 RETURNING {RETURNING_COLUMNS}"
        ))
        .bind(id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        info!(tenant_id = %id, subdomain = %tenant.subdomain, "Tenant suspended");
        Ok(tenant)
    }

    /// Reactivate a suspended tenant. Fails if the tenant was never
    /// suspended.
    #[instrument(skip(self))]
    pub async fn reactivate(&self, id: Uuid) -> Result<Tenant, AppError> {
        let tenant = self.get_by_id(id).await?;
        if tenant.suspended_at.is_none() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Tenant {} was never suspended",
                id
            )));
        }

        let tenant = sqlx::query_as::<_, Tenant>(&format!(
            "UPDATE tenants SET is_active = TRUE, suspended_at = NULL, updated_at = now() \
             WHERE id = $1 RETURNING {RETURNING_COLUMNS}"
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        info!(tenant_id = %id, subdomain = %tenant.subdomain, "Tenant reactivated");
        Ok(tenant)
    }

    /// Privileged credential rotation, separate from the metadata update
    /// path. Callers must also revoke the tenant's pool so stale
    /// connections and cache entries are dropped.
    #[instrument(skip(self, req))]
    pub async fn rotate_credentials(
        &self,
        id: Uuid,
        req: &RotateCredentialsRequest,
    ) -> Result<Tenant, AppError> {
        req.validate()?;

        let encrypted_connection = self.cipher.encrypt(&req.connection_string)?;
        let encrypted_extra = req
            .extra_credentials
            .as_deref()
            .map(|extra| self.cipher.encrypt(extra))
            .transpose()?;

        let tenant = sqlx::query_as::<_, Tenant>(&format!(
            "UPDATE tenants SET encrypted_connection = $2, encrypted_extra_credentials = $3, \
             updated_at = now() WHERE id = $1 RETURNING {RETURNING_COLUMNS}"
        ))
        .bind(id)
        .bind(&encrypted_connection)
        .bind(&encrypted_extra)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Tenant {} not found", id)))?;

        info!(tenant_id = %id, subdomain = %tenant.subdomain, "Tenant credentials rotated");
        Ok(tenant)
    }
}

#[async_trait]
impl TenantDirectory for TenantRegistry {
    async fn tenant_by_subdomain(&self, subdomain: &str) -> Result<Option<Tenant>, AppError> {
        self.get_by_subdomain(subdomain).await
    }
}

#[async_trait]
impl CredentialSource for TenantRegistry {
    async fn decrypted_credentials(&self, tenant_id: Uuid) -> Result<Secret<String>, AppError> {
        let tenant = self.get_by_id(tenant_id).await?;
        if !tenant.is_active {
            return Err(AppError::TenantSuspended(tenant.subdomain));
        }
        self.cipher.decrypt(&tenant.encrypted_connection)
    }
}
