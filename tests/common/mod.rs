//! Shared fixtures: an in-memory tenant directory and a mock connection
//! opener, wired through the same seams production uses.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use secrecy::{ExposeSecret, Secret};
use sqlx::postgres::PgPoolOptions;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use tenancy_service::{
    config::{
        AppConfig, CredentialCacheConfig, DatabaseConfig, Environment, PoolConfig,
        SecurityConfig, TenancyConfig, TokenConfig,
    },
    crypto::{derive_signing_key, CredentialCipher},
    error::AppError,
    models::Tenant,
    services::{
        ConnectionOpener, CredentialCache, CredentialSource, PoolManager, TenantConnection,
        TenantDirectory, TenantRegistry, TenantResolver, TokenService,
    },
    AppState,
};

pub const TEST_SECRET: &str = "an-application-secret-for-tests-0123456789";

/// In-memory tenant directory standing in for the Postgres registry.
pub struct TestDirectory {
    tenants: DashMap<String, Tenant>,
    decrypt_calls: AtomicUsize,
}

impl TestDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tenants: DashMap::new(),
            decrypt_calls: AtomicUsize::new(0),
        })
    }

    pub fn add_tenant(&self, subdomain: &str) -> Uuid {
        let now = Utc::now();
        let tenant = Tenant {
            id: Uuid::new_v4(),
            subdomain: subdomain.to_string(),
            display_name: subdomain.to_string(),
            encrypted_connection: String::new(),
            encrypted_extra_credentials: None,
            is_active: true,
            suspended_at: None,
            created_at: now,
            updated_at: now,
        };
        let id = tenant.id;
        self.tenants.insert(subdomain.to_string(), tenant);
        id
    }

    pub fn suspend(&self, subdomain: &str) {
        if let Some(mut tenant) = self.tenants.get_mut(subdomain) {
            tenant.is_active = false;
            tenant.suspended_at = Some(Utc::now());
        }
    }

    pub fn decrypt_calls(&self) -> usize {
        self.decrypt_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TenantDirectory for TestDirectory {
    async fn tenant_by_subdomain(&self, subdomain: &str) -> Result<Option<Tenant>, AppError> {
        Ok(self
            .tenants
            .get(&subdomain.to_ascii_lowercase())
            .map(|t| t.clone()))
    }
}

#[async_trait]
impl CredentialSource for TestDirectory {
    async fn decrypted_credentials(&self, tenant_id: Uuid) -> Result<Secret<String>, AppError> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        let tenant = self
            .tenants
            .iter()
            .find(|t| t.id == tenant_id)
            .map(|t| t.clone())
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("tenant {} not found", tenant_id)))?;
        if !tenant.is_active {
            return Err(AppError::TenantSuspended(tenant.subdomain));
        }
        Ok(Secret::new(format!("mock://{}", tenant.subdomain)))
    }
}

/// Credential source whose first fetch parks until released, for
/// interleaving tenant lifecycle operations with an in-flight pool
/// creation. The active flag is read at the start of the fetch, the way a
/// registry read sees the row as it was before a concurrent suspension.
pub struct GatedSource {
    pub active: AtomicBool,
    first_fetch: AtomicBool,
    pub entered: tokio::sync::Notify,
    pub release: tokio::sync::Notify,
}

impl GatedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            active: AtomicBool::new(true),
            first_fetch: AtomicBool::new(true),
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        })
    }
}

#[async_trait]
impl CredentialSource for GatedSource {
    async fn decrypted_credentials(&self, tenant_id: Uuid) -> Result<Secret<String>, AppError> {
        let active_at_read = self.active.load(Ordering::SeqCst);
        if self.first_fetch.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        if !active_at_read {
            return Err(AppError::TenantSuspended(tenant_id.to_string()));
        }
        Ok(Secret::new("mock://gated".to_string()))
    }
}

/// Connection opener that tracks how many physical connections exist.
pub struct MockOpener {
    pub opens: AtomicUsize,
    pub live: Arc<AtomicUsize>,
    pub max_live: Arc<AtomicUsize>,
    pub open_delay: Duration,
}

impl MockOpener {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::from_millis(0))
    }

    pub fn with_delay(open_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            opens: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
            max_live: Arc::new(AtomicUsize::new(0)),
            open_delay,
        })
    }
}

pub struct MockConn {
    pub descriptor: String,
    live: Arc<AtomicUsize>,
}

#[async_trait]
impl TenantConnection for MockConn {
    async fn ping(&mut self) -> Result<(), AppError> {
        Ok(())
    }
}

impl Drop for MockConn {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectionOpener for MockOpener {
    async fn open(
        &self,
        descriptor: &Secret<String>,
    ) -> Result<Box<dyn TenantConnection>, AppError> {
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        let now_live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(now_live, Ordering::SeqCst);
        Ok(Box::new(MockConn {
            descriptor: descriptor.expose_secret().clone(),
            live: Arc::clone(&self.live),
        }))
    }
}

pub fn pool_config(max_size: usize, acquire: Duration, idle_eviction: Duration) -> PoolConfig {
    PoolConfig {
        max_size,
        acquire_timeout: acquire,
        idle_eviction,
        sweep_interval: Duration::from_secs(3600),
    }
}

pub fn pool_manager(
    directory: Arc<TestDirectory>,
    opener: Arc<MockOpener>,
    config: PoolConfig,
) -> Arc<PoolManager> {
    let credentials = Arc::new(CredentialCache::new(
        directory as Arc<dyn CredentialSource>,
        Duration::from_secs(900),
    ));
    Arc::new(PoolManager::new(opener, credentials, config))
}

pub fn test_config() -> AppConfig {
    AppConfig {
        environment: Environment::Dev,
        service_name: "tenancy-service".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        port: 0,
        database: DatabaseConfig {
            url: "postgres://localhost/tenancy_unused".to_string(),
            max_connections: 1,
            min_connections: 0,
        },
        security: SecurityConfig {
            app_secret: Secret::new(TEST_SECRET.to_string()),
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        tenancy: TenancyConfig {
            root_domain: "example.com".to_string(),
            default_tenant_subdomain: "demo".to_string(),
        },
        token: TokenConfig { ttl_minutes: 30 },
        pool: pool_config(10, Duration::from_millis(200), Duration::from_secs(1800)),
        credential_cache: CredentialCacheConfig {
            ttl: Duration::from_secs(900),
        },
    }
}

/// Build an `AppState` over the in-memory directory. The registry keeps a
/// lazily-connecting Postgres handle that no pipeline test ever touches.
pub fn test_state(directory: Arc<TestDirectory>) -> AppState {
    let config = test_config();

    let cipher = Arc::new(
        CredentialCipher::from_secret(&config.security.app_secret)
            .expect("cipher from test secret"),
    );
    let pg = PgPoolOptions::new()
        .connect_lazy(&config.database.url)
        .expect("lazy pool");
    let registry = TenantRegistry::new(pg, cipher);

    let resolver = Arc::new(TenantResolver::new(
        directory.clone() as Arc<dyn TenantDirectory>,
        &config.tenancy.root_domain,
        &config.tenancy.default_tenant_subdomain,
    ));

    let signing_key = derive_signing_key(&config.security.app_secret).expect("signing key");
    let tokens = TokenService::new(&signing_key, config.token.ttl_minutes);

    let pools = pool_manager(directory, MockOpener::new(), config.pool.clone());

    AppState {
        config,
        registry,
        resolver,
        tokens,
        pools,
    }
}
