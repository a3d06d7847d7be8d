//! Per-tenant bounded connection pools.
//!
//! Exactly one live pool per tenant, capped at `max_size` physical
//! connections, with no connection ever crossing tenants. First borrow for
//! a tenant builds the pool under that tenant's creation lock; borrows for
//! other tenants never contend with it. A background sweep evicts pools
//! that have sat idle past the configured threshold.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use sqlx::postgres::PgConnection;
use sqlx::Connection;
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::error::AppError;
use crate::services::credentials::CredentialCache;

/// A live physical connection to a tenant's dedicated store.
#[async_trait]
pub trait TenantConnection: Send {
    /// Liveness probe against the underlying connection.
    async fn ping(&mut self) -> Result<(), AppError>;
}

/// Opens physical connections from a decrypted connection descriptor.
/// The pool manager is the only caller.
#[async_trait]
pub trait ConnectionOpener: Send + Sync {
    async fn open(&self, descriptor: &Secret<String>)
        -> Result<Box<dyn TenantConnection>, AppError>;
}

/// Production opener: one `PgConnection` per slot.
pub struct PgConnectionOpener;

struct PgTenantConnection(PgConnection);

#[async_trait]
impl TenantConnection for PgTenantConnection {
    async fn ping(&mut self) -> Result<(), AppError> {
        self.0
            .ping()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::Error::new(e)))
    }
}

#[async_trait]
impl ConnectionOpener for PgConnectionOpener {
    async fn open(
        &self,
        descriptor: &Secret<String>,
    ) -> Result<Box<dyn TenantConnection>, AppError> {
        let conn = PgConnection::connect(descriptor.expose_secret())
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::Error::new(e)))?;
        Ok(Box::new(PgTenantConnection(conn)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolState {
    Open,
    /// Closed because the tenant was suspended or rotated.
    Revoked,
    /// Closed by the idle sweep; a later borrow may rebuild the pool.
    Swept,
}

enum BorrowFailure {
    Timeout,
    Closed(PoolState),
    App(AppError),
}

/// Decrements the waiter count even when the borrow future is dropped.
struct WaitGuard<'a>(&'a AtomicUsize);

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct TenantPool {
    tenant_id: Uuid,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Box<dyn TenantConnection>>>,
    state: AtomicU8,
    active: AtomicUsize,
    waiting: AtomicUsize,
    created_at: DateTime<Utc>,
    /// Unix millis of the most recent borrow or return.
    last_used_at: AtomicI64,
}

impl TenantPool {
    fn new(tenant_id: Uuid, max_size: usize) -> Self {
        Self {
            tenant_id,
            permits: Arc::new(Semaphore::new(max_size)),
            idle: Mutex::new(Vec::new()),
            state: AtomicU8::new(PoolState::Open as u8),
            active: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
            created_at: Utc::now(),
            last_used_at: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    fn state(&self) -> PoolState {
        match self.state.load(Ordering::SeqCst) {
            0 => PoolState::Open,
            1 => PoolState::Revoked,
            _ => PoolState::Swept,
        }
    }

    fn touch(&self) {
        self.last_used_at
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    fn take_idle(&self) -> Option<Box<dyn TenantConnection>> {
        self.idle.lock().expect("pool idle list lock").pop()
    }

    fn return_idle(&self, conn: Box<dyn TenantConnection>) {
        self.idle.lock().expect("pool idle list lock").push(conn);
    }

    /// Close the pool: wake every waiter and drop idle connections.
    fn close(&self, state: PoolState) {
        self.state.store(state as u8, Ordering::SeqCst);
        self.permits.close();
        self.idle.lock().expect("pool idle list lock").clear();
    }

    async fn acquire(
        self: &Arc<Self>,
        opener: &dyn ConnectionOpener,
        credentials: &CredentialCache,
        acquire_timeout: Duration,
    ) -> Result<PooledConnection, BorrowFailure> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let wait_guard = WaitGuard(&self.waiting);
        let permit =
            tokio::time::timeout(acquire_timeout, self.permits.clone().acquire_owned()).await;
        drop(wait_guard);

        // Dropping the timed future on caller disconnect abandons the wait
        // without claiming a slot; the guard keeps the waiter count honest.
        let permit = match permit {
            Err(_) => return Err(BorrowFailure::Timeout),
            Ok(Err(_)) => return Err(BorrowFailure::Closed(self.state())),
            Ok(Ok(permit)) => permit,
        };

        if self.state() != PoolState::Open {
            return Err(BorrowFailure::Closed(self.state()));
        }

        let conn = match self.take_idle() {
            Some(conn) => conn,
            None => {
                // Physical connections open lazily; the descriptor comes
                // from the credential cache, never straight from storage.
                let descriptor = credentials
                    .descriptor_for(self.tenant_id)
                    .await
                    .map_err(BorrowFailure::App)?;
                opener.open(&descriptor).await.map_err(BorrowFailure::App)?
            }
        };

        self.active.fetch_add(1, Ordering::SeqCst);
        self.touch();

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }
}

/// A borrowed connection. Returning it to the pool is its drop behavior;
/// if the pool was closed in the meantime the connection is dropped
/// instead of re-pooled.
pub struct PooledConnection {
    conn: Option<Box<dyn TenantConnection>>,
    pool: Arc<TenantPool>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("tenant_id", &self.pool.tenant_id)
            .finish_non_exhaustive()
    }
}

impl PooledConnection {
    pub fn tenant_id(&self) -> Uuid {
        self.pool.tenant_id
    }

    pub fn connection(&mut self) -> &mut dyn TenantConnection {
        self.conn
            .as_deref_mut()
            .expect("connection present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.pool.active.fetch_sub(1, Ordering::SeqCst);
        self.pool.touch();
        if let Some(conn) = self.conn.take() {
            if self.pool.state() == PoolState::Open {
                self.pool.return_idle(conn);
            }
        }
        // The permit drops after the connection is back in the idle list,
        // so the freed slot always finds it there.
    }
}

/// Operational counters for one tenant pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub tenant_id: Uuid,
    pub active: usize,
    pub idle: usize,
    pub waiting: usize,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

/// Owner of every tenant pool and of the per-tenant creation locks.
/// No other component constructs raw connections.
pub struct PoolManager {
    pools: DashMap<Uuid, Arc<TenantPool>>,
    creation_locks: DashMap<Uuid, Arc<tokio::sync::Mutex<()>>>,
    opener: Arc<dyn ConnectionOpener>,
    credentials: Arc<CredentialCache>,
    config: PoolConfig,
}

impl PoolManager {
    pub fn new(
        opener: Arc<dyn ConnectionOpener>,
        credentials: Arc<CredentialCache>,
        config: PoolConfig,
    ) -> Self {
        Self {
            pools: DashMap::new(),
            creation_locks: DashMap::new(),
            opener,
            credentials,
            config,
        }
    }

    /// Borrow a connection for a tenant, blocking up to the configured
    /// timeout for a free slot. This is the single entry point for every
    /// downstream consumer.
    pub async fn borrow(&self, tenant_id: Uuid) -> Result<PooledConnection, AppError> {
        loop {
            let pool = self.pool_for(tenant_id).await?;
            match pool
                .acquire(
                    self.opener.as_ref(),
                    &self.credentials,
                    self.config.acquire_timeout,
                )
                .await
            {
                Ok(conn) => return Ok(conn),
                Err(BorrowFailure::Timeout) => return Err(AppError::PoolTimeout),
                Err(BorrowFailure::App(err)) => return Err(err),
                Err(BorrowFailure::Closed(state)) => {
                    // The pool died under us, either swept while idle or
                    // revoked for rotation or suspension. Drop the dead
                    // instance and rebuild; recreation re-checks the
                    // tenant through the credential source, so a
                    // suspended tenant still comes back as an error.
                    debug!(
                        tenant_id = %tenant_id,
                        state = ?state,
                        "Pool closed under borrower, rebuilding"
                    );
                    self.pools
                        .remove_if(&tenant_id, |_, p| Arc::ptr_eq(p, &pool));
                    continue;
                }
            }
        }
    }

    /// Get or lazily create the tenant's pool. Creation is serialized per
    /// tenant: the first requester builds, racers wait on the same lock and
    /// then find the published pool.
    async fn pool_for(&self, tenant_id: Uuid) -> Result<Arc<TenantPool>, AppError> {
        if let Some(pool) = self.pools.get(&tenant_id) {
            return Ok(Arc::clone(&pool));
        }

        let lock = self
            .creation_locks
            .entry(tenant_id)
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        if let Some(pool) = self.pools.get(&tenant_id) {
            return Ok(Arc::clone(&pool));
        }

        // Prime the credential cache before publishing: suspension and
        // decryption failures surface here, and a suspended tenant never
        // gets a fresh pool.
        self.credentials.descriptor_for(tenant_id).await?;

        let pool = Arc::new(TenantPool::new(tenant_id, self.config.max_size));
        self.pools.insert(tenant_id, Arc::clone(&pool));
        info!(
            tenant_id = %tenant_id,
            max_size = self.config.max_size,
            "Tenant connection pool created"
        );
        Ok(pool)
    }

    /// Forced closure for suspension and credential rotation: invalidate
    /// the cached descriptor, close the pool, and drop it from the map.
    /// In-flight borrows finish their current work; nothing new is handed
    /// out.
    ///
    /// Runs under the tenant's creation lock so it cannot interleave with
    /// `pool_for`: a creation that read the tenant row before the
    /// suspension landed finishes publishing first and is then torn down
    /// here, cache entry included.
    pub async fn revoke(&self, tenant_id: Uuid) {
        let lock = self
            .creation_locks
            .entry(tenant_id)
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        self.credentials.invalidate(tenant_id);
        if let Some((_, pool)) = self.pools.remove(&tenant_id) {
            pool.close(PoolState::Revoked);
            warn!(tenant_id = %tenant_id, "Tenant connection pool revoked");
        }
    }

    /// One sweep pass: evict pools with zero borrowers and no waiters that
    /// have been idle past the threshold.
    pub fn sweep_idle_pools(&self) {
        let threshold_ms = self.config.idle_eviction.as_millis() as i64;
        let now_ms = Utc::now().timestamp_millis();

        let expired: Vec<Uuid> = self
            .pools
            .iter()
            .filter(|entry| {
                let pool = entry.value();
                pool.active.load(Ordering::SeqCst) == 0
                    && pool.waiting.load(Ordering::SeqCst) == 0
                    && now_ms - pool.last_used_at.load(Ordering::SeqCst) >= threshold_ms
            })
            .map(|entry| *entry.key())
            .collect();

        for tenant_id in expired {
            let removed = self.pools.remove_if(&tenant_id, |_, pool| {
                pool.active.load(Ordering::SeqCst) == 0
                    && pool.waiting.load(Ordering::SeqCst) == 0
            });
            if let Some((_, pool)) = removed {
                pool.close(PoolState::Swept);
                info!(tenant_id = %tenant_id, "Idle tenant connection pool evicted");
            }
        }
    }

    /// Periodic sweep driver, spawned from `main`.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.config.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                manager.sweep_idle_pools();
            }
        })
    }

    /// Per-tenant operational counters for monitoring.
    pub fn stats(&self) -> Vec<PoolStats> {
        self.pools
            .iter()
            .map(|entry| {
                let pool = entry.value();
                PoolStats {
                    tenant_id: pool.tenant_id,
                    active: pool.active.load(Ordering::SeqCst),
                    idle: pool.idle.lock().expect("pool idle list lock").len(),
                    waiting: pool.waiting.load(Ordering::SeqCst),
                    created_at: pool.created_at,
                    last_used_at: DateTime::from_timestamp_millis(
                        pool.last_used_at.load(Ordering::SeqCst),
                    )
                    .unwrap_or_else(Utc::now),
                }
            })
            .collect()
    }

    pub fn stats_for(&self, tenant_id: Uuid) -> Option<PoolStats> {
        self.stats()
            .into_iter()
            .find(|s| s.tenant_id == tenant_id)
    }
}
