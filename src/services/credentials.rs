//! Centralized credential provisioning for the pool manager.
//!
//! The `CredentialSource` trait is the only decrypt path in the system; no
//! other component calls the cipher on stored credentials. The cache in
//! front of it only avoids redundant decryption under load: a miss or an
//! expired entry costs one extra decryption, never a different answer.

use async_trait::async_trait;
use dashmap::DashMap;
use secrecy::Secret;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::AppError;

/// Provider of decrypted connection descriptors for active tenants.
///
/// Implementations must refuse suspended tenants so a warm pool cannot be
/// rebuilt for a tenant that was shut off.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn decrypted_credentials(&self, tenant_id: Uuid) -> Result<Secret<String>, AppError>;
}

struct CachedDescriptor {
    descriptor: Secret<String>,
    cached_at: Instant,
}

/// TTL cache of decrypted connection descriptors, keyed per tenant.
///
/// Entries refresh lazily on miss and are never written proactively. The
/// dashmap gives per-shard locking, so unrelated tenants never serialize
/// against each other here.
pub struct CredentialCache {
    entries: DashMap<Uuid, CachedDescriptor>,
    ttl: Duration,
    source: Arc<dyn CredentialSource>,
}

impl CredentialCache {
    pub fn new(source: Arc<dyn CredentialSource>, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            source,
        }
    }

    /// Fetch the decrypted descriptor for a tenant, consulting the cache
    /// first.
    pub async fn descriptor_for(&self, tenant_id: Uuid) -> Result<Secret<String>, AppError> {
        if let Some(entry) = self.entries.get(&tenant_id) {
            if entry.cached_at.elapsed() < self.ttl {
                return Ok(entry.descriptor.clone());
            }
        }

        let descriptor = self.source.decrypted_credentials(tenant_id).await?;
        self.entries.insert(
            tenant_id,
            CachedDescriptor {
                descriptor: descriptor.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(descriptor)
    }

    /// Drop a tenant's cached descriptor (suspension, rotation).
    pub fn invalidate(&self, tenant_id: Uuid) {
        self.entries.remove(&tenant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CredentialSource for CountingSource {
        async fn decrypted_credentials(
            &self,
            tenant_id: Uuid,
        ) -> Result<Secret<String>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Secret::new(format!("postgres://db/{}", tenant_id)))
        }
    }

    #[tokio::test]
    async fn caches_within_ttl() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let cache = CredentialCache::new(source.clone(), Duration::from_secs(60));
        let tenant = Uuid::new_v4();

        let a = cache.descriptor_for(tenant).await.unwrap();
        let b = cache.descriptor_for(tenant).await.unwrap();
        assert_eq!(a.expose_secret(), b.expose_secret());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entry_refreshes_lazily() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let cache = CredentialCache::new(source.clone(), Duration::from_millis(0));
        let tenant = Uuid::new_v4();

        cache.descriptor_for(tenant).await.unwrap();
        cache.descriptor_for(tenant).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_re_decryption() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let cache = CredentialCache::new(source.clone(), Duration::from_secs(60));
        let tenant = Uuid::new_v4();

        cache.descriptor_for(tenant).await.unwrap();
        cache.invalidate(tenant);
        cache.descriptor_for(tenant).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }
}
