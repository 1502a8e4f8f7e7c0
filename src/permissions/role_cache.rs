use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::catalog::Role;
use crate::OrgId;

pub const DEFAULT_ROLE_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

pub type UserRoles = HashMap<OrgId, Role>;

/// Upstream lookup of a user's role in every organization they belong to.
#[async_trait]
pub trait RoleSource: Send + Sync + 'static {
    async fn fetch_roles(&self, user_id: Uuid) -> Result<UserRoles>;
}

/// Generic expiring key-value store backing the role cache.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: tokio::sync::Mutex<HashMap<String, (String, Instant)>>,
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut guard = self.entries.lock().await;
        match guard.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                guard.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut guard = self.entries.lock().await;
        let now = Instant::now();
        guard.retain(|_, (_, expires_at)| *expires_at > now);
        guard.insert(key.to_string(), (value, now + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut guard = self.entries.lock().await;
        guard.remove(key);
        Ok(())
    }
}

/// Time-bounded cache of `user → {org → role}`.
///
/// Concurrent misses for the same user wait on a per-user gate so that only
/// one of them reaches the [`RoleSource`]. [`RoleCache::invalidate`] takes the
/// same gate, so a fetch and its write-back either complete before the entry
/// is deleted or start after it.
pub struct RoleCache {
    source: Arc<dyn RoleSource>,
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    gates: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl RoleCache {
    pub fn new(source: Arc<dyn RoleSource>, store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            source,
            store,
            ttl,
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get_roles(&self, user_id: Uuid) -> Result<UserRoles> {
        if let Some(roles) = self.read_cached(user_id).await? {
            debug!(%user_id, "role cache hit");
            return Ok(roles);
        }

        let gate = self.gate(user_id);
        let result = {
            let _guard = gate.lock().await;
            self.fill(user_id).await
        };
        self.release_gate(user_id, gate);
        result
    }

    pub async fn invalidate(&self, user_id: Uuid) -> Result<()> {
        let gate = self.gate(user_id);
        let result = {
            let _guard = gate.lock().await;
            self.store.delete(&cache_key(user_id)).await
        };
        self.release_gate(user_id, gate);
        result?;
        info!(%user_id, "role cache invalidated");
        Ok(())
    }

    async fn fill(&self, user_id: Uuid) -> Result<UserRoles> {
        // Another caller may have filled the entry while we waited on the gate.
        if let Some(roles) = self.read_cached(user_id).await? {
            debug!(%user_id, "role cache filled by concurrent fetch");
            return Ok(roles);
        }

        let roles = self.source.fetch_roles(user_id).await?;
        let encoded = serde_json::to_string(&roles)?;
        self.store
            .set(&cache_key(user_id), encoded, self.ttl)
            .await?;
        debug!(%user_id, organizations = roles.len(), "role cache filled");

        Ok(roles)
    }

    async fn read_cached(&self, user_id: Uuid) -> Result<Option<UserRoles>> {
        let Some(raw) = self.store.get(&cache_key(user_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(roles) => Ok(Some(roles)),
            Err(err) => {
                warn!(%user_id, error = %err, "discarding unreadable role cache entry");
                Ok(None)
            }
        }
    }

    fn gate(&self, user_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        lock(&self.gates).entry(user_id).or_default().clone()
    }

    fn release_gate(&self, user_id: Uuid, gate: Arc<tokio::sync::Mutex<()>>) {
        let mut gates = lock(&self.gates);
        drop(gate);
        // Only the map still holds it: nobody is waiting or running.
        if gates
            .get(&user_id)
            .is_some_and(|gate| Arc::strong_count(gate) == 1)
        {
            gates.remove(&user_id);
        }
    }

    #[cfg(test)]
    fn tracked_users(&self) -> usize {
        lock(&self.gates).len()
    }
}

fn cache_key(user_id: Uuid) -> String {
    format!("user_roles:{user_id}")
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
