use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use moka::future::Cache;
use sqlx::types::Json;
use sqlx::PgPool;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::errors::{AppError, ResultExt};
use crate::models::Lead;

/// Key-value persistence for leads, keyed by normalized phone.
#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn get(&self, phone: &str) -> Result<Option<Lead>, AppError>;
    async fn upsert(&self, lead: &Lead) -> Result<(), AppError>;
    /// All leads, most recently updated first.
    async fn list_all(&self) -> Result<Vec<Lead>, AppError>;
    /// Returns whether a lead was removed.
    async fn delete(&self, phone: &str) -> Result<bool, AppError>;
    /// Returns the number of leads removed.
    async fn clear(&self) -> Result<u64, AppError>;
}

/// PostgreSQL backend: one row per lead, the whole record in a JSONB column.
pub struct PgLeadStore {
    pool: PgPool,
}

impl PgLeadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeadStore for PgLeadStore {
    async fn get(&self, phone: &str) -> Result<Option<Lead>, AppError> {
        let row: Option<(Json<Lead>,)> = sqlx::query_as("SELECT data FROM leads WHERE phone = $1")
            .bind(phone)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("loading lead {}", phone))?;

        Ok(row.map(|(Json(lead),)| lead))
    }

    async fn upsert(&self, lead: &Lead) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO leads (phone, data, created_at, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (phone) DO UPDATE
            SET data = EXCLUDED.data,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&lead.phone)
        .bind(Json(lead))
        .bind(lead.created_at)
        .bind(lead.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("saving lead {}", lead.phone))?;

        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Lead>, AppError> {
        let rows: Vec<(Json<Lead>,)> =
            sqlx::query_as("SELECT data FROM leads ORDER BY updated_at DESC")
                .fetch_all(&self.pool)
                .await
                .context("listing leads")?;

        Ok(rows.into_iter().map(|(Json(lead),)| lead).collect())
    }

    async fn delete(&self, phone: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM leads WHERE phone = $1")
            .bind(phone)
            .execute(&self.pool)
            .await
            .with_context(|| format!("deleting lead {}", phone))?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM leads")
            .execute(&self.pool)
            .await
            .context("clearing leads")?;

        Ok(result.rows_affected())
    }
}

/// In-process backend used when no database is configured, and in tests.
#[derive(Default)]
pub struct MemoryLeadStore {
    leads: RwLock<HashMap<String, Lead>>,
}

impl MemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeadStore for MemoryLeadStore {
    async fn get(&self, phone: &str) -> Result<Option<Lead>, AppError> {
        Ok(self.leads.read().await.get(phone).cloned())
    }

    async fn upsert(&self, lead: &Lead) -> Result<(), AppError> {
        self.leads
            .write()
            .await
            .insert(lead.phone.clone(), lead.clone());
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Lead>, AppError> {
        let mut leads: Vec<Lead> = self.leads.read().await.values().cloned().collect();
        leads.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(leads)
    }

    async fn delete(&self, phone: &str) -> Result<bool, AppError> {
        Ok(self.leads.write().await.remove(phone).is_some())
    }

    async fn clear(&self) -> Result<u64, AppError> {
        let mut leads = self.leads.write().await;
        let removed = leads.len() as u64;
        leads.clear();
        Ok(removed)
    }
}

const LIST_CACHE_KEY: &str = "all";

/// Store front used by the handlers.
///
/// Adds a short-TTL cache over `list_all` for dashboard polling bursts and a
/// per-phone lock so read-modify-write cycles on one lead never interleave.
pub struct LeadRepository {
    store: Arc<dyn LeadStore>,
    list_cache: Cache<&'static str, Arc<Vec<Lead>>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LeadRepository {
    pub fn new(store: Arc<dyn LeadStore>, cache_ttl: Duration) -> Self {
        let list_cache = Cache::builder()
            .time_to_live(cache_ttl)
            .max_capacity(1)
            .build();

        Self {
            store,
            list_cache,
            locks: DashMap::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryLeadStore::new()), Duration::from_secs(3))
    }

    /// Hold the returned guard for the whole read-modify-write of one lead.
    pub async fn lock_phone(&self, phone: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(phone.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    pub async fn get(&self, phone: &str) -> Result<Option<Lead>, AppError> {
        self.store.get(phone).await
    }

    pub async fn require(&self, phone: &str) -> Result<Lead, AppError> {
        self.get(phone)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Lead {} not found", phone)))
    }

    pub async fn upsert(&self, lead: &Lead) -> Result<(), AppError> {
        self.store.upsert(lead).await?;
        self.list_cache.invalidate_all();
        tracing::debug!("Saved lead {} (version {})", lead.phone, lead.version);
        Ok(())
    }

    pub async fn list_all(&self) -> Result<Arc<Vec<Lead>>, AppError> {
        if let Some(cached) = self.list_cache.get(LIST_CACHE_KEY).await {
            return Ok(cached);
        }

        let leads = Arc::new(self.store.list_all().await?);
        self.list_cache
            .insert(LIST_CACHE_KEY, Arc::clone(&leads))
            .await;
        Ok(leads)
    }

    pub async fn delete(&self, phone: &str) -> Result<bool, AppError> {
        let removed = self.store.delete(phone).await?;
        self.list_cache.invalidate_all();
        self.locks.remove(phone);
        Ok(removed)
    }

    pub async fn clear(&self) -> Result<u64, AppError> {
        let removed = self.store.clear().await?;
        self.list_cache.invalidate_all();
        tracing::warn!("Cleared {} leads from the store", removed);
        Ok(removed)
    }
}
