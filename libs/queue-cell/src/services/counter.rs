use std::collections::HashMap;

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};

use shared_config::AppConfig;
use shared_database::SupabaseClient;

use crate::error::QueueError;

/// Per-doctor token counters.
///
/// `increment` must be a single atomic increment-or-create at the storage
/// layer: an unseen doctor starts at 0 and the first call returns 1.
#[async_trait]
pub trait TokenCounterStore: Send + Sync {
    async fn increment(&self, doctor_id: &str) -> Result<u64, QueueError>;

    /// Current count, 0 for an unseen doctor. For display only.
    async fn current(&self, doctor_id: &str) -> Result<u64, QueueError>;
}

#[derive(Default)]
pub struct InMemoryTokenCounter {
    counts: RwLock<HashMap<String, u64>>,
}

impl InMemoryTokenCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenCounterStore for InMemoryTokenCounter {
    async fn increment(&self, doctor_id: &str) -> Result<u64, QueueError> {
        let mut counts = self.counts.write().await;
        let count = counts.entry(doctor_id.to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn current(&self, doctor_id: &str) -> Result<u64, QueueError> {
        let counts = self.counts.read().await;
        Ok(counts.get(doctor_id).copied().unwrap_or(0))
    }
}

const REDIS_COUNTER_PREFIX: &str = "queue:token_counter";

pub struct RedisTokenCounter {
    pool: Pool,
    key_prefix: String,
}

impl RedisTokenCounter {
    pub async fn new(config: &AppConfig) -> Result<Self, QueueError> {
        Self::with_prefix(&config.redis_url_or_default(), REDIS_COUNTER_PREFIX).await
    }

    pub async fn with_prefix(redis_url: &str, key_prefix: &str) -> Result<Self, QueueError> {
        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| QueueError::Persistence(format!("Failed to create Redis pool: {}", e)))?;

        let mut conn = pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Redis token counter initialized");

        Ok(Self {
            pool,
            key_prefix: key_prefix.to_string(),
        })
    }

    fn key(&self, doctor_id: &str) -> String {
        format!("{}:{}", self.key_prefix, doctor_id)
    }

    async fn get_connection(&self) -> Result<Connection, QueueError> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl TokenCounterStore for RedisTokenCounter {
    async fn increment(&self, doctor_id: &str) -> Result<u64, QueueError> {
        let mut conn = self.get_connection().await?;
        // INCR creates a missing key at 0 before incrementing.
        let count: u64 = conn.incr(self.key(doctor_id), 1).await?;
        debug!("Redis counter for doctor {} advanced to {}", doctor_id, count);
        Ok(count)
    }

    async fn current(&self, doctor_id: &str) -> Result<u64, QueueError> {
        let mut conn = self.get_connection().await?;
        let count: Option<u64> = conn.get(self.key(doctor_id)).await?;
        Ok(count.unwrap_or(0))
    }
}

/// Counters in the `token_counters` table, advanced by the
/// `increment_doctor_token` SQL function (see `sql/token_counters.sql`).
pub struct SupabaseTokenCounter {
    supabase: SupabaseClient,
    service_key: Option<String>,
}

impl SupabaseTokenCounter {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            service_key: config.supabase_service_key.clone(),
        }
    }
}

#[async_trait]
impl TokenCounterStore for SupabaseTokenCounter {
    async fn increment(&self, doctor_id: &str) -> Result<u64, QueueError> {
        let count: u64 = self.supabase.rpc(
            "increment_doctor_token",
            json!({ "p_doctor_id": doctor_id }),
            self.service_key.as_deref(),
        ).await?;

        debug!("Supabase counter for doctor {} advanced to {}", doctor_id, count);
        Ok(count)
    }

    async fn current(&self, doctor_id: &str) -> Result<u64, QueueError> {
        let path = format!(
            "/rest/v1/token_counters?doctor_id=eq.{}&select=count",
            urlencoding::encode(doctor_id)
        );
        let rows: Vec<Value> = self.supabase.request(
            reqwest::Method::GET,
            &path,
            self.service_key.as_deref(),
            None,
        ).await?;

        Ok(rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }
}
