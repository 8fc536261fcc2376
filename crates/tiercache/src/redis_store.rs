//! Redis backing store on a deadpool connection pool.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool, PoolError};
use redis::AsyncCommands;
use tiercache_store::{BackingStore, KeyTtl, ScanPage, StoreError, StoreResult};

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};

#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    timeout: Duration,
}

impl RedisStore {
    pub fn new(pool: Pool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Builds the pool from configuration. No connection is opened yet, so an
    /// unreachable server is not an error here; a malformed URL is.
    pub fn from_config(config: &CacheConfig) -> CacheResult<Self> {
        let timeout = config.remote_operation_timeout();

        let mut pool_config = deadpool_redis::PoolConfig::new(config.remote_pool_size);
        pool_config.timeouts.wait = Some(timeout);
        pool_config.timeouts.create = Some(timeout);
        pool_config.timeouts.recycle = Some(timeout);

        let mut redis_config = deadpool_redis::Config::from_url(&config.remote_endpoint);
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| {
                CacheError::invalid_configuration(format!(
                    "invalid remote_endpoint '{}': {e}",
                    config.remote_endpoint
                ))
            })?;

        Ok(Self::new(pool, timeout))
    }

    /// Like [`from_config`](Self::from_config), but requires one successful
    /// `PING` before returning.
    pub async fn connect(config: &CacheConfig) -> CacheResult<Self> {
        let store = Self::from_config(config)?;
        store.ping().await?;
        tracing::info!(endpoint = %config.remote_endpoint, "connected to Redis");
        Ok(store)
    }

    async fn conn(&self) -> StoreResult<Connection> {
        self.pool.get().await.map_err(|e| match e {
            PoolError::Timeout(_) => StoreError::timeout("connect", self.timeout),
            other => StoreError::unavailable(format!("failed to get Redis connection: {other}")),
        })
    }

    fn command_error(&self, operation: &'static str, e: redis::RedisError) -> StoreError {
        if e.is_timeout() {
            StoreError::timeout(operation, self.timeout)
        } else {
            StoreError::unavailable(format!("Redis {operation} error: {e}"))
        }
    }
}

#[async_trait]
impl BackingStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        let data: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| self.command_error("GET", e))?;
        Ok(data)
    }

    async fn get_with_ttl(&self, key: &str) -> StoreResult<Option<(Vec<u8>, KeyTtl)>> {
        let mut conn = self.conn().await?;
        let (data, pttl): (Option<Vec<u8>>, i64) = redis::pipe()
            .get(key)
            .pttl(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.command_error("GET+PTTL", e))?;
        Ok(data.map(|d| (d, KeyTtl::from_pttl(pttl))))
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let millis = (ttl.as_millis() as u64).max(1);
        conn.pset_ex::<_, _, ()>(key, value, millis)
            .await
            .map_err(|e| self.command_error("PSETEX", e))
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn
            .del(key)
            .await
            .map_err(|e| self.command_error("DEL", e))?;
        Ok(removed > 0)
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        let mut conn = self.conn().await?;
        let millis: i64 = conn
            .pttl(key)
            .await
            .map_err(|e| self.command_error("PTTL", e))?;
        Ok(KeyTtl::from_pttl(millis))
    }

    async fn sadd(&self, key: &str, members: &[String]) -> StoreResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        conn.sadd::<_, _, ()>(key, members)
            .await
            .map_err(|e| self.command_error("SADD", e))
    }

    async fn srem(&self, key: &str, members: &[String]) -> StoreResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        conn.srem::<_, _, ()>(key, members)
            .await
            .map_err(|e| self.command_error("SREM", e))
    }

    async fn smembers(&self, key: &str) -> StoreResult<HashSet<String>> {
        let mut conn = self.conn().await?;
        let members: HashSet<String> = conn
            .smembers(key)
            .await
            .map_err(|e| self.command_error("SMEMBERS", e))?;
        Ok(members)
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> StoreResult<ScanPage> {
        let mut conn = self.conn().await?;
        let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.command_error("SCAN", e))?;
        Ok(ScanPage { next_cursor, keys })
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| self.command_error("PING", e))?;
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        conn.publish::<_, _, ()>(channel, message)
            .await
            .map_err(|e| self.command_error("PUBLISH", e))
    }

    async fn close(&self) {
        self.pool.close();
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.pool.status();
        f.debug_struct("RedisStore")
            .field("max_size", &status.max_size)
            .field("size", &status.size)
            .field("timeout", &self.timeout)
            .finish()
    }
}
