//! Redis KV backend
//!
//! Maps the engine's KV interface onto native redis commands over a
//! multiplexed connection manager. The conditional delete uses a small Lua
//! script so release stays atomic.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::time::Duration;

use super::KvStore;
use crate::error::{EngineError, Result};

const DEL_IF_EQUALS_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// Redis-backed KV store
#[derive(Clone)]
pub struct RedisKv {
    manager: ConnectionManager,
    del_if_equals: Script,
}

impl RedisKv {
    /// Connect to a redis instance, e.g. `redis://127.0.0.1:6379`
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| EngineError::Store(format!("redis client: {e}")))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| EngineError::Store(format!("redis connect: {e}")))?;
        Ok(Self {
            manager,
            del_if_equals: Script::new(DEL_IF_EQUALS_SCRIPT),
        })
    }

    fn store_err(e: redis::RedisError) -> EngineError {
        EngineError::Store(format!("redis: {e}"))
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.manager.clone();
        conn.incr(key, 1).await.map_err(Self::store_err)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.manager.clone();
        let secs = ttl.as_secs().max(1) as i64;
        conn.expire(key, secs).await.map_err(Self::store_err)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(Self::store_err)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key).await.map_err(Self::store_err)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.lpush::<_, _, ()>(key, value)
            .await
            .map_err(Self::store_err)
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        conn.rpop(key, None).await.map_err(Self::store_err)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await
            .map_err(Self::store_err)?;
        Ok(reply.is_some())
    }

    async fn del_if_equals(&self, key: &str, expected: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let deleted: i64 = self
            .del_if_equals
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::store_err)?;
        Ok(deleted == 1)
    }
}
