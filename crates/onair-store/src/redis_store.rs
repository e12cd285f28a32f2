//! Redis-backed [`KeyValueStore`].
//!
//! Uses one multiplexed async connection shared by all requests. Each command
//! is bounded by the configured timeout; atomic batches go through
//! `MULTI/EXEC`.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisResult};
use tracing::info;

use crate::error::{KvError, KvResult};
use crate::kv::{KeyValueStore, WriteOp};

pub struct RedisStore {
    conn: MultiplexedConnection,
    timeout: Duration,
}

impl RedisStore {
    /// Open a client for `url` and establish the shared connection.
    pub async fn connect(url: &str, timeout: Duration) -> KvResult<Self> {
        let client = Client::open(url)?;
        let conn = bounded(timeout, client.get_multiplexed_async_connection()).await?;

        info!(timeout_ms = timeout.as_millis(), "Connected to Redis");

        Ok(Self { conn, timeout })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

async fn bounded<T, F>(timeout: Duration, fut: F) -> KvResult<T>
where
    F: Future<Output = RedisResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(KvError::from),
        Err(_) => Err(KvError::Timeout(
            u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        )),
    }
}

fn build_pipeline(ops: &[WriteOp]) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic();
    for op in ops {
        match op {
            WriteOp::Set(key, value) => {
                pipe.set(key, value).ignore();
            }
            WriteOp::Delete(key) => {
                pipe.del(key).ignore();
            }
            WriteOp::ListPush(key, value) => {
                pipe.rpush(key, value).ignore();
            }
            WriteOp::ListRemove(key, value) => {
                pipe.lrem(key, 0, value).ignore();
            }
            WriteOp::SetAdd(key, member) => {
                pipe.sadd(key, member).ignore();
            }
            WriteOp::SetRemove(key, member) => {
                pipe.srem(key, member).ignore();
            }
            WriteOp::Incr(key) => {
                pipe.incr(key, 1).ignore();
            }
        }
    }
    pipe
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let mut conn = self.conn();
        bounded(self.timeout, async move { conn.get(key).await }).await
    }

    async fn get_many(&self, keys: &[String]) -> KvResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn();
        let mut cmd = redis::cmd("MGET");
        cmd.arg(keys);
        bounded(self.timeout, async move { cmd.query_async(&mut conn).await }).await
    }

    async fn set(&self, key: &str, value: &str) -> KvResult<()> {
        let mut conn = self.conn();
        bounded(self.timeout, async move { conn.set(key, value).await }).await
    }

    async fn delete(&self, key: &str) -> KvResult<()> {
        let mut conn = self.conn();
        bounded(self.timeout, async move { conn.del(key).await }).await
    }

    async fn list_push(&self, key: &str, value: &str) -> KvResult<usize> {
        let mut conn = self.conn();
        bounded(self.timeout, async move { conn.rpush(key, value).await }).await
    }

    async fn list_range(&self, key: &str) -> KvResult<Vec<String>> {
        let mut conn = self.conn();
        bounded(self.timeout, async move { conn.lrange(key, 0, -1).await }).await
    }

    async fn list_remove(&self, key: &str, value: &str) -> KvResult<usize> {
        let mut conn = self.conn();
        bounded(self.timeout, async move { conn.lrem(key, 0, value).await }).await
    }

    async fn set_add(&self, key: &str, member: &str) -> KvResult<bool> {
        let mut conn = self.conn();
        let added: usize = bounded(self.timeout, async move { conn.sadd(key, member).await }).await?;
        Ok(added > 0)
    }

    async fn set_remove(&self, key: &str, member: &str) -> KvResult<bool> {
        let mut conn = self.conn();
        let removed: usize =
            bounded(self.timeout, async move { conn.srem(key, member).await }).await?;
        Ok(removed > 0)
    }

    async fn set_members(&self, key: &str) -> KvResult<Vec<String>> {
        let mut conn = self.conn();
        bounded(self.timeout, async move { conn.smembers(key).await }).await
    }

    async fn set_is_member(&self, key: &str, member: &str) -> KvResult<bool> {
        let mut conn = self.conn();
        bounded(self.timeout, async move { conn.sismember(key, member).await }).await
    }

    async fn apply(&self, ops: Vec<WriteOp>) -> KvResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let pipe = build_pipeline(&ops);
        bounded(self.timeout, async move {
            let result: RedisResult<()> = pipe.query_async(&mut conn).await;
            result
        })
        .await
    }
}
