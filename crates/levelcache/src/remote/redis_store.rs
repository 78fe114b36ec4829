use std::fmt;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::{FromRedisValue, Pipeline, RedisResult};

use super::{RemoteError, RemoteStore, StoreEntry};
use crate::config::RedisConfig;

/// A [`RemoteStore`] backed by Redis.
///
/// Every batch is sent as a single pipeline. The underlying connection reconnects on its own
/// after failures, so a store stays usable across Redis restarts.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    io_timeout: Duration,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("io_timeout", &self.io_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    pub async fn connect(config: &RedisConfig) -> Result<Self, RemoteError> {
        let client = redis::Client::open(config.url.as_str()).context("invalid redis url")?;
        let conn = tokio::time::timeout(config.connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| RemoteError::ConnectTimeout)?
            .context("failed to connect to redis")?;

        tracing::debug!("Connected to redis");
        Ok(Self::from_connection(conn, config.io_timeout))
    }

    pub fn from_connection(conn: ConnectionManager, io_timeout: Duration) -> Self {
        RedisStore { conn, io_timeout }
    }

    async fn query<T: FromRedisValue>(&self, pipe: &Pipeline) -> Result<T, RemoteError> {
        let mut conn = self.conn.clone();
        let result: RedisResult<T> =
            tokio::time::timeout(self.io_timeout, pipe.query_async(&mut conn))
                .await
                .map_err(|_| RemoteError::Timeout)?;
        Ok(result.context("redis pipeline failed")?)
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>, RemoteError> {
        if keys.is_empty() {
            return Ok(vec![]);
        }
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.get(key);
        }
        let values: Vec<Option<Vec<u8>>> = self.query(&pipe).await?;
        Ok(values.into_iter().map(|value| value.map(Bytes::from)).collect())
    }

    async fn set_many(&self, entries: Vec<StoreEntry>) -> Result<(), RemoteError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for entry in &entries {
            let millis = entry.ttl.as_millis().max(1) as u64;
            pipe.pset_ex(&entry.key, entry.value.as_ref(), millis).ignore();
        }
        let () = self.query(&pipe).await?;
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), RemoteError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.del(keys).ignore();
        let () = self.query(&pipe).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
