//! Redis backend implementation
//!
//! Single multiplexed connection per process via the connection manager.
//! Lock release uses a compare-and-delete Lua script so a lock that expired
//! and was reacquired by another holder is never deleted by the old one.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamId, StreamPendingReply,
    StreamRangeReply, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::{BackendError, BackendResult, KvBackend, StreamMessage};
use crate::config::Settings;

const RELEASE_IF_EQUALS: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
  return redis.call("DEL", KEYS[1])
else
  return 0
end"#;

/// Redis-backed [`KvBackend`].
pub struct RedisBackend {
    conn: ConnectionManager,
    release_script: redis::Script,
}

impl RedisBackend {
    /// Connect using the settings' host/port/db.
    pub async fn connect(settings: &Settings) -> BackendResult<Self> {
        Self::from_url(&settings.redis_url()).await
    }

    pub async fn from_url(url: &str) -> BackendResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        debug!("connected to redis at {url}");
        Ok(Self {
            conn,
            release_script: redis::Script::new(RELEASE_IF_EQUALS),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn map_err(err: redis::RedisError) -> BackendError {
    if err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
        BackendError::Connection(err.to_string())
    } else {
        BackendError::Backend(err.to_string())
    }
}

fn convert_entry(id: &StreamId) -> StreamMessage {
    let mut fields = HashMap::new();
    for (name, value) in &id.map {
        if let Ok(text) = redis::from_redis_value::<String>(value) {
            fields.insert(name.clone(), text);
        }
    }
    StreamMessage {
        id: id.id.clone(),
        fields,
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn get(&self, key: &str) -> BackendResult<Option<String>> {
        self.conn().get(key).await.map_err(map_err)
    }

    async fn set(&self, key: &str, value: &str) -> BackendResult<()> {
        self.conn().set(key, value).await.map_err(map_err)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> BackendResult<()> {
        self.conn()
            .set_ex(key, value, ttl.as_secs().max(1))
            .await
            .map_err(map_err)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> BackendResult<bool> {
        let mut conn = self.conn();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        let _: u64 = self.conn().del(key).await.map_err(map_err)?;
        Ok(())
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> BackendResult<bool> {
        let mut conn = self.conn();
        let deleted: i64 = self
            .release_script
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(deleted == 1)
    }

    async fn key_exists(&self, key: &str) -> BackendResult<bool> {
        self.conn().exists(key).await.map_err(map_err)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> BackendResult<()> {
        let _: bool = self
            .conn()
            .expire(key, ttl.as_secs().max(1) as i64)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn hash_incr(&self, key: &str, field: &str, by: i64) -> BackendResult<i64> {
        self.conn().hincr(key, field, by).await.map_err(map_err)
    }

    async fn hash_set(&self, key: &str, entries: &[(&str, &str)]) -> BackendResult<()> {
        let _: () = self
            .conn()
            .hset_multiple(key, entries)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> BackendResult<HashMap<String, String>> {
        self.conn().hgetall(key).await.map_err(map_err)
    }

    async fn set_add(&self, key: &str, member: &str) -> BackendResult<()> {
        let _: u64 = self.conn().sadd(key, member).await.map_err(map_err)?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> BackendResult<()> {
        let _: u64 = self.conn().srem(key, member).await.map_err(map_err)?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> BackendResult<Vec<String>> {
        self.conn().smembers(key).await.map_err(map_err)
    }

    async fn list_push(&self, key: &str, value: &str) -> BackendResult<()> {
        let _: u64 = self.conn().rpush(key, value).await.map_err(map_err)?;
        Ok(())
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> BackendResult<Vec<String>> {
        self.conn().lrange(key, start, stop).await.map_err(map_err)
    }

    async fn list_set(&self, key: &str, index: isize, value: &str) -> BackendResult<()> {
        let _: () = self.conn().lset(key, index, value).await.map_err(map_err)?;
        Ok(())
    }

    async fn scan_keys(&self, pattern: &str) -> BackendResult<Vec<String>> {
        let mut conn = self.conn();
        let mut keys = Vec::new();
        let mut iter: redis::AsyncIter<String> =
            conn.scan_match(pattern).await.map_err(map_err)?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        keys.sort();
        Ok(keys)
    }

    async fn stream_append(
        &self,
        stream: &str,
        fields: &[(&str, &str)],
    ) -> BackendResult<String> {
        self.conn()
            .xadd(stream, "*", fields)
            .await
            .map_err(map_err)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> BackendResult<()> {
        let result: Result<String, redis::RedisError> = self
            .conn()
            .xgroup_create_mkstream(stream, group, "0-0")
            .await;
        match result {
            Ok(_) => Ok(()),
            // Re-creating an existing group is fine.
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(map_err(e)),
        }
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> BackendResult<Vec<StreamMessage>> {
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block.as_millis() as usize);
        let reply: StreamReadReply = self
            .conn()
            .xread_options(&[stream], &[">"], &options)
            .await
            .map_err(map_err)?;
        let mut messages = Vec::new();
        for key in reply.keys {
            for id in key.ids {
                messages.push(convert_entry(&id));
            }
        }
        Ok(messages)
    }

    async fn auto_claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> BackendResult<Vec<StreamMessage>> {
        let options = StreamAutoClaimOptions::default().count(count);
        let reply: StreamAutoClaimReply = self
            .conn()
            .xautoclaim_options(
                stream,
                group,
                consumer,
                min_idle.as_millis() as usize,
                "0-0",
                options,
            )
            .await
            .map_err(map_err)?;
        Ok(reply.claimed.iter().map(convert_entry).collect())
    }

    async fn ack(&self, stream: &str, group: &str, message_id: &str) -> BackendResult<()> {
        let _: u64 = self
            .conn()
            .xack(stream, group, &[message_id])
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn pending_count(&self, stream: &str, group: &str) -> BackendResult<u64> {
        let reply: StreamPendingReply =
            self.conn().xpending(stream, group).await.map_err(map_err)?;
        Ok(reply.count() as u64)
    }

    async fn stream_range(&self, stream: &str, count: usize) -> BackendResult<Vec<StreamMessage>> {
        let reply: StreamRangeReply = self
            .conn()
            .xrange_count(stream, "-", "+", count)
            .await
            .map_err(map_err)?;
        Ok(reply.ids.iter().map(convert_entry).collect())
    }

    async fn stream_len(&self, stream: &str) -> BackendResult<u64> {
        self.conn().xlen(stream).await.map_err(map_err)
    }
}
