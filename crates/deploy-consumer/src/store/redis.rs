//! Redis-backed store
//!
//! Queues and collections are plain Redis lists. `dequeue` is a single
//! `LPOP`, and `consume_matching` is a Lua script, so both are atomic on
//! the server and safe under concurrent consumer processes.

use async_trait::async_trait;
use deployer_common::{Error, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use tracing::info;

use super::{matches_fields, Store};

/// Walks a list server-side, removes entries whose dot-path fields match
/// the `(path, value)` pairs in ARGV, and returns them oldest first.
/// ARGV[1] is the match limit (0 = unlimited); pairs follow.
const CONSUME_MATCHING_LUA: &str = r#"
local function field_at(record, path)
    local current = record
    for part in string.gmatch(path, '[^%.]+') do
        if type(current) ~= 'table' then
            return nil
        end
        current = current[part]
    end
    return current
end

local limit = tonumber(ARGV[1])
local matched = {}
local items = redis.call('LRANGE', KEYS[1], 0, -1)
for i = 1, #items do
    local ok, record = pcall(cjson.decode, items[i])
    if ok then
        local hit = true
        for j = 2, #ARGV, 2 do
            if field_at(record, ARGV[j]) ~= ARGV[j + 1] then
                hit = false
                break
            end
        end
        if hit then
            table.insert(matched, items[i])
            if limit > 0 and #matched >= limit then
                break
            end
        end
    end
end
for i = 1, #matched do
    redis.call('LREM', KEYS[1], 1, matched[i])
end
return matched
"#;

/// Store handle over a shared Redis
///
/// Cheap to clone; every consumer and test constructs its own handle
/// instead of reaching for ambient connection state.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| Error::Redis(e.to_string()))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Redis(e.to_string()))?;

        info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn enqueue(&self, queue: &str, payload: Value) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(&payload)?;
        let _: () = conn
            .rpush(queue, json)
            .await
            .map_err(|e| Error::Redis(e.to_string()))?;
        Ok(())
    }

    async fn dequeue(&self, queue: &str) -> Result<Option<Value>> {
        let mut conn = self.conn.clone();
        let popped: Option<String> = conn
            .lpop(queue, None)
            .await
            .map_err(|e| Error::Redis(e.to_string()))?;
        Ok(popped.map(|json| serde_json::from_str(&json)).transpose()?)
    }

    async fn size(&self, queue: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn
            .llen(queue)
            .await
            .map_err(|e| Error::Redis(e.to_string()))?;
        Ok(len)
    }

    async fn put(&self, collection: &str, record: Value) -> Result<()> {
        self.enqueue(collection, record).await
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Value>> {
        let mut conn = self.conn.clone();
        let items: Vec<String> = conn
            .lrange(collection, 0, -1)
            .await
            .map_err(|e| Error::Redis(e.to_string()))?;
        items
            .iter()
            .map(|json| serde_json::from_str(json).map_err(Error::from))
            .collect()
    }

    async fn count_matching(&self, collection: &str, fields: &[(&str, &str)]) -> Result<usize> {
        // Read-only count; a stale read here is acceptable for quota gating
        let records = self.get_all(collection).await?;
        Ok(records
            .iter()
            .filter(|record| matches_fields(record, fields))
            .count())
    }

    async fn consume_matching(
        &self,
        collection: &str,
        fields: &[(&str, &str)],
        limit: usize,
    ) -> Result<Vec<Value>> {
        let mut conn = self.conn.clone();
        let script = redis::Script::new(CONSUME_MATCHING_LUA);

        let mut invocation = script.prepare_invoke();
        invocation.key(collection).arg(limit);
        for (path, value) in fields {
            invocation.arg(*path).arg(*value);
        }

        let matched: Vec<String> = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::Redis(e.to_string()))?;

        matched
            .iter()
            .map(|json| serde_json::from_str(json).map_err(Error::from))
            .collect()
    }
}
