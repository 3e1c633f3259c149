//! State store: named queues and record collections
//!
//! The store is the only shared mutable resource in the system. `dequeue`
//! and `consume_matching` are the atomic operations exactly-once semantics
//! depend on: a deploy request is handed to exactly one consumer, and
//! completion data is delivered to exactly one poller.

mod memory;
mod redis;

use async_trait::async_trait;
use deployer_common::{Cds, DeployRequest, Error, PoolConfig, PooledOrg, Result};
use serde_json::Value;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Incoming user deploy requests, FIFO
pub const DEPLOY_QUEUE: &str = "deploy:queue";
/// Pool-replenishment deploy requests, FIFO
pub const POOL_QUEUE: &str = "pool:queue";
/// Provisioned-but-unclaimed orgs
pub const POOLED_ORGS: &str = "pool:orgs";
/// Completed-deployment records, consumed destructively by pollers
pub const CDS_COLLECTION: &str = "cds:heroku";
/// Usernames scheduled for org deletion
pub const DELETE_QUEUE: &str = "delete:queue";

/// Characters permitted in a username that may flow into a shell-level
/// deletion command
fn valid_username(username: &str) -> bool {
    !username.is_empty()
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '-' | '_'))
}

/// Walk a dot-separated path into a JSON record
fn field_at<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(record, |current, part| current.get(part))
}

/// True when every `(path, value)` pair matches the record
fn matches_fields(record: &Value, fields: &[(&str, &str)]) -> bool {
    fields
        .iter()
        .all(|(path, expected)| field_at(record, path).and_then(Value::as_str) == Some(*expected))
}

/// Named queues and collections of JSON payloads.
///
/// Queues are FIFO; collections are ordered bags. Concurrent callers of
/// `dequeue` or `consume_matching` never observe the same payload twice.
#[async_trait]
pub trait Store: Send + Sync {
    /// Append a payload to a queue
    async fn enqueue(&self, queue: &str, payload: Value) -> Result<()>;

    /// Atomically pop the oldest payload, if any
    async fn dequeue(&self, queue: &str) -> Result<Option<Value>>;

    /// Number of items currently queued
    async fn size(&self, queue: &str) -> Result<usize>;

    /// Add a record to a collection
    async fn put(&self, collection: &str, record: Value) -> Result<()>;

    /// All records in a collection, oldest first
    async fn get_all(&self, collection: &str) -> Result<Vec<Value>>;

    /// Count records whose string fields match every `(path, value)` pair
    async fn count_matching(&self, collection: &str, fields: &[(&str, &str)]) -> Result<usize>;

    /// Atomically return and remove matching records, oldest first.
    /// A `limit` of zero means no limit.
    async fn consume_matching(
        &self,
        collection: &str,
        fields: &[(&str, &str)],
        limit: usize,
    ) -> Result<Vec<Value>>;
}

/// Typed operations over the generic store surface
#[async_trait]
pub trait StoreExt: Store {
    /// Dequeue the next deploy request from the given queue
    async fn next_request(&self, queue: &str) -> Result<Option<DeployRequest>> {
        match self.dequeue(queue).await? {
            Some(payload) => Ok(Some(serde_json::from_value(payload)?)),
            None => Ok(None),
        }
    }

    async fn put_deploy_request(&self, request: &DeployRequest) -> Result<()> {
        self.enqueue(DEPLOY_QUEUE, serde_json::to_value(request)?).await
    }

    async fn get_deploy_request(&self) -> Result<Option<DeployRequest>> {
        self.next_request(DEPLOY_QUEUE).await
    }

    async fn put_pool_request(&self, request: &DeployRequest) -> Result<()> {
        self.enqueue(POOL_QUEUE, serde_json::to_value(request)?).await
    }

    async fn get_pool_request(&self) -> Result<Option<DeployRequest>> {
        self.next_request(POOL_QUEUE).await
    }

    async fn put_pooled_org(&self, org: &PooledOrg) -> Result<()> {
        self.put(POOLED_ORGS, serde_json::to_value(org)?).await
    }

    async fn get_pooled_orgs(&self) -> Result<Vec<PooledOrg>> {
        self.get_all(POOLED_ORGS)
            .await?
            .into_iter()
            .map(|record| serde_json::from_value(record).map_err(Error::from))
            .collect()
    }

    /// Count queued pool requests matching the config's `{user, repo}`
    async fn pool_count_by_repo(&self, config: &PoolConfig) -> Result<usize> {
        self.count_matching(
            POOL_QUEUE,
            &[("repo", config.repo.as_str()), ("username", config.user.as_str())],
        )
        .await
    }

    /// Claim (and destroy) one pooled org for `{user, repo}`, if any is ready
    async fn claim_pooled_org(&self, user: &str, repo: &str) -> Result<Option<PooledOrg>> {
        let mut claimed = self
            .consume_matching(POOLED_ORGS, &[("user", user), ("repo", repo)], 1)
            .await?;
        match claimed.pop() {
            Some(record) => Ok(Some(serde_json::from_value(record)?)),
            None => Ok(None),
        }
    }

    async fn put_cds(&self, cds: &Cds) -> Result<()> {
        self.put(CDS_COLLECTION, serde_json::to_value(cds)?).await
    }

    async fn get_cdss(&self) -> Result<Vec<Cds>> {
        self.get_all(CDS_COLLECTION)
            .await?
            .into_iter()
            .map(|record| serde_json::from_value(record).map_err(Error::from))
            .collect()
    }

    /// Destructive read: return and remove every completed-deployment
    /// record for the user. A second call observes nothing.
    async fn consume_cds_for_user(&self, username: &str) -> Result<Vec<Cds>> {
        self.consume_matching(CDS_COLLECTION, &[("mainUser.username", username)], 0)
            .await?
            .into_iter()
            .map(|record| serde_json::from_value(record).map_err(Error::from))
            .collect()
    }

    /// Consume the user's completion records and flatten out the app names
    async fn app_names_for_user(&self, username: &str) -> Result<Vec<String>> {
        let records = self.consume_cds_for_user(username).await?;
        Ok(records
            .into_iter()
            .flat_map(|cds| cds.heroku_results)
            .map(|result| result.app_name)
            .collect())
    }

    /// Schedule removal of a provisioned org.
    ///
    /// The username is validated before any store action; it may flow into
    /// a shell-level deletion command downstream.
    async fn delete_org(&self, username: &str) -> Result<()> {
        if !valid_username(username) {
            return Err(Error::InvalidUsername(username.to_string()));
        }
        self.enqueue(DELETE_QUEUE, Value::String(username.to_string())).await
    }
}

impl<S: Store + ?Sized> StoreExt for S {}
