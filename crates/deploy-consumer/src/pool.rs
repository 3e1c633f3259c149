//! Pool accounting
//!
//! Read-side quota logic over the pool-request queue, plus the
//! replenishment decision: a pool is topped up only while its queued
//! count sits below the configured quantity.

use chrono::Utc;
use deployer_common::{DeployRequest, PoolConfig, Result};
use tracing::{debug, info};

use crate::store::{Store, StoreExt, POOL_QUEUE};

/// Total queued pool-replenishment requests across all repositories
pub async fn pool_queue_size<S: Store + ?Sized>(store: &S) -> Result<usize> {
    store.size(POOL_QUEUE).await
}

/// Queued pool requests matching the config's `{user, repo}`
pub async fn pool_count_by_repo<S: Store + ?Sized>(
    store: &S,
    config: &PoolConfig,
) -> Result<usize> {
    store.pool_count_by_repo(config).await
}

/// Top every configured pool back up to its target quantity.
///
/// Returns how many replenishment requests were queued.
pub async fn replenish<S: Store + ?Sized>(store: &S, configs: &[PoolConfig]) -> Result<usize> {
    let mut queued = 0;

    for config in configs {
        let current = pool_count_by_repo(store, config).await?;
        debug!(
            user = %config.user,
            repo = %config.repo,
            current,
            target = config.quantity,
            "pool level"
        );

        for _ in current..config.quantity {
            store.put_pool_request(&pool_request(config)).await?;
            queued += 1;
        }
    }

    if queued > 0 {
        info!(queued, "topped up pool queues");
    }
    Ok(queued)
}

fn pool_request(config: &PoolConfig) -> DeployRequest {
    let deploy_id = format!(
        "{}-{}-{}",
        config.user,
        config.repo,
        Utc::now().timestamp_millis()
    );
    DeployRequest {
        deploy_id,
        repo: config.repo.clone(),
        username: Some(config.user.clone()),
        // pool repos come from configuration, not anonymous users
        whitelisted: true,
        pool: Some(true),
        created_timestamp: Utc::now(),
    }
}
