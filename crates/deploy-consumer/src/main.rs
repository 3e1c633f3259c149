//! Deploy Consumer
//!
//! Always-on consumer processes for the deploy and pool queues, plus a
//! periodic pool replenisher when pools are configured.

use std::time::Duration;

use anyhow::{Context, Result};
use deploy_consumer::store::{RedisStore, DEPLOY_QUEUE, POOL_QUEUE};
use deploy_consumer::{pool, Config, Consumer, GitScriptSource, HubAuth, ShellExecutor};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const REPLENISH_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deploy_consumer=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    info!("Starting Deploy Consumer");
    info!("Redis URL: {}", config.redis_url);
    info!("Checkout directory: {}", config.tmp_dir.display());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let deploy_consumer = Consumer::new(
        RedisStore::new(&config.redis_url).await?,
        HubAuth::new(&config.sfdx_auth_url),
        GitScriptSource::new(config.tmp_dir.clone()),
        ShellExecutor::new(config.tmp_dir.clone()),
        DEPLOY_QUEUE,
        config.poll_interval,
    );

    let pool_consumer = Consumer::new(
        RedisStore::new(&config.redis_url).await?,
        HubAuth::new(&config.sfdx_auth_url),
        GitScriptSource::new(config.tmp_dir.clone()),
        ShellExecutor::new(config.tmp_dir.clone()),
        POOL_QUEUE,
        config.poll_interval,
    );

    let mut deploy_task = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move { deploy_consumer.run(shutdown).await }
    });
    let mut pool_task = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move { pool_consumer.run(shutdown).await }
    });

    let replenisher = if config.pool_configs.is_empty() {
        None
    } else {
        let store = RedisStore::new(&config.redis_url).await?;
        let configs = config.pool_configs.clone();
        let mut shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                if let Err(e) = pool::replenish(&store, &configs).await {
                    error!(error = %e, "pool replenishment failed");
                }
                tokio::select! {
                    _ = tokio::time::sleep(REPLENISH_INTERVAL) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }))
    };

    // consumers only return early on a fatal startup failure
    tokio::select! {
        result = &mut deploy_task => {
            return result.context("deploy consumer panicked")?;
        }
        result = &mut pool_task => {
            return result.context("pool consumer panicked")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    shutdown_tx.send(true).ok();
    let _ = deploy_task.await;
    let _ = pool_task.await;
    if let Some(replenisher) = replenisher {
        let _ = replenisher.await;
    }

    Ok(())
}
