//! Consumer loop
//!
//! One perpetual single-threaded loop per consumer process: authenticate
//! once, then drain the queue, sleeping only when it runs empty.
//! Horizontal scale-out is more processes against the same store.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use deployer_common::{Cds, DeployRequest, HerokuResult, MainUser, PooledOrg};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info};

use crate::sanitize::sanitize;
use crate::store::{Store, StoreExt};

/// Establishes a working session before polling begins.
/// Failure here is fatal; the loop never starts without one.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self) -> anyhow::Result<()>;
}

/// Retrieves the raw `orgInit.sh` body for a deploy request
#[async_trait]
pub trait ScriptSource: Send + Sync {
    async fn fetch(&self, request: &DeployRequest) -> anyhow::Result<String>;
}

/// What the execution collaborator reports back for a finished deploy
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutcome {
    pub main_user: MainUser,
    pub heroku_results: Vec<HerokuResult>,
}

/// Executes sanitized commands in order, reporting success or failure.
/// The loop does not inspect command output beyond detecting failure.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        request: &DeployRequest,
        commands: &[String],
    ) -> anyhow::Result<ExecOutcome>;
}

pub struct Consumer<S, A, F, E> {
    store: S,
    auth: A,
    scripts: F,
    executor: E,
    queue: &'static str,
    poll_interval: Duration,
}

impl<S, A, F, E> Consumer<S, A, F, E>
where
    S: Store,
    A: Authenticator,
    F: ScriptSource,
    E: Executor,
{
    pub fn new(
        store: S,
        auth: A,
        scripts: F,
        executor: E,
        queue: &'static str,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            auth,
            scripts,
            executor,
            queue,
            poll_interval,
        }
    }

    /// Authenticate, then poll until the shutdown signal flips.
    ///
    /// A request that fails is logged and not re-enqueued (at most one
    /// attempt per dequeue); only authentication failure escapes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        self.auth
            .authenticate()
            .await
            .context("hub authentication failed")?;

        info!(queue = self.queue, "consumer is up, polling for deploy requests");

        loop {
            if *shutdown.borrow() {
                info!(queue = self.queue, "consumer shutting down");
                return Ok(());
            }

            let processed = match self.poll_once().await {
                Ok(processed) => processed,
                Err(e) => {
                    // store trouble; fall through to the idle sleep rather
                    // than hot-spinning against an unreachable backend
                    error!(queue = self.queue, error = %e, "queue poll failed");
                    false
                }
            };

            // back off before checking the queue again if it was empty
            if !processed {
                tokio::select! {
                    _ = sleep(self.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Service at most one request. Returns whether a queue entry was
    /// consumed, so the caller can re-poll immediately while work exists.
    async fn poll_once(&self) -> deployer_common::Result<bool> {
        let Some(request) = self.store.next_request(self.queue).await? else {
            return Ok(false);
        };

        info!(
            deploy_id = %request.deploy_id,
            repo = %request.repo,
            whitelisted = request.whitelisted,
            "servicing deploy request"
        );

        if let Err(e) = self.service(&request).await {
            error!(deploy_id = %request.deploy_id, "deploy failed: {e:#}");
        }

        Ok(true)
    }

    async fn service(&self, request: &DeployRequest) -> anyhow::Result<()> {
        // user deploys get an already-warm org when one matches
        if request.pool != Some(true) {
            if let Some(username) = request.username.as_deref() {
                if let Some(org) = self.store.claim_pooled_org(username, &request.repo).await? {
                    info!(deploy_id = %request.deploy_id, "assigned a pooled org, skipping build");
                    let mut cds = org.cds;
                    cds.deploy_id = request.deploy_id.clone();
                    self.store.put_cds(&cds).await?;
                    return Ok(());
                }
            }
        }

        let script = self
            .scripts
            .fetch(request)
            .await
            .context("failed to fetch orgInit.sh")?;
        let commands = sanitize(&script, request.whitelisted)?;
        let outcome = self
            .executor
            .execute(request, &commands)
            .await
            .context("command execution failed")?;

        let cds = Cds {
            deploy_id: request.deploy_id.clone(),
            main_user: outcome.main_user,
            complete: true,
            heroku_results: outcome.heroku_results,
        };

        if request.pool == Some(true) {
            self.store
                .put_pooled_org(&PooledOrg {
                    repo: request.repo.clone(),
                    user: request.username.clone().unwrap_or_default(),
                    cds,
                    created_timestamp: Utc::now(),
                })
                .await?;
        } else {
            self.store.put_cds(&cds).await?;
        }

        Ok(())
    }
}
