//! Consumer loop tests against the in-memory store
//!
//! The loop runs as a real task and is bounded by the shutdown signal;
//! collaborators are stubs so no sfdx, git, or Redis is needed.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use chrono::Utc;
use deploy_consumer::store::{MemoryStore, Store, StoreExt, DEPLOY_QUEUE, POOL_QUEUE};
use deploy_consumer::{Authenticator, Consumer, ExecOutcome, Executor, ScriptSource};
use deployer_common::{Cds, DeployRequest, HerokuResult, MainUser, PooledOrg};
use tokio::sync::watch;

const POLL: Duration = Duration::from_millis(10);

struct OkAuth;

#[async_trait]
impl Authenticator for OkAuth {
    async fn authenticate(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

struct FailAuth;

#[async_trait]
impl Authenticator for FailAuth {
    async fn authenticate(&self) -> anyhow::Result<()> {
        bail!("no dev hub session for you")
    }
}

struct StaticScript(&'static str);

#[async_trait]
impl ScriptSource for StaticScript {
    async fn fetch(&self, _request: &DeployRequest) -> anyhow::Result<String> {
        Ok(self.0.to_string())
    }
}

/// Records every command it is handed; fails for the `badrepo` repository
#[derive(Clone, Default)]
struct StubExecutor {
    commands_seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Executor for StubExecutor {
    async fn execute(
        &self,
        request: &DeployRequest,
        commands: &[String],
    ) -> anyhow::Result<ExecOutcome> {
        self.commands_seen
            .lock()
            .unwrap()
            .extend(commands.iter().cloned());
        if request.repo == "badrepo" {
            bail!("scratch org creation blew up");
        }
        Ok(ExecOutcome {
            main_user: MainUser {
                username: format!("{}@scratch.org", request.deploy_id),
                login_url: "https://login.example".to_string(),
            },
            heroku_results: Vec::new(),
        })
    }
}

/// Proves a code path never reached execution
struct RefusingExecutor;

#[async_trait]
impl Executor for RefusingExecutor {
    async fn execute(
        &self,
        _request: &DeployRequest,
        _commands: &[String],
    ) -> anyhow::Result<ExecOutcome> {
        bail!("executor must not run for this request")
    }
}

fn request(id: &str, repo: &str, username: Option<&str>, whitelisted: bool) -> DeployRequest {
    DeployRequest::new(
        id.to_string(),
        repo.to_string(),
        username.map(str::to_string),
        whitelisted,
    )
}

async fn eventually<F, Fut>(mut check: F, what: &str)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

#[tokio::test]
async fn test_auth_failure_is_fatal_and_consumes_nothing() {
    let store = MemoryStore::new();
    store
        .put_deploy_request(&request("d1", "testRepo", Some("mshanemc"), true))
        .await
        .unwrap();

    let consumer = Consumer::new(
        store.clone(),
        FailAuth,
        StaticScript("sfdx force:source:push"),
        StubExecutor::default(),
        DEPLOY_QUEUE,
        POLL,
    );

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let err = consumer.run(shutdown_rx).await.unwrap_err();
    assert!(err.to_string().contains("hub authentication failed"));

    // the loop never started polling
    assert_eq!(store.size(DEPLOY_QUEUE).await.unwrap(), 1);
}

#[tokio::test]
async fn test_drains_queued_requests_and_records_completions() {
    let store = MemoryStore::new();
    let executor = StubExecutor::default();
    store
        .put_deploy_request(&request("d1", "testRepo", Some("mshanemc"), true))
        .await
        .unwrap();
    store
        .put_deploy_request(&request("d2", "testRepo", Some("mshanemc"), true))
        .await
        .unwrap();

    let consumer = Consumer::new(
        store.clone(),
        OkAuth,
        StaticScript("sfdx force:source:push"),
        executor.clone(),
        DEPLOY_QUEUE,
        POLL,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = tokio::spawn(async move { consumer.run(shutdown_rx).await });

    let probe = store.clone();
    eventually(
        move || {
            let probe = probe.clone();
            async move { probe.get_cdss().await.unwrap().len() == 2 }
        },
        "both deploys to complete",
    )
    .await;

    shutdown_tx.send(true).unwrap();
    running.await.unwrap().unwrap();

    assert_eq!(store.size(DEPLOY_QUEUE).await.unwrap(), 0);

    let mut deploy_ids: Vec<String> = store
        .get_cdss()
        .await
        .unwrap()
        .into_iter()
        .map(|cds| cds.deploy_id)
        .collect();
    deploy_ids.sort();
    assert_eq!(deploy_ids, vec!["d1", "d2"]);

    // the sanitizer ran: the sfdx line gained its json flag
    let commands = executor.commands_seen.lock().unwrap().clone();
    assert_eq!(
        commands,
        vec!["sfdx force:source:push --json", "sfdx force:source:push --json"]
    );
}

#[tokio::test]
async fn test_failed_request_is_logged_not_retried() {
    let store = MemoryStore::new();
    let executor = StubExecutor::default();
    store
        .put_deploy_request(&request("bad", "badrepo", Some("mshanemc"), true))
        .await
        .unwrap();
    store
        .put_deploy_request(&request("good", "testRepo", Some("mshanemc"), true))
        .await
        .unwrap();

    let consumer = Consumer::new(
        store.clone(),
        OkAuth,
        StaticScript("sfdx force:source:push"),
        executor.clone(),
        DEPLOY_QUEUE,
        POLL,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = tokio::spawn(async move { consumer.run(shutdown_rx).await });

    let probe = store.clone();
    eventually(
        move || {
            let probe = probe.clone();
            async move {
                probe.get_cdss().await.unwrap().len() == 1
                    && probe.size(DEPLOY_QUEUE).await.unwrap() == 0
            }
        },
        "the good deploy to complete",
    )
    .await;

    shutdown_tx.send(true).unwrap();
    running.await.unwrap().unwrap();

    // both were attempted exactly once, only the good one produced a record
    assert_eq!(executor.commands_seen.lock().unwrap().len(), 2);
    let records = store.get_cdss().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].deploy_id, "good");
}

#[tokio::test]
async fn test_sanitizer_rejection_does_not_stop_the_loop() {
    let store = MemoryStore::new();
    let executor = StubExecutor::default();
    // not whitelisted, and not an sfdx command: rejected before execution
    store
        .put_deploy_request(&request("rejected", "testRepo", Some("mshanemc"), false))
        .await
        .unwrap();
    store
        .put_deploy_request(&request("accepted", "testRepo", Some("mshanemc"), true))
        .await
        .unwrap();

    let consumer = Consumer::new(
        store.clone(),
        OkAuth,
        StaticScript(r#"echo "hello world""#),
        executor.clone(),
        DEPLOY_QUEUE,
        POLL,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = tokio::spawn(async move { consumer.run(shutdown_rx).await });

    let probe = store.clone();
    eventually(
        move || {
            let probe = probe.clone();
            async move {
                probe.get_cdss().await.unwrap().len() == 1
                    && probe.size(DEPLOY_QUEUE).await.unwrap() == 0
            }
        },
        "the whitelisted deploy to complete",
    )
    .await;

    shutdown_tx.send(true).unwrap();
    running.await.unwrap().unwrap();

    // the rejected script never reached the executor
    let commands = executor.commands_seen.lock().unwrap().clone();
    assert_eq!(commands, vec![r#"echo "hello world""#]);
    assert_eq!(store.get_cdss().await.unwrap()[0].deploy_id, "accepted");
}

#[tokio::test]
async fn test_pool_request_provisions_a_pooled_org() {
    let store = MemoryStore::new();
    let mut pool_request = request("pool-1", "platformTrial", Some("mshanemc"), true);
    pool_request.pool = Some(true);
    store.put_pool_request(&pool_request).await.unwrap();

    let consumer = Consumer::new(
        store.clone(),
        OkAuth,
        StaticScript("sfdx force:source:push"),
        StubExecutor::default(),
        POOL_QUEUE,
        POLL,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = tokio::spawn(async move { consumer.run(shutdown_rx).await });

    let probe = store.clone();
    eventually(
        move || {
            let probe = probe.clone();
            async move { probe.get_pooled_orgs().await.unwrap().len() == 1 }
        },
        "the pool to fill",
    )
    .await;

    shutdown_tx.send(true).unwrap();
    running.await.unwrap().unwrap();

    let orgs = store.get_pooled_orgs().await.unwrap();
    assert_eq!(orgs[0].user, "mshanemc");
    assert_eq!(orgs[0].repo, "platformTrial");
    assert_eq!(orgs[0].cds.main_user.username, "pool-1@scratch.org");

    // a pool build serves no poller directly
    assert!(store.get_cdss().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_user_request_claims_pooled_org_without_building() {
    let store = MemoryStore::new();
    store
        .put_pooled_org(&PooledOrg {
            repo: "platformTrial".to_string(),
            user: "mshanemc".to_string(),
            cds: Cds {
                deploy_id: "pool-1".to_string(),
                main_user: MainUser {
                    username: "pooled@scratch.org".to_string(),
                    login_url: "https://login.example".to_string(),
                },
                complete: true,
                heroku_results: vec![HerokuResult {
                    app_name: "pooledApp".to_string(),
                    open_url: "x".to_string(),
                    dashboard_url: "x".to_string(),
                }],
            },
            created_timestamp: Utc::now(),
        })
        .await
        .unwrap();
    store
        .put_deploy_request(&request("user-1", "platformTrial", Some("mshanemc"), false))
        .await
        .unwrap();

    // the executor refuses to run, so completion proves the claim path
    let consumer = Consumer::new(
        store.clone(),
        OkAuth,
        StaticScript("sfdx force:source:push"),
        RefusingExecutor,
        DEPLOY_QUEUE,
        POLL,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = tokio::spawn(async move { consumer.run(shutdown_rx).await });

    let probe = store.clone();
    eventually(
        move || {
            let probe = probe.clone();
            async move { probe.get_cdss().await.unwrap().len() == 1 }
        },
        "the claimed org to surface",
    )
    .await;

    shutdown_tx.send(true).unwrap();
    running.await.unwrap().unwrap();

    let records = store.get_cdss().await.unwrap();
    assert_eq!(records[0].deploy_id, "user-1");
    assert_eq!(records[0].main_user.username, "pooled@scratch.org");
    assert_eq!(records[0].heroku_results[0].app_name, "pooledApp");

    assert!(store.get_pooled_orgs().await.unwrap().is_empty());
}
