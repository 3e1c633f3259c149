//! Production collaborators
//!
//! Thin shell-based implementations of the boundary traits: dev hub
//! authentication, git retrieval of `orgInit.sh`, and command execution.
//! The correctness-critical logic all lives upstream of these.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context};
use async_trait::async_trait;
use deployer_common::DeployRequest;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info};

use crate::consumer::{Authenticator, ExecOutcome, Executor, ScriptSource};

/// Authenticates the process against the dev hub with a stored sfdx auth URL
#[derive(Clone)]
pub struct HubAuth {
    auth_url: String,
}

impl HubAuth {
    pub fn new(auth_url: impl Into<String>) -> Self {
        Self {
            auth_url: auth_url.into(),
        }
    }
}

#[async_trait]
impl Authenticator for HubAuth {
    async fn authenticate(&self) -> anyhow::Result<()> {
        let mut auth_file =
            tempfile::NamedTempFile::new().context("failed to create hub auth file")?;
        auth_file
            .write_all(self.auth_url.as_bytes())
            .context("failed to write hub auth file")?;

        let output = Command::new("sfdx")
            .args(["auth:sfdxurl:store", "-f"])
            .arg(auth_file.path())
            .args(["-d", "-a", "hub"])
            .output()
            .await
            .context("failed to run sfdx auth")?;

        if !output.status.success() {
            bail!(
                "hub auth failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        info!("authenticated against the dev hub");
        Ok(())
    }
}

/// Clones the request's GitHub repository and reads its `orgInit.sh`
#[derive(Clone)]
pub struct GitScriptSource {
    tmp_dir: PathBuf,
}

impl GitScriptSource {
    pub fn new(tmp_dir: PathBuf) -> Self {
        Self { tmp_dir }
    }
}

#[async_trait]
impl ScriptSource for GitScriptSource {
    async fn fetch(&self, request: &DeployRequest) -> anyhow::Result<String> {
        let user = request
            .username
            .as_deref()
            .context("deploy request names no repository owner")?;
        let url = format!("https://github.com/{}/{}", user, request.repo);
        let checkout = self.tmp_dir.join(&request.deploy_id);

        tokio::fs::create_dir_all(&self.tmp_dir)
            .await
            .context("failed to create checkout directory")?;

        let output = Command::new("git")
            .args(["clone", "--depth", "1", "--single-branch", &url])
            .arg(&checkout)
            .output()
            .await
            .context("failed to run git clone")?;

        if !output.status.success() {
            bail!(
                "git clone of {} failed: {}",
                url,
                String::from_utf8_lossy(&output.stderr)
            );
        }

        tokio::fs::read_to_string(checkout.join("orgInit.sh"))
            .await
            .with_context(|| format!("{url} has no orgInit.sh"))
    }
}

/// Runs each sanitized command in the deploy's checkout directory.
///
/// Fails on the first non-zero exit. For sfdx commands run with `--json`,
/// the output is folded into the outcome so the record layer knows which
/// org the deploy produced.
#[derive(Clone)]
pub struct ShellExecutor {
    tmp_dir: PathBuf,
}

impl ShellExecutor {
    pub fn new(tmp_dir: PathBuf) -> Self {
        Self { tmp_dir }
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    async fn execute(
        &self,
        request: &DeployRequest,
        commands: &[String],
    ) -> anyhow::Result<ExecOutcome> {
        let workdir = self.tmp_dir.join(&request.deploy_id);
        let mut outcome = ExecOutcome::default();

        for command in commands {
            debug!(deploy_id = %request.deploy_id, %command, "running");

            let output = Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(&workdir)
                .output()
                .await
                .with_context(|| format!("failed to spawn: {command}"))?;

            if !output.status.success() {
                bail!(
                    "command failed ({command}): {}",
                    String::from_utf8_lossy(&output.stderr)
                );
            }

            if command.starts_with("sfdx ") && command.contains("--json") {
                absorb_result(&mut outcome, command, &output.stdout);
            }
        }

        Ok(outcome)
    }
}

fn absorb_result(outcome: &mut ExecOutcome, command: &str, stdout: &[u8]) {
    let Ok(value) = serde_json::from_slice::<Value>(stdout) else {
        return;
    };
    let result = &value["result"];

    if let Some(username) = result.get("username").and_then(Value::as_str) {
        outcome.main_user.username = username.to_string();
    }
    if command.contains("org:open") {
        if let Some(url) = result.get("url").and_then(Value::as_str) {
            outcome.main_user.login_url = url.to_string();
        }
    }
}
