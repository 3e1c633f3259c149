//! Queue and collection payload shapes
//!
//! Field names on the wire are camelCase for compatibility with the
//! payloads the web front end already produces and polls for.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One request to provision an ephemeral org from a source repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    /// Globally unique id; also keys the on-disk checkout for this deploy
    pub deploy_id: String,

    /// Source repository name
    pub repo: String,

    /// GitHub user owning the template repository
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Trust level; whitelisted scripts bypass the restrictive sanitizer policy
    #[serde(default)]
    pub whitelisted: bool,

    /// Set when this request replenishes a pool rather than serving a user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<bool>,

    /// When the request was created; round-trips through storage losslessly
    pub created_timestamp: DateTime<Utc>,
}

impl DeployRequest {
    /// Create a new request stamped with the current time
    pub fn new(deploy_id: String, repo: String, username: Option<String>, whitelisted: bool) -> Self {
        Self {
            deploy_id,
            repo,
            username,
            whitelisted,
            pool: None,
            created_timestamp: Utc::now(),
        }
    }
}

/// Quota descriptor for one pre-provisioned org pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    /// GitHub user owning the template repository
    pub user: String,

    /// Template repository name
    pub repo: String,

    /// Target pool size
    pub quantity: usize,

    /// Maximum org lifetime before the reaper removes it
    pub life_hours: u32,
}

/// A provisioned-but-unclaimed org, waiting for a matching user request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PooledOrg {
    pub repo: String,
    pub user: String,

    /// Completion data handed to the claiming request
    pub cds: Cds,

    pub created_timestamp: DateTime<Utc>,
}

/// The org identity a finished deploy ran against
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MainUser {
    pub username: String,
    pub login_url: String,
}

/// One externally hosted application produced by a deploy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HerokuResult {
    pub app_name: String,
    pub open_url: String,
    pub dashboard_url: String,
}

/// Completed-deployment record
///
/// Addressed by `deployId`; retrieval by user is a destructive read, so
/// completion data is delivered to a polling client at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cds {
    pub deploy_id: String,
    pub main_user: MainUser,
    pub complete: bool,
    pub heroku_results: Vec<HerokuResult>,
}
