//! Deploy Consumer
//!
//! Always-on consumer for the multitenant sfdx deployer. Drains deploy
//! requests from a Redis-backed queue, sanitizes each request's
//! `orgInit.sh` into a bounded command sequence, executes it against a
//! fresh scratch org, and records the resulting app locations for the
//! front end to collect.

pub mod config;
pub mod consumer;
pub mod exec;
pub mod pool;
pub mod sanitize;
pub mod store;

pub use config::Config;
pub use consumer::{Authenticator, Consumer, ExecOutcome, Executor, ScriptSource};
pub use exec::{GitScriptSource, HubAuth, ShellExecutor};
pub use sanitize::{sanitize, SanitizeError};
pub use store::{MemoryStore, RedisStore, Store, StoreExt};
