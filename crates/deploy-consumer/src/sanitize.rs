//! Command sanitizer
//!
//! Turns a raw, caller-supplied `orgInit.sh` into an ordered list of
//! commands that may run against the shared backend, or rejects the whole
//! script. Non-whitelisted scripts come from anonymous internet users, so
//! the restrictive policy admits nothing but sfdx invocations.

use thiserror::Error;

/// The provisioning CLI the restrictive policy permits
pub const CLI: &str = "sfdx";

const JSON_FLAG: &str = "--json";

/// Shell tokens that would escape the single-command execution model
const METACHARACTERS: [&str; 7] = [">", "<", "|", ";", "&", "`", "$("];

/// A whole-script rejection; each variant names the offending command verbatim
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SanitizeError {
    #[error("commands with metacharacters cannot be executed; put each command on a separate line: {0}")]
    Metacharacters(String),

    #[error("commands can't contain -u; a multitenant deployer only runs against the default org it creates: {0}")]
    UserOverride(String),

    #[error("commands must start with sfdx or be comments: {0}")]
    NotSfdx(String),
}

/// Sanitize a script body for the given trust level.
///
/// Blank lines and `#` comments are dropped for both trust levels.
/// Whitelisted scripts pass through otherwise untouched; non-whitelisted
/// scripts are all-or-nothing, and the first bad line fails the script.
/// Either way, sfdx invocations gain `--json` when they don't already
/// request it.
pub fn sanitize(script: &str, whitelisted: bool) -> Result<Vec<String>, SanitizeError> {
    let mut commands = Vec::new();

    for line in script.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if !whitelisted {
            if METACHARACTERS.iter().any(|meta| line.contains(meta)) {
                return Err(SanitizeError::Metacharacters(line.to_string()));
            }
            if has_user_override(line) {
                return Err(SanitizeError::UserOverride(line.to_string()));
            }
            if !is_cli_invocation(line) {
                return Err(SanitizeError::NotSfdx(line.to_string()));
            }
        }

        commands.push(with_json_flag(line));
    }

    Ok(commands)
}

fn is_cli_invocation(line: &str) -> bool {
    line.split_whitespace().next() == Some(CLI)
}

fn has_user_override(line: &str) -> bool {
    line.split_whitespace().any(|token| {
        token == "-u" || token == "--targetusername" || token.starts_with("--targetusername=")
    })
}

fn with_json_flag(line: &str) -> String {
    if is_cli_invocation(line) && !line.split_whitespace().any(|token| token == JSON_FLAG) {
        format!("{line} {JSON_FLAG}")
    } else {
        line.to_string()
    }
}
