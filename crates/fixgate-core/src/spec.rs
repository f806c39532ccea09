//! Gate run identity.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::GateConfig;
use crate::domain::error::Result;

/// Identity of one gate invocation: the repository, what was evaluated and
/// under which configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateSpec {
    /// Source repository path.
    pub repo_path: PathBuf,

    /// SHA-256 digest of the ordered test command argv.
    pub command_digest: String,

    /// SHA-256 digest of the full configuration (canonical JSON).
    pub config_digest: String,

    /// fixgate version that produced the verdicts.
    pub version: String,
}

impl GateSpec {
    pub fn new(repo_path: PathBuf, config: &GateConfig) -> Result<Self> {
        Ok(Self {
            repo_path,
            command_digest: compute_command_digest(&config.command),
            config_digest: compute_config_digest(config)?,
            version: crate::VERSION.to_string(),
        })
    }
}

/// Deterministic digest of ordered argv elements.
fn compute_command_digest(argv: &[String]) -> String {
    let mut hasher = Sha256::new();
    for arg in argv {
        hasher.update(arg.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}

fn compute_config_digest(config: &GateConfig) -> Result<String> {
    // BTreeMap fields keep the JSON key order stable
    let canonical = serde_json::to_vec(config)?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(hex::encode(hasher.finalize()))
}
