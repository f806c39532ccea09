//! Gate configuration.
//!
//! Loaded from `fixgate.toml` when present, otherwise built from
//! [`GateConfig::default`]; the CLI layers flag and environment overrides on
//! top.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::error::{GateError, Result};

/// Default file name looked up in the repository root.
pub const CONFIG_FILE_NAME: &str = "fixgate.toml";

/// Default skip directive.
pub const DEFAULT_SKIP_TOKEN: &str = "[skip-regression-check]";

/// Configuration for one gate invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GateConfig {
    /// Regexes that mark a commit message as a bug fix.
    pub fix_patterns: Vec<String>,

    /// Literal substring that waives validation.
    pub skip_token: String,

    /// Glob patterns identifying test files.
    pub test_path_globs: Vec<String>,

    /// Section markers that identify inline test hunks in non-test files
    /// (empty disables hunk-level classification).
    pub inline_test_markers: Vec<String>,

    /// Test command argv (first element is the executable).
    pub command: Vec<String>,

    /// Wall-clock limit for one test run, in seconds.
    pub timeout_secs: u64,

    /// Maximum number of commits evaluated at once.
    pub max_concurrency: usize,

    /// Maximum bytes of combined output kept per test run.
    pub output_limit_bytes: usize,

    /// Number of output lines quoted in verdict diagnostics.
    pub diagnostic_tail_lines: usize,

    /// Directory under which workspaces are allocated (system temp dir if unset).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Extra environment variables for the test command.
    pub env: BTreeMap<String, String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            fix_patterns: default_fix_patterns(),
            skip_token: DEFAULT_SKIP_TOKEN.to_string(),
            test_path_globs: default_test_path_globs(),
            inline_test_markers: Vec::new(),
            command: vec!["cargo".to_string(), "test".to_string()],
            timeout_secs: 600,
            max_concurrency: 4,
            output_limit_bytes: 256 * 1024,
            diagnostic_tail_lines: 20,
            workspace_root: None,
            env: BTreeMap::new(),
        }
    }
}

/// Conventional-commit fix prefixes, issue-closing references and `Bug:`.
pub fn default_fix_patterns() -> Vec<String> {
    vec![
        r"^fix(\([^)]*\))?!?:".to_string(),
        r"\b([Ff]ix(e[sd])?|[Cc]lose[sd]?|[Rr]esolve[sd]?) #[0-9]+".to_string(),
        r"^Bug:".to_string(),
    ]
}

pub fn default_test_path_globs() -> Vec<String> {
    [
        "**/tests/**",
        "**/test/**",
        "**/__tests__/**",
        "**/*_test.*",
        "**/*_tests.*",
        "**/test_*.py",
        "**/*.test.*",
        "**/*.spec.*",
        "**/*Test.java",
        "**/*Tests.cs",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl GateConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: GateConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, validating the result.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Load `<dir>/fixgate.toml` if it exists, defaults otherwise.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        if path.is_file() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject configurations the gate cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.command.is_empty() || self.command[0].trim().is_empty() {
            return Err(GateError::Config("test command must not be empty".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(GateError::Config("timeout_secs must be positive".to_string()));
        }
        if self.max_concurrency == 0 {
            return Err(GateError::Config("max_concurrency must be positive".to_string()));
        }
        if self.output_limit_bytes == 0 {
            return Err(GateError::Config(
                "output_limit_bytes must be positive".to_string(),
            ));
        }
        if self.skip_token.is_empty() {
            return Err(GateError::Config("skip_token must not be empty".to_string()));
        }
        Ok(())
    }
}
