//! # Configuration Module
//!
//! Framework options, loadable from YAML or TOML and overridable from the
//! environment.
//!
//! ## Environment Variables
//!
//! | Variable | Field |
//! |----------|-------|
//! | `BRRTF_BODY_LIMIT` | `body_limit` (bytes) |
//! | `BRRTF_PLUGIN_TIMEOUT_MS` | `plugin_timeout_ms` (0 disables) |
//! | `BRRTF_IGNORE_TRAILING_SLASH` | `router.ignore_trailing_slash` |
//! | `BRRTF_CASE_SENSITIVE` | `router.case_sensitive` |
//! | `BRRTF_MAX_PARAM_LENGTH` | `router.max_param_length` |
//!
//! ## Example Configuration
//!
//! ```yaml
//! body_limit: 1048576
//! plugin_timeout_ms: 10000
//! request_id_header: x-request-id
//! router:
//!   ignore_trailing_slash: true
//!   case_sensitive: true
//!   max_param_length: 100
//! ```

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{FrameworkError, Result};

/// Options consumed by the router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Treat `/a/` and `/a` as the same route.
    pub ignore_trailing_slash: bool,
    /// When false, static path text matches without regard to ASCII case.
    /// Parameter and wildcard values keep the casing of the request path.
    pub case_sensitive: bool,
    /// Longest accepted parameter value; longer values yield 414.
    pub max_param_length: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            ignore_trailing_slash: false,
            case_sensitive: true,
            max_param_length: 100,
        }
    }
}

/// Top-level framework configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkConfig {
    pub router: RouterConfig,
    /// Maximum accepted request body, in bytes.
    pub body_limit: usize,
    /// Time allowed for each plugin's registration work; 0 disables the limit.
    pub plugin_timeout_ms: u64,
    /// Header carrying an upstream request id (ULID) to reuse.
    pub request_id_header: String,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            body_limit: 1024 * 1024,
            plugin_timeout_ms: 10_000,
            request_id_header: "request-id".to_string(),
        }
    }
}

impl FrameworkConfig {
    /// Defaults with `BRRTF_*` overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Load a YAML (`.yaml`/`.yml`) or TOML (`.toml`) file.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::Config`] when the file cannot be read, has an
    /// unknown extension, or does not parse.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| FrameworkError::Config(format!("{}: {e}", path.display())))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .map_err(|e| FrameworkError::Config(format!("{}: {e}", path.display()))),
            "toml" => toml::from_str(&content)
                .map_err(|e| FrameworkError::Config(format!("{}: {e}", path.display()))),
            other => Err(FrameworkError::Config(format!(
                "{}: unsupported config extension '{other}'",
                path.display()
            ))),
        }
    }

    /// Apply `BRRTF_*` environment overrides on top of `self`.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse("BRRTF_BODY_LIMIT") {
            self.body_limit = v;
        }
        if let Some(v) = env_parse("BRRTF_PLUGIN_TIMEOUT_MS") {
            self.plugin_timeout_ms = v;
        }
        if let Some(v) = env_bool("BRRTF_IGNORE_TRAILING_SLASH") {
            self.router.ignore_trailing_slash = v;
        }
        if let Some(v) = env_bool("BRRTF_CASE_SENSITIVE") {
            self.router.case_sensitive = v;
        }
        if let Some(v) = env_parse("BRRTF_MAX_PARAM_LENGTH") {
            self.router.max_param_length = v;
        }
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(variable = key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

fn env_bool(key: &str) -> Option<bool> {
    let raw = env::var(key).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!(variable = key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}
