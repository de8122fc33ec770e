//! Configuration for Arbor, read from `arbor.toml`.
//!
//! Layered: file → environment → CLI flags. Every key is optional.
//!
//! ```toml
//! [scheduler]
//! max_concurrent = 10
//! max_format_retries = 2
//!
//! [tools]
//! shell_timeout_secs = 30
//!
//! [engine]
//! base_url = "https://api.anthropic.com"
//! max_tokens = 8096
//! api_key_env = "ANTHROPIC_API_KEY"
//!
//! [models]
//! thinking = "claude-sonnet-4-6"
//! code = "claude-haiku-4-5"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ConfigError;
use crate::kind::NodeKind;
use crate::scheduler::SchedulerSettings;

/// Default config file name, looked up in the current directory.
pub const CONFIG_FILE: &str = "arbor.toml";

/// Environment override for `scheduler.max_concurrent`.
pub const MAX_CONCURRENT_ENV: &str = "ARBOR_MAX_CONCURRENT";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArborConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub models: ModelsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Ceiling on concurrently executing nodes
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Missing-marker answers tolerated before accepting the raw text
    #[serde(default = "default_max_format_retries")]
    pub max_format_retries: u32,
}

fn default_max_concurrent() -> usize {
    10
}

fn default_max_format_retries() -> u32 {
    2
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_format_retries: default_max_format_retries(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_shell_timeout_secs")]
    pub shell_timeout_secs: u64,
}

fn default_shell_timeout_secs() -> u64 {
    30
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            shell_timeout_secs: default_shell_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_max_tokens() -> u32 {
    8096
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            max_tokens: default_max_tokens(),
            api_key_env: default_api_key_env(),
        }
    }
}

/// Per-kind model overrides. Unset kinds use the kind table's model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub test: Option<String>,
    #[serde(default)]
    pub synthesize: Option<String>,
}

impl ModelsConfig {
    fn get(&self, kind: NodeKind) -> Option<&str> {
        let model = match kind {
            NodeKind::Thinking => &self.thinking,
            NodeKind::Code => &self.code,
            NodeKind::Test => &self.test,
            NodeKind::Synthesize => &self.synthesize,
        };
        model.as_deref().filter(|m| !m.trim().is_empty())
    }
}

impl ArborConfig {
    /// Load an explicit config file, or `./arbor.toml` if present, or defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load_file(path),
            None => {
                let path = PathBuf::from(CONFIG_FILE);
                if path.exists() {
                    Self::load_file(&path)
                } else {
                    debug!("no {} found, using defaults", CONFIG_FILE);
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content, path)?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_toml_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(MAX_CONCURRENT_ENV) {
            self.scheduler.max_concurrent =
                raw.trim().parse().map_err(|_| ConfigError::Invalid {
                    key: MAX_CONCURRENT_ENV.to_string(),
                    message: format!("expected a positive integer, got '{}'", raw),
                })?;
        }
        Ok(())
    }

    /// CLI override for `scheduler.max_concurrent`.
    pub fn with_max_concurrent(mut self, max_concurrent: Option<usize>) -> Self {
        if let Some(max) = max_concurrent {
            self.scheduler.max_concurrent = max;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.max_concurrent == 0 {
            return Err(ConfigError::Invalid {
                key: "scheduler.max_concurrent".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.tools.shell_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "tools.shell_timeout_secs".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.engine.max_tokens == 0 {
            return Err(ConfigError::Invalid {
                key: "engine.max_tokens".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Model for `kind`: the `[models]` override, else the kind table default.
    pub fn model_for(&self, kind: NodeKind) -> String {
        self.models
            .get(kind)
            .unwrap_or(kind.config().model)
            .to_string()
    }

    pub fn scheduler_settings(&self, env_root: PathBuf) -> SchedulerSettings {
        let models: BTreeMap<NodeKind, String> = NodeKind::ALL
            .into_iter()
            .map(|kind| (kind, self.model_for(kind)))
            .collect();
        SchedulerSettings {
            env_root,
            max_concurrent: self.scheduler.max_concurrent,
            max_format_retries: self.scheduler.max_format_retries,
            shell_timeout: Duration::from_secs(self.tools.shell_timeout_secs),
            models,
        }
    }
}
