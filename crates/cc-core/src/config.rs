//! Service configuration. Defaults are applied once at load time; the rest of
//! the code reads plain fields.

use crate::error::ConfigError;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CodeCrowConfig {
    pub server: ServerConfig,
    pub lock: LockConfig,
    pub ai: RetryConfig,
    pub vcs: VcsConfig,
    pub rag: RagConfig,
    pub commands: CommandsConfig,
    pub housekeeping: HousekeepingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    /// Shared secret for webhook signatures; unset disables verification.
    pub webhook_secret: Option<String>,
    pub github_token: Option<String>,
    pub github_api_url: String,
    pub inference_url: Option<String>,
    pub rag_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 4830,
            db_path: PathBuf::from("codecrow.db"),
            webhook_secret: None,
            github_token: None,
            github_api_url: "https://api.github.com".to_string(),
            inference_url: None,
            rag_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Lease length; a holder that dies is reclaimed after this.
    pub lease_secs: u64,
    /// Bounded wait before a contended acquire reports busy.
    pub wait_ms: u64,
    pub poll_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_secs: 1_800,
            wait_ms: 2_000,
            poll_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl RetryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VcsConfig {
    pub timeout_secs: u64,
    pub max_attempts: u32,
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_attempts: 3,
        }
    }
}

impl VcsConfig {
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            timeout_secs: self.timeout_secs,
            max_attempts: self.max_attempts,
            ..RetryConfig::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub indexing_timeout_secs: u64,
    pub chunk_lines: usize,
    pub chunk_overlap: usize,
    pub context_limit: usize,
    /// Idle READY deltas are archived after this many days without a query.
    pub retention_days: i64,
    pub stale_grace_hours: i64,
    pub purge_after_days: i64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            indexing_timeout_secs: 1_800,
            chunk_lines: 60,
            chunk_overlap: 10,
            context_limit: 12,
            retention_days: 14,
            stale_grace_hours: 24,
            purge_after_days: 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    pub enabled: bool,
    pub max_per_window: i64,
    pub window_secs: i64,
    pub retention_hours: i64,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_per_window: 10,
            window_secs: 3_600,
            retention_hours: 48,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HousekeepingConfig {
    pub interval_secs: u64,
    /// Overrides [`CodeCrowConfig::job_deadline`].
    pub job_deadline_secs: Option<u64>,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 600,
            job_deadline_secs: None,
        }
    }
}

impl CodeCrowConfig {
    /// How long a job may stay non-terminal before housekeeping fails it:
    /// the longer of the full AI retry budget and a contended RAG index
    /// build, plus one lock lease.
    pub fn job_deadline(&self) -> Duration {
        if let Some(secs) = self.housekeeping.job_deadline_secs {
            return Duration::from_secs(secs);
        }
        let ai = self
            .ai
            .timeout_secs
            .saturating_mul(u64::from(self.ai.max_attempts));
        let rag = self.rag.indexing_timeout_secs.saturating_mul(2);
        Duration::from_secs(ai.max(rag).saturating_add(self.lock.lease_secs))
    }

    /// Reads the TOML file if given (a missing file yields defaults), then
    /// applies `CODECROW_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    message: err.to_string(),
                });
            }
        };
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|err| ConfigError::Parse {
            message: err.to_string(),
        })
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("CODECROW_DB_PATH") {
            self.server.db_path = PathBuf::from(path);
        }
        if let Some(port) = lookup("CODECROW_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::Parse {
                message: format!("CODECROW_PORT is not a port: {port}"),
            })?;
        }
        if let Some(token) = lookup("CODECROW_GITHUB_TOKEN") {
            self.server.github_token = Some(token);
        }
        if let Some(secret) = lookup("CODECROW_WEBHOOK_SECRET") {
            self.server.webhook_secret = Some(secret);
        }
        if let Some(url) = lookup("CODECROW_INFERENCE_URL") {
            self.server.inference_url = Some(url);
        }
        if let Some(url) = lookup("CODECROW_RAG_URL") {
            self.server.rag_url = Some(url);
        }
        Ok(())
    }
}
