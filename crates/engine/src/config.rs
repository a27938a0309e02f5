//! Engine configuration.
//!
//! Loaded from an optional TOML file, then overridden by `DOCFLOW_*`
//! environment variables. Every field has a default, so an empty file (or
//! no file) is a valid configuration.
//!
//! ```toml
//! transition_timeout_ms = 30000
//!
//! [workers]
//! enabled = true
//! batch_size = 10
//! submit_delay_ms = 5000
//! approve_delay_ms = 5000
//! tick_policy = "serialize"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variables consulted by [`EngineConfig::apply_env`].
pub const ENV_BATCH_SIZE: &str = "DOCFLOW_BATCH_SIZE";
pub const ENV_SUBMIT_DELAY_MS: &str = "DOCFLOW_SUBMIT_DELAY_MS";
pub const ENV_APPROVE_DELAY_MS: &str = "DOCFLOW_APPROVE_DELAY_MS";
pub const ENV_TICK_POLICY: &str = "DOCFLOW_TICK_POLICY";
pub const ENV_TRANSITION_TIMEOUT_MS: &str = "DOCFLOW_TRANSITION_TIMEOUT_MS";
pub const ENV_WORKERS_ENABLED: &str = "DOCFLOW_WORKERS_ENABLED";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: '{value}'")]
    InvalidEnv { key: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// How the scheduler treats a tick that runs longer than its interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickPolicy {
    /// The next tick starts one delay after the previous tick finished.
    #[default]
    Serialize,
    /// Ticks fire at a fixed rate; a slow tick does not hold back the next.
    /// Overlapping ticks of one stage may pick the same documents; the
    /// loser sees only `CONFLICT` outcomes, which are not counted as a
    /// stall. Ticks missed while a tick overruns are skipped, not replayed.
    Overlap,
}

impl std::str::FromStr for TickPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "serialize" => Ok(TickPolicy::Serialize),
            "overlap" => Ok(TickPolicy::Overlap),
            other => Err(format!("unknown tick policy '{other}'")),
        }
    }
}

/// `[workers]` section: background scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    /// Maximum documents pulled from the queue per tick.
    pub batch_size: usize,
    pub submit_delay_ms: u64,
    pub approve_delay_ms: u64,
    pub tick_policy: TickPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 10,
            submit_delay_ms: 5000,
            approve_delay_ms: 5000,
            tick_policy: TickPolicy::Serialize,
        }
    }
}

impl WorkerConfig {
    pub fn submit_delay(&self) -> Duration {
        Duration::from_millis(self.submit_delay_ms)
    }

    pub fn approve_delay(&self) -> Duration {
        Duration::from_millis(self.approve_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-item bound inside a batch; an item that exceeds it reports ERROR.
    pub transition_timeout_ms: u64,
    pub workers: WorkerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            transition_timeout_ms: 30_000,
            workers: WorkerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Read `path` if given, apply the process environment, and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from `DOCFLOW_*` variables. `lookup` is the variable
    /// source, normally `std::env::var`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_env(&lookup, ENV_BATCH_SIZE)? {
            self.workers.batch_size = v;
        }
        if let Some(v) = parse_env(&lookup, ENV_SUBMIT_DELAY_MS)? {
            self.workers.submit_delay_ms = v;
        }
        if let Some(v) = parse_env(&lookup, ENV_APPROVE_DELAY_MS)? {
            self.workers.approve_delay_ms = v;
        }
        if let Some(v) = parse_env(&lookup, ENV_TICK_POLICY)? {
            self.workers.tick_policy = v;
        }
        if let Some(v) = parse_env(&lookup, ENV_TRANSITION_TIMEOUT_MS)? {
            self.transition_timeout_ms = v;
        }
        if let Some(v) = parse_env(&lookup, ENV_WORKERS_ENABLED)? {
            self.workers.enabled = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers.batch_size == 0 {
            return Err(ConfigError::Zero("workers.batch_size"));
        }
        if self.workers.submit_delay_ms == 0 {
            return Err(ConfigError::Zero("workers.submit_delay_ms"));
        }
        if self.workers.approve_delay_ms == 0 {
            return Err(ConfigError::Zero("workers.approve_delay_ms"));
        }
        if self.transition_timeout_ms == 0 {
            return Err(ConfigError::Zero("transition_timeout_ms"));
        }
        Ok(())
    }

    pub fn transition_timeout(&self) -> Duration {
        Duration::from_millis(self.transition_timeout_ms)
    }
}

fn parse_env<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { key, value: raw }),
    }
}
