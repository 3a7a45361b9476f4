use std::path::Path;

use chrono::TimeDelta;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Resource ceilings for one sandboxed script invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub instruction_limit: u64,
    pub memory_limit: usize,
    /// Instructions executed between two checks of the instruction budget.
    pub hook_granularity: u32,
}

impl SandboxConfig {
    pub const DEFAULT_INSTRUCTION_LIMIT: u64 = 1_000_000;
    pub const DEFAULT_MEMORY_LIMIT: usize = 100 * 1024;
    pub const DEFAULT_HOOK_GRANULARITY: u32 = 1_000;

    pub fn with_limits(instruction_limit: u64, memory_limit: usize) -> Self {
        Self { instruction_limit, memory_limit, ..Self::default() }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instruction_limit == 0 {
            return Err(ConfigError::Invalid("sandbox.instruction_limit must be positive".into()));
        }
        if self.memory_limit == 0 {
            return Err(ConfigError::Invalid("sandbox.memory_limit must be positive".into()));
        }
        if self.hook_granularity == 0 {
            return Err(ConfigError::Invalid("sandbox.hook_granularity must be positive".into()));
        }
        Ok(())
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            instruction_limit: Self::DEFAULT_INSTRUCTION_LIMIT,
            memory_limit: Self::DEFAULT_MEMORY_LIMIT,
            hook_granularity: Self::DEFAULT_HOOK_GRANULARITY,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GuessPolicy {
    /// Minimum gap between two guesses by the same user on the same puzzle.
    pub cooldown_secs: i64,
}

impl GuessPolicy {
    pub const DEFAULT_COOLDOWN_SECS: i64 = 5;

    pub fn cooldown(&self) -> TimeDelta {
        TimeDelta::seconds(self.cooldown_secs.max(0))
    }
}

impl Default for GuessPolicy {
    fn default() -> Self {
        Self { cooldown_secs: Self::DEFAULT_COOLDOWN_SECS }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HuntConfig {
    pub log_level: String,
    pub sandbox: SandboxConfig,
    pub guesses: GuessPolicy,
}

impl Default for HuntConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string(), sandbox: SandboxConfig::default(), guesses: GuessPolicy::default() }
    }
}

impl HuntConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: HuntConfig = toml::from_str(raw)?;
        cfg.sandbox.validate()?;
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        Self::from_toml_str(&raw)
    }
}
