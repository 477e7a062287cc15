//! Project configuration (`lift.toml`).
//!
//! Lookup order: `<project>/lift.toml`, then `<config_dir>/lift/config.toml`,
//! then built-in defaults. Every field is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::apply::PollPolicy;
use crate::error::{LiftError, LiftResult};

pub const CONFIG_FILE_NAME: &str = "lift.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Schema source, relative to the project dir.
    pub schema: PathBuf,
    pub migrations_dir: PathBuf,
    pub engine: EngineConfig,
    pub apply: ApplyConfig,
    pub hooks: HooksConfig,
    pub watch: WatchConfig,
    pub generators: Vec<GeneratorConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema: PathBuf::from("schema.lift"),
            migrations_dir: PathBuf::from("migrations"),
            engine: EngineConfig::default(),
            apply: ApplyConfig::default(),
            hooks: HooksConfig::default(),
            watch: WatchConfig::default(),
            generators: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub binary: String,
    pub args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: "migration-engine".to_string(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApplyConfig {
    pub poll_interval_ms: u64,
    pub submit_delay_ms: u64,
    /// Give up polling after this long. Unset polls until a terminal status.
    pub timeout_secs: Option<u64>,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1500,
            submit_delay_ms: 50,
            timeout_secs: None,
        }
    }
}

impl ApplyConfig {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            submit_delay: Duration::from_millis(self.submit_delay_ms),
            timeout: self.timeout_secs.map(Duration::from_secs),
        }
    }
}

/// What a failing pre/post hook does to the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookFailurePolicy {
    /// Log a warning and continue with the next migration.
    #[default]
    Warn,
    /// Abort the invocation.
    Abort,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HooksConfig {
    pub on_failure: HookFailurePolicy,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: 500 }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// A code generator run after each live migration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratorConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Config {
    pub fn parse(content: &str) -> LiftResult<Self> {
        toml::from_str(content).map_err(|e| LiftError::Config(e.to_string()))
    }

    /// Load the project config, falling back to the user config dir.
    pub fn load(project_dir: &Path) -> LiftResult<Self> {
        let mut candidates = vec![project_dir.join(CONFIG_FILE_NAME)];
        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("lift").join("config.toml"));
        }

        for path in candidates {
            match std::fs::read_to_string(&path) {
                Ok(content) => {
                    debug!(path = %path.display(), "loaded config");
                    return toml::from_str(&content)
                        .map_err(|e| LiftError::Config(format!("{}: {}", path.display(), e)));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(LiftError::io(path, e)),
            }
        }
        Ok(Self::default())
    }
}
