//! Layered configuration for evalpad
//!
//! Values are resolved in order: built-in defaults, an optional TOML file
//! (`evalpad.toml` in the working directory, `EVALPAD_CONFIG_PATH`, or an
//! explicit path), then `EVALPAD_*` environment variables using `__` as the
//! section separator (e.g. `EVALPAD_EXECUTION__EXEC_TIME_MS=5000`).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const ENV_PREFIX: &str = "EVALPAD";
const CONFIG_PATH_VAR: &str = "EVALPAD_CONFIG_PATH";
const DEFAULT_CONFIG_NAME: &str = "evalpad";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub libraries: LoaderConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub events: EventConfig,
}

/// Defaults applied to newly opened workspaces and to every run
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ExecutionConfig {
    /// Execution-time budget handed to the engine, in milliseconds
    #[serde(default = "default_exec_time_ms")]
    pub exec_time_ms: u64,

    /// Chapter a fresh workspace starts in
    #[serde(default = "default_chapter")]
    pub chapter: u8,

    /// Lowest chapter for which editor runs enable breakpoints and pausing
    #[serde(default = "default_debugger_chapter")]
    pub debugger_chapter: u8,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoaderConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NotificationConfig {
    #[serde(default = "default_short_ms")]
    pub short_ms: u64,

    #[serde(default = "default_long_ms")]
    pub long_ms: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EventConfig {
    /// Capacity of the workspace event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

fn default_exec_time_ms() -> u64 {
    1000
}

fn default_chapter() -> u8 {
    1
}

fn default_debugger_chapter() -> u8 {
    3
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_ready_timeout_ms() -> u64 {
    4000
}

fn default_short_ms() -> u64 {
    750
}

fn default_long_ms() -> u64 {
    1000
}

fn default_event_capacity() -> usize {
    256
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            exec_time_ms: default_exec_time_ms(),
            chapter: default_chapter(),
            debugger_chapter: default_debugger_chapter(),
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            ready_timeout_ms: default_ready_timeout_ms(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            short_ms: default_short_ms(),
            long_ms: default_long_ms(),
        }
    }
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

impl LoaderConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

impl NotificationConfig {
    pub fn short(&self) -> Duration {
        Duration::from_millis(self.short_ms)
    }

    pub fn long(&self) -> Duration {
        Duration::from_millis(self.long_ms)
    }
}

impl Config {
    /// Create a builder for loading configuration
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load configuration with no explicit overrides
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }
}

/// Builder for loading a [`Config`] with command-line style overrides
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    exec_time_ms: Option<u64>,
    chapter: Option<u8>,
}

impl ConfigBuilder {
    /// Set the config file path (overrides default search)
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Override the default execution-time budget
    pub fn exec_time_ms(mut self, ms: Option<u64>) -> Self {
        self.exec_time_ms = ms;
        self
    }

    /// Override the chapter new workspaces start in
    pub fn chapter(mut self, chapter: Option<u8>) -> Self {
        self.chapter = chapter;
        self
    }

    pub fn build(self) -> Result<Config> {
        let explicit_path = self
            .config_path
            .or_else(|| std::env::var(CONFIG_PATH_VAR).ok().map(PathBuf::from));

        let file = match &explicit_path {
            Some(path) => config::File::from(path.as_path()).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let raw = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration sources")?;

        let mut config: Config = raw
            .try_deserialize()
            .context("Failed to parse configuration")?;

        if let Some(ms) = self.exec_time_ms {
            config.execution.exec_time_ms = ms;
        }
        if let Some(chapter) = self.chapter {
            config.execution.chapter = chapter;
        }

        if config.execution.exec_time_ms == 0 {
            anyhow::bail!("execution.exec_time_ms must be greater than zero");
        }

        Ok(config)
    }
}
