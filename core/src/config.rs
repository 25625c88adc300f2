//! Configuration loading
//!
//! Sources, lowest priority first:
//! 1. Built-in defaults
//! 2. `phaser.toml` in the working directory, or the file named by
//!    `PHASER_CONFIG_PATH` / the builder's `config_path`
//! 3. `PHASER_*` environment variables (a `.env` file is read first)
//! 4. Builder overrides

use crate::scheduler::SchedulerSettings;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

pub const ENV_PREFIX: &str = "PHASER";
pub const CONFIG_PATH_VAR: &str = "PHASER_CONFIG_PATH";
const DEFAULT_CONFIG_NAME: &str = "phaser";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("max_block_depth must be at least 1")]
    InvalidDepth,

    #[error("invalid log filter '{filter}': {reason}")]
    InvalidLogFilter { filter: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// `tracing` filter used when `RUST_LOG` is unset
    pub log_filter: String,
    /// Deepest allowed block nesting in the interpreter
    pub max_block_depth: usize,
    /// Surface a lone leave-phase failure unwrapped instead of as an aggregate
    pub collapse_single_failure: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            max_block_depth: 256,
            collapse_single_failure: true,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load from the default sources with no overrides
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder().build()
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            collapse_single_failure: self.collapse_single_failure,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_block_depth == 0 {
            return Err(ConfigError::InvalidDepth);
        }
        if let Err(err) = tracing_subscriber::EnvFilter::try_new(&self.log_filter) {
            return Err(ConfigError::InvalidLogFilter {
                filter: self.log_filter.clone(),
                reason: err.to_string(),
            });
        }
        Ok(())
    }
}

/// Overrides applied on top of every other source
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    log_filter: Option<String>,
    max_block_depth: Option<usize>,
    collapse_single_failure: Option<bool>,
    skip_dotenv: bool,
}

impl ConfigBuilder {
    /// Config file to read instead of searching for `phaser.toml`
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn log_filter(mut self, filter: Option<String>) -> Self {
        self.log_filter = filter;
        self
    }

    pub fn max_block_depth(mut self, depth: Option<usize>) -> Self {
        self.max_block_depth = depth;
        self
    }

    pub fn collapse_single_failure(mut self, collapse: Option<bool>) -> Self {
        self.collapse_single_failure = collapse;
        self
    }

    /// Do not read `.env`
    pub fn skip_dotenv(mut self) -> Self {
        self.skip_dotenv = true;
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        if !self.skip_dotenv {
            // A missing .env is fine
            let _ = dotenvy::dotenv();
        }

        let defaults = Config::default();
        let mut builder = config::Config::builder()
            .set_default("log_filter", defaults.log_filter)?
            .set_default("max_block_depth", defaults.max_block_depth as u64)?
            .set_default("collapse_single_failure", defaults.collapse_single_failure)?;

        let path = self
            .config_path
            .or_else(|| std::env::var_os(CONFIG_PATH_VAR).map(PathBuf::from));
        builder = match path {
            Some(path) => builder.add_source(config::File::from(path.as_path()).required(true)),
            None => builder.add_source(config::File::with_name(DEFAULT_CONFIG_NAME).required(false)),
        };
        builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        if let Some(filter) = self.log_filter {
            builder = builder.set_override("log_filter", filter)?;
        }
        if let Some(depth) = self.max_block_depth {
            builder = builder.set_override("max_block_depth", depth as u64)?;
        }
        if let Some(collapse) = self.collapse_single_failure {
            builder = builder.set_override("collapse_single_failure", collapse)?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        tracing::debug!(?config, "configuration loaded");
        Ok(config)
    }
}
