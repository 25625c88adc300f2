//! Initialization for embedders
//!
//! Loads configuration, installs the `tracing` subscriber and builds the
//! shared scheduler. Call it once before running programs.
//!
//! # Example
//!
//! ```rust,no_run
//! use phaser_core::init::InitBuilder;
//!
//! let runtime = InitBuilder::new()
//!     .config_path("phaser.toml")
//!     .max_block_depth(64)
//!     .init()?;
//! let mut vm = runtime.vm();
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::interpreter::Vm;
use crate::scheduler::{PhaseScheduler, RunOnceCache};

/// Global initialization state
static INIT_STATE: OnceLock<Runtime> = OnceLock::new();

/// Options for initializing the engine
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Config file path (overrides default search)
    pub config_path: Option<PathBuf>,

    /// Log filter (overrides config file and env vars)
    pub log_filter: Option<String>,

    pub max_block_depth: Option<usize>,

    pub collapse_single_failure: Option<bool>,

    /// Leave the global `tracing` subscriber alone
    pub skip_logging: bool,
}

/// Builder for constructing InitOptions
pub struct InitBuilder {
    options: InitOptions,
}

impl InitBuilder {
    pub fn new() -> Self {
        Self {
            options: InitOptions::default(),
        }
    }

    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.options.log_filter = Some(filter.into());
        self
    }

    pub fn max_block_depth(mut self, depth: usize) -> Self {
        self.options.max_block_depth = Some(depth);
        self
    }

    pub fn collapse_single_failure(mut self, collapse: bool) -> Self {
        self.options.collapse_single_failure = Some(collapse);
        self
    }

    pub fn skip_logging(mut self, skip: bool) -> Self {
        self.options.skip_logging = skip;
        self
    }

    pub fn init(self) -> Result<Runtime> {
        initialize(self.options)
    }
}

impl Default for InitBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared engine state handed out by `initialize`
#[derive(Debug, Clone)]
pub struct Runtime {
    pub config: Config,
    pub scheduler: Arc<PhaseScheduler>,
}

impl Runtime {
    /// Build a runtime without touching global state
    pub fn from_config(config: Config) -> Self {
        let cache = Arc::new(RunOnceCache::new());
        let scheduler = Arc::new(PhaseScheduler::with_settings(cache, config.scheduler_settings()));
        Self { config, scheduler }
    }

    pub fn cache(&self) -> &Arc<RunOnceCache> {
        self.scheduler.cache()
    }

    /// A fresh interpreter bound to the shared scheduler
    pub fn vm(&self) -> Vm {
        Vm::new(self.scheduler.clone(), self.config.max_block_depth)
    }

    /// Drop every run-once value. Call once, at process exit.
    pub fn shutdown(&self) {
        self.cache().teardown();
        tracing::info!("phaser engine shut down");
    }
}

/// Initialize the engine with the given options
///
/// Calling this more than once is safe: later calls return the runtime
/// built by the first one and ignore their options.
pub fn initialize(options: InitOptions) -> Result<Runtime> {
    if let Some(runtime) = INIT_STATE.get() {
        return Ok(runtime.clone());
    }

    let config = Config::builder()
        .config_path(options.config_path)
        .log_filter(options.log_filter)
        .max_block_depth(options.max_block_depth)
        .collapse_single_failure(options.collapse_single_failure)
        .build()
        .context("Failed to load configuration")?;

    if !options.skip_logging {
        init_logging(&config.log_filter);
    }

    let runtime = INIT_STATE.get_or_init(|| Runtime::from_config(config));
    tracing::info!(
        max_block_depth = runtime.config.max_block_depth,
        collapse_single_failure = runtime.config.collapse_single_failure,
        "phaser engine initialized"
    );
    Ok(runtime.clone())
}

/// Check if the engine has been initialized
pub fn is_initialized() -> bool {
    INIT_STATE.get().is_some()
}

/// Install the stderr subscriber; `RUST_LOG` wins over `filter`
pub fn init_logging(filter: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    // Already installed by an earlier call or by the embedder
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
