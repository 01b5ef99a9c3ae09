//! Configuration file loading and flag overrides
//!
//! A config file is plain TOML with the watcher options at the top level
//! plus an optional `patterns` list:
//!
//! ```toml
//! patterns = ["src/**/*", "!**/*.tmp"]
//! debounce-ms = 100
//! strategy = "per-directory"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use treewatch::{WatchOptions, WatchStrategy};

/// Pattern used when neither flags nor the config file name any
pub const DEFAULT_PATTERN: &str = "**/*";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FileConfig {
    #[serde(default)]
    pub patterns: Vec<String>,

    #[serde(flatten)]
    pub watch: WatchOptions,
}

/// Values given on the command line; `None` keeps the file's value
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub current_directory: Option<PathBuf>,
    pub debounce_ms: Option<u64>,
    pub settle_ms: Option<u64>,
    pub strategy: Option<WatchStrategy>,
    pub no_keep_alive: bool,
}

/// Load `path`, or defaults when no file was given
pub fn load(path: Option<&Path>) -> Result<FileConfig> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
}

pub fn parse(content: &str) -> Result<FileConfig> {
    Ok(toml::from_str(content)?)
}

/// Apply command-line overrides on top of file options
pub fn apply(mut options: WatchOptions, overrides: &Overrides) -> WatchOptions {
    if let Some(dir) = &overrides.current_directory {
        options.current_directory = Some(dir.clone());
    }
    if let Some(ms) = overrides.debounce_ms {
        options.debounce_ms = ms;
    }
    if let Some(ms) = overrides.settle_ms {
        options.settle_ms = ms;
    }
    if overrides.strategy.is_some() {
        options.strategy = overrides.strategy;
    }
    if overrides.no_keep_alive {
        options.keep_alive = false;
    }
    options
}

/// Command-line patterns win over the file's; fall back to everything
pub fn patterns(cli: &[String], file: &[String]) -> Vec<String> {
    if !cli.is_empty() {
        cli.to_vec()
    } else if !file.is_empty() {
        file.to_vec()
    } else {
        vec![DEFAULT_PATTERN.to_string()]
    }
}
