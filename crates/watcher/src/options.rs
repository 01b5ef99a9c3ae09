//! Watcher configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, WatchError};
use crate::metrics::Metrics;

/// How directories are handed to the native primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WatchStrategy {
    /// One non-recursive observation per tracked directory
    PerDirectory,
    /// One recursive observation per root; descendants are placeholders
    Recursive,
}

impl WatchStrategy {
    /// Strategy matching the native primitive of the current platform
    ///
    /// FSEvents and ReadDirectoryChangesW observe whole subtrees through a
    /// single handle; inotify and kqueue do not.
    pub fn platform_default() -> Self {
        if cfg!(any(target_os = "macos", target_os = "windows")) {
            WatchStrategy::Recursive
        } else {
            WatchStrategy::PerDirectory
        }
    }
}

/// Options accepted by [`crate::watch`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WatchOptions {
    /// Base for relative patterns (default: process working directory)
    #[serde(default)]
    pub current_directory: Option<PathBuf>,

    /// Let the engine wind down on its own when the [`crate::Watcher`] is
    /// dropped (default: true)
    ///
    /// When false, dropping the watcher closes it on the spot, stopping the
    /// native observer on the dropping thread. When true the engine shuts
    /// itself down once it sees the receiver is gone.
    #[serde(default = "default_true")]
    pub keep_alive: bool,

    /// Coalescing window per path in milliseconds (default: 50)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Wait after initial discovery before `Ready` (default: 50)
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Force a watch strategy instead of the platform default
    #[serde(default)]
    pub strategy: Option<WatchStrategy>,

    /// Drop `change` events whose mtime did not advance (default: true)
    #[serde(default = "default_true")]
    pub suppress_unchanged: bool,

    /// Instrumentation sink
    #[serde(skip)]
    pub metrics: Option<Arc<dyn Metrics>>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            current_directory: None,
            keep_alive: true,
            debounce_ms: default_debounce_ms(),
            settle_ms: default_settle_ms(),
            strategy: None,
            suppress_unchanged: true,
            metrics: None,
        }
    }
}

impl WatchOptions {
    /// Set the base directory for relative patterns
    pub fn with_current_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_directory = Some(dir.into());
        self
    }

    /// Attach an instrumentation sink
    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Coalescing window
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Settle delay before `Ready`
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Effective strategy
    pub fn strategy(&self) -> WatchStrategy {
        self.strategy.unwrap_or_else(WatchStrategy::platform_default)
    }

    /// Absolute base directory for pattern resolution
    pub fn base_directory(&self) -> Result<PathBuf> {
        let cwd = || std::env::current_dir().map_err(WatchError::CurrentDir);
        match &self.current_directory {
            Some(dir) if dir.is_absolute() => Ok(dir.clone()),
            Some(dir) => Ok(cwd()?.join(dir)),
            None => cwd(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    50
}

fn default_settle_ms() -> u64 {
    50
}
