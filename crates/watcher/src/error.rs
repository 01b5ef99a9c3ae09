//! Error types for the watcher
//!
//! Only construction-time failures are returned from [`crate::watch`].
//! Everything that goes wrong afterwards is delivered as an
//! [`crate::Event::Error`] and never stops the engine.

use std::io;
use std::path::PathBuf;

/// Result type for watcher operations
pub type Result<T> = std::result::Result<T, WatchError>;

/// Errors produced while building or running a watcher
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// `watch()` was called with an empty pattern list
    #[error("no watch patterns were given")]
    NoPatterns,

    /// A pattern could not be compiled
    #[error("invalid pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    /// The base directory could not be determined
    #[error("failed to resolve the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    /// `watch()` was called outside of a tokio runtime
    #[error("watch() must be called from within a tokio runtime")]
    NoRuntime,

    /// The native primitive refused to observe a path
    #[error("failed to observe {}: {source}", .path.display())]
    Observe {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// A directory listing failed on a path that still exists
    #[error("failed to list {}: {source}", .path.display())]
    List {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A re-stat during coalescing failed for a reason other than removal
    #[error("failed to stat {}: {source}", .path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Error reported by the native notification backend
    #[error("native watcher error: {0}")]
    Native(#[from] notify::Error),
}
