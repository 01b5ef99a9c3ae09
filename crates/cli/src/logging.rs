//! Tracing setup for the `tw` binary

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber
///
/// `RUST_LOG` wins when set. Otherwise only warnings are shown, or
/// `info` for the watcher with `--verbose`. Logs go to stderr so stdout
/// stays a clean event stream.
pub fn init(verbose: bool) {
    let fallback = if verbose {
        "warn,treewatch=info,tw=info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    fmt()
        .with_target(verbose)
        .with_level(true)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
