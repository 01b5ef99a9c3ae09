//! tw - watch a tree of files by glob and print what changes

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use treewatch::{Counters, Event, WatchStrategy};

mod config;
mod logging;
mod output;

use output::{Format, Printer};

/// Watch files matching glob patterns and print add/change/unlink events
#[derive(Parser, Debug)]
#[command(name = "tw")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Glob patterns; prefix with `!` to exclude, later patterns win (default: **/*)
    patterns: Vec<String>,

    /// Base directory for relative patterns (default: current directory)
    #[arg(short = 'C', long = "cwd", value_name = "DIR")]
    cwd: Option<PathBuf>,

    /// Coalescing window per path
    #[arg(long, value_name = "MS")]
    debounce_ms: Option<u64>,

    /// Wait after initial discovery before reporting ready
    #[arg(long, value_name = "MS")]
    settle_ms: Option<u64>,

    /// Force a watch strategy instead of the platform default
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    /// TOML file with patterns and watcher options
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print one JSON object per event
    #[arg(long)]
    json: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Log watcher activity to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Exit once initial discovery is done
    #[arg(long)]
    no_keep_alive: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    PerDirectory,
    Recursive,
}

impl From<StrategyArg> for WatchStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::PerDirectory => WatchStrategy::PerDirectory,
            StrategyArg::Recursive => WatchStrategy::Recursive,
        }
    }
}

impl Cli {
    fn overrides(&self) -> config::Overrides {
        config::Overrides {
            current_directory: self.cwd.clone(),
            debounce_ms: self.debounce_ms,
            settle_ms: self.settle_ms,
            strategy: self.strategy.map(Into::into),
            no_keep_alive: self.no_keep_alive,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let file_config = config::load(cli.config.as_deref())?;
    let patterns = config::patterns(&cli.patterns, &file_config.patterns);
    let mut options = config::apply(file_config.watch, &cli.overrides());

    let counters = Arc::new(Counters::new());
    options.metrics = Some(counters.clone());
    let keep_alive = options.keep_alive;

    let format = if cli.json { Format::Json } else { Format::Text };
    let color = !cli.no_color && std::env::var_os("NO_COLOR").is_none();
    let printer = Printer::new(format, color);

    info!("Starting glob for {:?}", patterns);
    let started = Instant::now();
    let mut watcher = treewatch::watch(&patterns, options).context("Failed to start watcher")?;
    let handle = watcher.handle();

    let (mut files, mut dirs) = (0usize, 0usize);
    let mut ready = false;

    loop {
        tokio::select! {
            event = watcher.recv() => {
                let Some(event) = event else { break };
                match &event {
                    Event::Ready => {
                        ready = true;
                        printer.ready(started.elapsed(), files, dirs)?;
                        if !keep_alive {
                            handle.close();
                            break;
                        }
                        continue;
                    }
                    Event::Add(_) if !ready => files += 1,
                    Event::AddDir(_) if !ready => dirs += 1,
                    _ => {}
                }
                printer.event(&event, ready)?;
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                info!("Interrupted, closing watcher");
                handle.close();
                break;
            }
        }
    }

    printer.summary(&counters.snapshot())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_flags() {
        let cli = Cli::parse_from([
            "tw",
            "src/**/*.rs",
            "!**/target/**",
            "-C",
            "/tmp/project",
            "--debounce-ms",
            "20",
            "--strategy",
            "per-directory",
            "--no-keep-alive",
        ]);

        assert_eq!(cli.patterns, vec!["src/**/*.rs", "!**/target/**"]);
        let overrides = cli.overrides();
        assert_eq!(overrides.current_directory, Some(PathBuf::from("/tmp/project")));
        assert_eq!(overrides.debounce_ms, Some(20));
        assert_eq!(overrides.strategy, Some(WatchStrategy::PerDirectory));
        assert!(overrides.no_keep_alive);
        assert!(overrides.settle_ms.is_none());
    }
}
