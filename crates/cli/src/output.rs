//! Event rendering for stdout

use anyhow::Result;
use owo_colors::OwoColorize;
use serde::Serialize;
use std::borrow::Cow;
use std::io::Write;
use std::time::Duration;
use treewatch::{CountersSnapshot, Event};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Json,
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<Cow<'a, str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Serialize)]
struct JsonReady {
    event: &'static str,
    elapsed_ms: u128,
    files: usize,
    dirs: usize,
}

#[derive(Serialize)]
struct JsonSummary<'a> {
    event: &'static str,
    counters: &'a CountersSnapshot,
}

/// Writes events in the selected format
#[derive(Debug, Clone, Copy)]
pub struct Printer {
    format: Format,
    color: bool,
}

impl Printer {
    pub fn new(format: Format, color: bool) -> Self {
        Self { format, color }
    }

    /// Print one event; text output hides the initial discovery
    pub fn event(&self, event: &Event, ready: bool) -> Result<()> {
        let line = match self.format {
            Format::Json => Some(render_json(event)?),
            Format::Text => {
                let discovery = matches!(event, Event::Add(_) | Event::AddDir(_));
                if discovery && !ready {
                    None
                } else {
                    Some(render_text(event, self.color))
                }
            }
        };
        match line {
            Some(line) => write_line(&line),
            None => Ok(()),
        }
    }

    pub fn ready(&self, elapsed: Duration, files: usize, dirs: usize) -> Result<()> {
        match self.format {
            Format::Json => write_line(&serde_json::to_string(&JsonReady {
                event: "ready",
                elapsed_ms: elapsed.as_millis(),
                files,
                dirs,
            })?),
            Format::Text => {
                write_line(&format!("ready in {}ms", elapsed.as_millis()))?;
                write_line(&format!("watching {} files", files))?;
                write_line(&format!("watching {} directories", dirs))
            }
        }
    }

    /// Counters at exit; JSON goes to stdout, text to stderr
    pub fn summary(&self, counters: &CountersSnapshot) -> Result<()> {
        match self.format {
            Format::Json => write_line(&serde_json::to_string(&JsonSummary {
                event: "summary",
                counters,
            })?),
            Format::Text => {
                let mut err = std::io::stderr().lock();
                writeln!(
                    err,
                    "{} raw notifications, {} listings ({} entries, {}ms), {} events, {} errors, {} suppressed",
                    counters.raw_events,
                    counters.listings,
                    counters.listed_entries,
                    counters.listing_micros / 1000,
                    counters.emitted,
                    counters.errors,
                    counters.suppressed
                )?;
                Ok(())
            }
        }
    }
}

fn write_line(line: &str) -> Result<()> {
    let mut out = std::io::stdout().lock();
    writeln!(out, "{}", line)?;
    out.flush()?;
    Ok(())
}

/// `kind: /abs/path`, colored by kind
pub fn render_text(event: &Event, color: bool) -> String {
    let plain = event.to_string();
    if !color {
        return plain;
    }
    match event {
        Event::Add(_) | Event::AddDir(_) => plain.green().to_string(),
        Event::Change(_) => plain.yellow().to_string(),
        Event::Unlink(_) | Event::UnlinkDir(_) => plain.red().to_string(),
        Event::Error { .. } => plain.red().bold().to_string(),
        Event::Ready => plain.bold().to_string(),
    }
}

/// One JSON object per event
pub fn render_json(event: &Event) -> Result<String> {
    let message = match event {
        Event::Error { error, .. } => Some(error.to_string()),
        _ => None,
    };
    Ok(serde_json::to_string(&JsonEvent {
        event: event.name(),
        path: event.path().map(|p| p.to_string_lossy()),
        message,
    })?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;
    use treewatch::WatchError;

    #[test]
    fn test_render_text() {
        let event = Event::UnlinkDir(PathBuf::from("/w/gone"));
        assert_eq!(render_text(&event, false), "unlinkDir: /w/gone");
        assert!(render_text(&event, true).contains("unlinkDir: /w/gone"));
    }

    #[test]
    fn test_render_json() {
        let json = render_json(&Event::Add(PathBuf::from("/w/a.txt"))).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["event"], "add");
        assert_eq!(value["path"], "/w/a.txt");
        assert!(value.get("message").is_none());

        let json = render_json(&Event::Error {
            path: PathBuf::from("/w/locked"),
            error: Arc::new(WatchError::NoPatterns),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["event"], "error");
        assert_eq!(value["message"], "no watch patterns were given");

        let json = render_json(&Event::Ready).unwrap();
        assert_eq!(json, r#"{"event":"ready"}"#);
    }
}
