//! Recursive, glob-driven filesystem watching
//!
//! This crate watches the files and directories selected by a list of glob
//! patterns and reports a normalized event stream:
//! - `Add` / `AddDir` for everything found at startup and created later
//! - `Change` for content changes, one per burst of native notifications
//! - `Unlink` / `UnlinkDir` for removals
//! - `Ready` once initial discovery has settled
//!
//! Native notifications are only used as hints. Every hint re-lists the
//! affected directory and the result is diffed against what is tracked, so
//! duplicate, late or missing notifications do not leak into the stream.
//!
//! ```no_run
//! # async fn run() -> treewatch::Result<()> {
//! let mut watcher = treewatch::watch(["src/**/*.rs", "!**/generated/**"], Default::default())?;
//! while let Some(event) = watcher.recv().await {
//!     println!("{event}");
//! }
//! # Ok(())
//! # }
//! ```

mod debounce;
pub mod error;
pub mod lister;
pub mod metrics;
pub mod options;
pub mod pattern;
pub mod platform;
mod reconcile;
mod state;
mod table;

pub use error::{Result, WatchError};
pub use metrics::{Counters, CountersSnapshot, Metrics};
pub use options::{WatchOptions, WatchStrategy};
pub use pattern::MatchRules;
pub use platform::{NotifyObserver, Observer, RawEvent, RawKind};
pub use state::EngineState;

use futures::Stream;
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::platform::{Platform, SharedObserver};
use crate::reconcile::Engine;
use crate::state::{Emitter, Lifecycle};

/// Kind of a path event, ordered by coalescing priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Change,
    Add,
    AddDir,
    Unlink,
    UnlinkDir,
}

impl EventKind {
    /// Coalescing priority; structural events outrank content changes
    pub fn rank(self) -> u8 {
        match self {
            EventKind::Change => 1,
            EventKind::Add => 2,
            EventKind::AddDir => 3,
            EventKind::Unlink => 4,
            EventKind::UnlinkDir => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Change => "change",
            EventKind::Add => "add",
            EventKind::AddDir => "addDir",
            EventKind::Unlink => "unlink",
            EventKind::UnlinkDir => "unlinkDir",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public watcher event. Paths are absolute.
#[derive(Debug, Clone)]
pub enum Event {
    /// Initial discovery settled; delivered once
    Ready,
    Add(PathBuf),
    AddDir(PathBuf),
    Change(PathBuf),
    Unlink(PathBuf),
    UnlinkDir(PathBuf),
    /// Non-fatal error tied to a path
    Error { path: PathBuf, error: Arc<WatchError> },
}

impl Event {
    pub(crate) fn from_kind(kind: EventKind, path: PathBuf) -> Self {
        match kind {
            EventKind::Change => Event::Change(path),
            EventKind::Add => Event::Add(path),
            EventKind::AddDir => Event::AddDir(path),
            EventKind::Unlink => Event::Unlink(path),
            EventKind::UnlinkDir => Event::UnlinkDir(path),
        }
    }

    /// Path carried by the event, `None` for `Ready`
    pub fn path(&self) -> Option<&Path> {
        match self {
            Event::Ready => None,
            Event::Add(path)
            | Event::AddDir(path)
            | Event::Change(path)
            | Event::Unlink(path)
            | Event::UnlinkDir(path)
            | Event::Error { path, .. } => Some(path),
        }
    }

    /// Path event kind, `None` for `Ready` and `Error`
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            Event::Add(_) => Some(EventKind::Add),
            Event::AddDir(_) => Some(EventKind::AddDir),
            Event::Change(_) => Some(EventKind::Change),
            Event::Unlink(_) => Some(EventKind::Unlink),
            Event::UnlinkDir(_) => Some(EventKind::UnlinkDir),
            Event::Ready | Event::Error { .. } => None,
        }
    }

    /// Event name as used on the wire (`ready`, `add`, `addDir`, ...)
    pub fn name(&self) -> &'static str {
        match self {
            Event::Ready => "ready",
            Event::Error { .. } => "error",
            other => other.kind().map_or("unknown", EventKind::as_str),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Ready => f.write_str("ready"),
            Event::Error { path, error } => write!(f, "error: {}: {}", path.display(), error),
            other => match other.path() {
                Some(path) => write!(f, "{}: {}", other.name(), path.display()),
                None => f.write_str(other.name()),
            },
        }
    }
}

/// Start watching `patterns` with the platform's native backend
///
/// Relative patterns resolve against [`WatchOptions::current_directory`].
/// A leading `!` excludes; later patterns override earlier ones. Must be
/// called from within a tokio runtime.
pub fn watch<I, S>(patterns: I, options: WatchOptions) -> Result<Watcher>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    watch_with(patterns, options, |tx| {
        let observer: Box<dyn Observer> = Box::new(NotifyObserver::new(tx)?);
        Ok(observer)
    })
}

/// Like [`watch`], with a caller-supplied native observer
///
/// `make_observer` receives the channel the observer must push raw
/// notifications into.
pub fn watch_with<I, S, F>(patterns: I, options: WatchOptions, make_observer: F) -> Result<Watcher>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
    F: FnOnce(mpsc::UnboundedSender<RawEvent>) -> Result<Box<dyn Observer>>,
{
    let runtime = tokio::runtime::Handle::try_current().map_err(|_| WatchError::NoRuntime)?;

    let base = resolve_base(options.base_directory()?);
    let rules = MatchRules::resolve(patterns, &base)?;

    let (raw_tx, raw_rx) = mpsc::unbounded_channel();
    let observer: SharedObserver = Arc::new(Mutex::new(make_observer(raw_tx)?));

    let (event_tx, events) = mpsc::unbounded_channel();
    let lifecycle = Arc::new(Lifecycle::new());
    let emitter = Emitter::new(event_tx, lifecycle.clone(), options.metrics.clone());
    let platform = Platform::new(options.strategy(), observer.clone());

    info!("Watching from {} ({:?})", base.display(), options.strategy());
    let engine = Engine::new(rules, platform, emitter, lifecycle.clone(), &options);
    runtime.spawn(engine.run(raw_rx));

    Ok(Watcher {
        events,
        handle: WatchHandle {
            lifecycle,
            observer,
        },
        keep_alive: options.keep_alive,
    })
}

/// Canonicalize where possible so reported paths match what the OS reports
fn resolve_base(base: PathBuf) -> PathBuf {
    if cfg!(windows) {
        // Avoid the verbatim `\\?\` prefix
        return base;
    }
    std::fs::canonicalize(&base).unwrap_or(base)
}

/// Receiving end of a running watcher
///
/// Dropping it closes the watcher on the spot when `keep_alive` was turned
/// off. Otherwise the engine keeps observing until [`WatchHandle::close`]
/// or until it notices the receiver is gone, whichever comes first.
pub struct Watcher {
    events: mpsc::UnboundedReceiver<Event>,
    handle: WatchHandle,
    keep_alive: bool,
}

impl Watcher {
    /// Next event, or `None` once the watcher is closed
    pub async fn recv(&mut self) -> Option<Event> {
        if self.handle.is_closed() {
            return None;
        }
        let event = self.events.recv().await?;
        // Queued before close() but not yet consumed
        if self.handle.is_closed() {
            return None;
        }
        Some(event)
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<Event> {
        if self.handle.is_closed() {
            return None;
        }
        self.events.try_recv().ok()
    }

    /// Cloneable handle for closing from elsewhere
    pub fn handle(&self) -> WatchHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> EngineState {
        self.handle.state()
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Stop watching; see [`WatchHandle::close`]
    pub fn close(&self) {
        self.handle.close();
    }
}

impl Stream for Watcher {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        if self.handle.is_closed() {
            return Poll::Ready(None);
        }
        match self.events.poll_recv(cx) {
            Poll::Ready(Some(_)) if self.handle.is_closed() => Poll::Ready(None),
            other => other,
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        if !self.keep_alive {
            self.handle.close();
        }
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("state", &self.state())
            .field("keep_alive", &self.keep_alive)
            .finish()
    }
}

/// Shared control over a running watcher
#[derive(Clone)]
pub struct WatchHandle {
    lifecycle: Arc<Lifecycle>,
    observer: SharedObserver,
}

impl WatchHandle {
    /// Stop every native observation and suppress all further events
    ///
    /// Synchronous and idempotent. Pending coalesced events are dropped.
    pub fn close(&self) {
        if self.lifecycle.close() {
            self.observer.lock().shutdown();
            debug!("Watcher closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    pub fn state(&self) -> EngineState {
        self.lifecycle.state()
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("state", &self.state())
            .finish()
    }
}
