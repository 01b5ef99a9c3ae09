//! Shared fixtures for the watcher integration tests

use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use treewatch::{Event, WatchOptions, Watcher};

/// Upper bound for anything the native backend has to deliver
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A temporary tree with a canonical root
///
/// ```text
/// one.txt
/// bananas/two.txt
/// bananas/three.txt
/// oranges/four.txt
/// oranges/five.txt
/// pineapples/six.txt
/// ```
pub struct Fixture {
    _dir: TempDir,
    pub root: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();

        for file in [
            "one.txt",
            "bananas/two.txt",
            "bananas/three.txt",
            "oranges/four.txt",
            "oranges/five.txt",
            "pineapples/six.txt",
        ] {
            let path = root.join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, file).unwrap();
        }

        Self { _dir: dir, root }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }

    /// Options rooted here; the watcher closes when dropped
    pub fn options(&self) -> WatchOptions {
        let mut options = WatchOptions::default().with_current_directory(&self.root);
        options.keep_alive = false;
        options.debounce_ms = 20;
        options.settle_ms = 50;
        options
    }

    /// `(kind, relative path)` for comparisons
    pub fn label(&self, event: &Event) -> (String, String) {
        let path = event
            .path()
            .map(|p| relative(&self.root, p))
            .unwrap_or_default();
        (event.name().to_string(), path)
    }
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

pub fn label(kind: &str, path: &str) -> (String, String) {
    (kind.to_string(), path.to_string())
}

/// Collect everything up to and excluding `Ready`
pub async fn until_ready(watcher: &mut Watcher) -> Vec<Event> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(EVENT_TIMEOUT, watcher.recv())
            .await
            .expect("timed out waiting for ready")
            .expect("watcher closed before ready");
        if matches!(event, Event::Ready) {
            return events;
        }
        events.push(event);
    }
}

/// Wait until an event satisfying `found` arrives, returning everything seen
pub async fn wait_for<F>(watcher: &mut Watcher, mut found: F) -> Vec<Event>
where
    F: FnMut(&Event) -> bool,
{
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    loop {
        let event = tokio::time::timeout_at(deadline, watcher.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out; saw {:?}", events))
            .expect("watcher closed");
        let done = found(&event);
        events.push(event);
        if done {
            return events;
        }
    }
}

/// Everything delivered within `window`
pub async fn collect_for(watcher: &mut Watcher, window: Duration) -> Vec<Event> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, watcher.recv()).await {
        events.push(event);
    }
    events
}
