//! Per-path event coalescing
//!
//! Each path has at most one pending event. A newer event replaces it only
//! when it ranks at least as high, and every event pushes the deadline
//! back by the full window. Deadlines are plain instants; the engine sleeps
//! until [`Coalescer::next_deadline`] and then takes what is due.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::time::Instant;

use crate::EventKind;

#[derive(Debug, Clone, Copy)]
struct Pending {
    kind: EventKind,
    deadline: Instant,
}

#[derive(Debug)]
pub(crate) struct Coalescer {
    window: Duration,
    pending: HashMap<PathBuf, Pending>,
    /// Last modification time seen per tracked file
    mtimes: HashMap<PathBuf, SystemTime>,
}

impl Coalescer {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
            mtimes: HashMap::new(),
        }
    }

    pub(crate) fn push(&mut self, path: PathBuf, kind: EventKind) {
        self.push_at(path, kind, Instant::now());
    }

    pub(crate) fn push_at(&mut self, path: PathBuf, kind: EventKind, now: Instant) {
        let deadline = now + self.window;
        self.pending
            .entry(path)
            .and_modify(|pending| {
                if kind.rank() >= pending.kind.rank() {
                    pending.kind = kind;
                }
                pending.deadline = deadline;
            })
            .or_insert(Pending { kind, deadline });
    }

    /// Earliest deadline among pending paths
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|pending| pending.deadline).min()
    }

    /// Remove and return everything due at `now`, highest rank first
    pub(crate) fn take_due(&mut self, now: Instant) -> Vec<(PathBuf, EventKind)> {
        let due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();

        let mut out: Vec<(PathBuf, EventKind)> = due
            .into_iter()
            .filter_map(|path| {
                let pending = self.pending.remove(&path)?;
                Some((path, pending.kind))
            })
            .collect();
        out.sort_by(|a, b| b.1.rank().cmp(&a.1.rank()).then_with(|| a.0.cmp(&b.0)));
        out
    }

    /// Remove the pending event for `path` regardless of its deadline
    pub(crate) fn take(&mut self, path: &Path) -> Option<EventKind> {
        self.pending.remove(path).map(|pending| pending.kind)
    }

    #[cfg(test)]
    pub(crate) fn pending_kind(&self, path: &Path) -> Option<EventKind> {
        self.pending.get(path).map(|pending| pending.kind)
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    /// Drop every pending event without emitting
    pub(crate) fn clear(&mut self) {
        self.pending.clear();
        self.mtimes.clear();
    }

    pub(crate) fn observe_mtime(&mut self, path: PathBuf, mtime: SystemTime) {
        self.mtimes.insert(path, mtime);
    }

    /// True when `mtime` is newer than the last one seen for `path`
    pub(crate) fn mtime_advanced(&self, path: &Path, mtime: SystemTime) -> bool {
        self.mtimes.get(path).map_or(true, |last| mtime > *last)
    }

    pub(crate) fn forget(&mut self, path: &Path) {
        self.mtimes.remove(path);
    }

    /// Drop remembered mtimes and pending `change`s strictly below `dir`
    ///
    /// Removals already queued for descendants stay so they can still fire.
    pub(crate) fn forget_under(&mut self, dir: &Path) {
        self.mtimes
            .retain(|path, _| path == dir || !path.starts_with(dir));
        self.pending.retain(|path, pending| {
            path == dir || !path.starts_with(dir) || pending.kind != EventKind::Change
        });
    }
}

/// Whether `mtime` looks like it came from a whole-second filesystem
///
/// Comparing such timestamps misses edits within the same second.
pub(crate) fn is_coarse(mtime: SystemTime) -> bool {
    mtime
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|since| since.subsec_nanos() == 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(50);

    fn path(p: &str) -> PathBuf {
        PathBuf::from(p)
    }

    #[test]
    fn test_higher_rank_replaces() {
        let mut coalescer = Coalescer::new(WINDOW);
        let start = Instant::now();

        coalescer.push_at(path("/w/a"), EventKind::Change, start);
        coalescer.push_at(path("/w/a"), EventKind::Unlink, start);
        assert_eq!(coalescer.pending_kind(Path::new("/w/a")), Some(EventKind::Unlink));

        // A stale change cannot hide the removal
        coalescer.push_at(path("/w/a"), EventKind::Change, start);
        assert_eq!(coalescer.pending_kind(Path::new("/w/a")), Some(EventKind::Unlink));
        assert_eq!(coalescer.len(), 1);
    }

    #[test]
    fn test_equal_rank_replaces() {
        let mut coalescer = Coalescer::new(WINDOW);
        let start = Instant::now();

        coalescer.push_at(path("/w/a"), EventKind::Add, start);
        coalescer.push_at(path("/w/a"), EventKind::Add, start);
        assert_eq!(coalescer.len(), 1);
        assert_eq!(coalescer.pending_kind(Path::new("/w/a")), Some(EventKind::Add));
    }

    #[test]
    fn test_every_push_resets_deadline() {
        let mut coalescer = Coalescer::new(WINDOW);
        let start = Instant::now();

        coalescer.push_at(path("/w/a"), EventKind::Unlink, start);
        let later = start + Duration::from_millis(30);
        // Lower rank does not replace the kind but still pushes the deadline
        coalescer.push_at(path("/w/a"), EventKind::Change, later);

        assert_eq!(coalescer.next_deadline(), Some(later + WINDOW));
        assert!(coalescer.take_due(start + WINDOW).is_empty());
        assert_eq!(
            coalescer.take_due(later + WINDOW),
            vec![(path("/w/a"), EventKind::Unlink)]
        );
        assert_eq!(coalescer.next_deadline(), None);
    }

    #[test]
    fn test_due_events_ordered_by_rank() {
        let mut coalescer = Coalescer::new(WINDOW);
        let start = Instant::now();

        coalescer.push_at(path("/w/c"), EventKind::Change, start);
        coalescer.push_at(path("/w/d"), EventKind::UnlinkDir, start);
        coalescer.push_at(path("/w/b"), EventKind::Unlink, start);
        coalescer.push_at(path("/w/a"), EventKind::Unlink, start);

        let kinds: Vec<(PathBuf, EventKind)> = coalescer.take_due(start + WINDOW);
        assert_eq!(
            kinds,
            vec![
                (path("/w/d"), EventKind::UnlinkDir),
                (path("/w/a"), EventKind::Unlink),
                (path("/w/b"), EventKind::Unlink),
                (path("/w/c"), EventKind::Change),
            ]
        );
    }

    #[test]
    fn test_take_and_clear() {
        let mut coalescer = Coalescer::new(WINDOW);
        coalescer.push(path("/w/a"), EventKind::Unlink);
        coalescer.push(path("/w/b"), EventKind::Change);

        assert_eq!(coalescer.take(Path::new("/w/a")), Some(EventKind::Unlink));
        assert_eq!(coalescer.take(Path::new("/w/a")), None);

        coalescer.clear();
        assert_eq!(coalescer.len(), 0);
        assert_eq!(coalescer.next_deadline(), None);
    }

    #[test]
    fn test_mtime_tracking() {
        let mut coalescer = Coalescer::new(WINDOW);
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        let t1 = t0 + Duration::from_millis(5);

        // Nothing recorded yet counts as advanced
        assert!(coalescer.mtime_advanced(Path::new("/w/a"), t0));
        coalescer.observe_mtime(path("/w/a"), t0);
        assert!(!coalescer.mtime_advanced(Path::new("/w/a"), t0));
        assert!(coalescer.mtime_advanced(Path::new("/w/a"), t1));

        coalescer.forget(Path::new("/w/a"));
        assert!(coalescer.mtime_advanced(Path::new("/w/a"), t0));
    }

    #[test]
    fn test_forget_under_keeps_removals() {
        let mut coalescer = Coalescer::new(WINDOW);
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
        coalescer.observe_mtime(path("/w/d/a"), t0);
        coalescer.observe_mtime(path("/w/dd/a"), t0);
        coalescer.push(path("/w/d/a"), EventKind::Change);
        coalescer.push(path("/w/d/b"), EventKind::Unlink);
        coalescer.push(path("/w/d"), EventKind::UnlinkDir);

        coalescer.forget_under(Path::new("/w/d"));

        assert_eq!(coalescer.pending_kind(Path::new("/w/d/a")), None);
        assert_eq!(coalescer.pending_kind(Path::new("/w/d/b")), Some(EventKind::Unlink));
        assert_eq!(coalescer.pending_kind(Path::new("/w/d")), Some(EventKind::UnlinkDir));
        assert!(coalescer.mtime_advanced(Path::new("/w/d/a"), t0));
        // Sibling with a shared name prefix is untouched
        assert!(!coalescer.mtime_advanced(Path::new("/w/dd/a"), t0));
    }

    #[test]
    fn test_is_coarse() {
        assert!(is_coarse(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)));
        assert!(!is_coarse(
            SystemTime::UNIX_EPOCH + Duration::from_nanos(1_700_000_000_000_000_001)
        ));
    }
}
