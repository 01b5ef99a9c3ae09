//! Optional instrumentation hooks
//!
//! The engine never keeps global counters. Callers that want timing or
//! volume numbers pass a [`Metrics`] implementation through
//! [`crate::WatchOptions::metrics`]; [`Counters`] is a ready-made one.

use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::Event;

/// Instrumentation sink for the engine
///
/// Every hook has a no-op default so implementations only override what
/// they care about. Hooks run on the engine task and must not block.
pub trait Metrics: fmt::Debug + Send + Sync {
    /// A raw native notification was received
    fn raw_event(&self) {}

    /// A directory was listed
    fn listed(&self, _dir: &Path, _entries: usize, _elapsed: Duration) {}

    /// A reconcile pass finished for `dir`
    fn reconciled(&self, _dir: &Path, _elapsed: Duration) {}

    /// A public event was delivered
    fn emitted(&self, _event: &Event) {}

    /// A coalesced `change` was dropped because nothing changed
    fn suppressed(&self, _path: &Path) {}
}

/// Atomic counters implementing [`Metrics`]
#[derive(Debug, Default)]
pub struct Counters {
    raw_events: AtomicU64,
    listings: AtomicU64,
    listed_entries: AtomicU64,
    listing_micros: AtomicU64,
    reconciles: AtomicU64,
    emitted: AtomicU64,
    errors: AtomicU64,
    suppressed: AtomicU64,
}

/// Point-in-time copy of [`Counters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub raw_events: u64,
    pub listings: u64,
    pub listed_entries: u64,
    pub listing_micros: u64,
    pub reconciles: u64,
    pub emitted: u64,
    pub errors: u64,
    pub suppressed: u64,
}

impl Counters {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every counter
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            raw_events: self.raw_events.load(Ordering::Relaxed),
            listings: self.listings.load(Ordering::Relaxed),
            listed_entries: self.listed_entries.load(Ordering::Relaxed),
            listing_micros: self.listing_micros.load(Ordering::Relaxed),
            reconciles: self.reconciles.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
        }
    }
}

impl Metrics for Counters {
    fn raw_event(&self) {
        self.raw_events.fetch_add(1, Ordering::Relaxed);
    }

    fn listed(&self, _dir: &Path, entries: usize, elapsed: Duration) {
        self.listings.fetch_add(1, Ordering::Relaxed);
        self.listed_entries.fetch_add(entries as u64, Ordering::Relaxed);
        self.listing_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    fn reconciled(&self, _dir: &Path, _elapsed: Duration) {
        self.reconciles.fetch_add(1, Ordering::Relaxed);
    }

    fn emitted(&self, event: &Event) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        if matches!(event, Event::Error { .. }) {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn suppressed(&self, _path: &Path) {
        self.suppressed.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_counters_accumulate() {
        let counters = Counters::new();
        let dir = Path::new("/tmp/x");

        counters.raw_event();
        counters.raw_event();
        counters.listed(dir, 3, Duration::from_micros(40));
        counters.listed(dir, 2, Duration::from_micros(10));
        counters.reconciled(dir, Duration::from_millis(1));
        counters.emitted(&Event::Add(PathBuf::from("/tmp/x/a")));
        counters.suppressed(dir);

        let snap = counters.snapshot();
        assert_eq!(snap.raw_events, 2);
        assert_eq!(snap.listings, 2);
        assert_eq!(snap.listed_entries, 5);
        assert_eq!(snap.listing_micros, 50);
        assert_eq!(snap.reconciles, 1);
        assert_eq!(snap.emitted, 1);
        assert_eq!(snap.errors, 0);
        assert_eq!(snap.suppressed, 1);
    }
}
