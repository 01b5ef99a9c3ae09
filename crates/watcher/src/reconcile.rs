//! Reconciliation engine
//!
//! A single task owns the watch table and the coalescer. Raw native
//! notifications never become public events by themselves: they only tell
//! the engine which directory to re-list. The listing is diffed against the
//! table, and what differs is reported.

use futures::future::{BoxFuture, FutureExt};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use crate::debounce::{is_coarse, Coalescer};
use crate::error::WatchError;
use crate::lister::{list_stable, EntryKind};
use crate::metrics::Metrics;
use crate::options::WatchOptions;
use crate::pattern::MatchRules;
use crate::platform::{Platform, RawEvent, RawKind};
use crate::state::{Emitter, Lifecycle};
use crate::table::{Tracked, WatchTable};
use crate::{Event, EventKind};

pub(crate) struct Engine {
    rules: MatchRules,
    table: WatchTable,
    coalescer: Coalescer,
    platform: Platform,
    emitter: Emitter,
    lifecycle: Arc<Lifecycle>,
    metrics: Option<Arc<dyn Metrics>>,
    suppress_unchanged: bool,
    settle: Duration,
}

impl Engine {
    pub(crate) fn new(
        rules: MatchRules,
        platform: Platform,
        emitter: Emitter,
        lifecycle: Arc<Lifecycle>,
        options: &WatchOptions,
    ) -> Self {
        Self {
            rules,
            table: WatchTable::new(),
            coalescer: Coalescer::new(options.debounce()),
            platform,
            emitter,
            lifecycle,
            metrics: options.metrics.clone(),
            suppress_unchanged: options.suppress_unchanged,
            settle: options.settle(),
        }
    }

    /// Drive the engine until the watcher is closed
    pub(crate) async fn run(mut self, mut raw_rx: mpsc::UnboundedReceiver<RawEvent>) {
        let lifecycle = self.lifecycle.clone();
        let receiver = self.emitter.receiver_watch();
        let started = Instant::now();

        tokio::select! {
            biased;
            _ = lifecycle.closed() => return self.teardown(),
            _ = receiver.closed() => return self.receiver_dropped(),
            _ = self.discover() => {}
        }
        tokio::select! {
            biased;
            _ = lifecycle.closed() => return self.teardown(),
            _ = receiver.closed() => return self.receiver_dropped(),
            _ = sleep(self.settle) => {}
        }

        // Whatever arrived while starting describes the tree discovery already saw
        let mut discarded = 0usize;
        while raw_rx.try_recv().is_ok() {
            self.count_raw();
            discarded += 1;
        }

        let (files, dirs) = self.table.counts();
        info!(
            "Initial discovery done in {:?}: {} files, {} directories ({} startup notifications discarded)",
            started.elapsed(),
            files,
            dirs,
            discarded
        );
        self.emitter.ready();

        let mut raw_open = true;
        loop {
            let deadline = self.coalescer.next_deadline();
            tokio::select! {
                biased;
                _ = lifecycle.closed() => break,
                _ = receiver.closed() => return self.receiver_dropped(),
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.flush_due().await;
                }
                raw = raw_rx.recv(), if raw_open => match raw {
                    Some(first) => {
                        let mut batch = vec![first];
                        while let Ok(next) = raw_rx.try_recv() {
                            batch.push(next);
                        }
                        self.route(batch).await;
                    }
                    None => {
                        warn!("Native observer stopped delivering notifications");
                        raw_open = false;
                    }
                },
            }
        }

        self.teardown();
    }

    /// Attach every root; seeds the table and emits the initial adds
    async fn discover(&mut self) {
        debug!("Using {:?} watch strategy", self.platform.strategy());
        for root in self.discovery_roots().await {
            debug!("Discovering {}", root.display());
            self.attach_directory(root, None).await;
        }
    }

    /// Pattern roots moved up to their nearest existing directory
    ///
    /// A root that does not exist yet is reached through its ancestors,
    /// which are tracked because they lead to a pattern. The climb stops at
    /// the base directory for roots below it.
    pub(crate) fn discovery_roots(&self) -> impl Future<Output = Vec<PathBuf>> + Send + 'static {
        climb_to_existing(self.rules.roots(), self.rules.base_dir().to_path_buf())
    }

    /// The `Watcher` is gone; nobody can receive or close anymore
    fn receiver_dropped(&mut self) {
        info!("Event receiver dropped, closing watcher");
        self.lifecycle.close();
        self.teardown();
    }

    fn teardown(&mut self) {
        let pending = self.coalescer.len();
        self.coalescer.clear();
        let dropped = self.table.drain();
        self.platform.shutdown();
        debug!(
            "Engine stopped: {} pending events discarded, {} directories released",
            pending,
            dropped.len()
        );
    }

    fn count_raw(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.raw_event();
        }
    }

    /// Turn a batch of raw notifications into coalescer entries and
    /// directory re-listings
    pub(crate) async fn route(&mut self, batch: Vec<RawEvent>) {
        let mut dirty: BTreeSet<PathBuf> = BTreeSet::new();

        for raw in batch {
            self.count_raw();
            match raw {
                RawEvent::Changed { kind, path } => self.route_path(kind, path, &mut dirty),
                RawEvent::Rescan => {
                    debug!("Native backend requested a rescan");
                    dirty.extend(self.table.directories());
                }
                RawEvent::Failed { path, error } => {
                    let path = path
                        .or_else(|| self.rules.roots().into_iter().next())
                        .unwrap_or_else(|| self.rules.base_dir().to_path_buf());
                    warn!("Native watcher error at {}: {}", path.display(), error);
                    self.emitter.emit(Event::Error {
                        path,
                        error: Arc::new(WatchError::Native(error)),
                    });
                }
            }
        }

        // Parents sort before children, so a removed subtree is skipped
        for dir in dirty {
            if self.lifecycle.is_closed() {
                return;
            }
            if self.table.is_dir(&dir) {
                self.reconcile(&dir).await;
            }
        }
    }

    fn route_path(&mut self, kind: RawKind, path: PathBuf, dirty: &mut BTreeSet<PathBuf>) {
        let structural = kind != RawKind::Write;
        let parent_dir = |table: &WatchTable, path: &Path| {
            path.parent().and_then(|parent| table.nearest_dir(parent))
        };

        if self.table.is_file(&path) {
            trace!("{:?} on tracked file {}", kind, path.display());
            if structural {
                if let Some(dir) = parent_dir(&self.table, &path) {
                    dirty.insert(dir);
                }
            }
            self.coalescer.push(path, EventKind::Change);
        } else if self.table.is_dir(&path) {
            if structural {
                if let Some(dir) = parent_dir(&self.table, &path) {
                    dirty.insert(dir);
                }
            }
            dirty.insert(path);
        } else if let Some(dir) = self.table.nearest_dir(&path) {
            trace!("{:?} on untracked {}, re-listing {}", kind, path.display(), dir.display());
            dirty.insert(dir);
        } else {
            trace!("Notification outside the watched tree: {}", path.display());
        }
    }

    /// Re-list `dir` and bring the table in line with it
    ///
    /// Returns false when the listing failed or the engine closed meanwhile.
    pub(crate) async fn reconcile(&mut self, dir: &Path) -> bool {
        let started = Instant::now();
        let listing = match list_stable(dir).await {
            Ok(listing) => listing,
            Err(e) => {
                self.listing_failed(dir, e).await;
                return false;
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.listed(dir, listing.len(), started.elapsed());
        }
        if self.lifecycle.is_closed() || !self.table.is_dir(dir) {
            return false;
        }

        let present: HashSet<PathBuf> = listing.iter().map(|l| l.path.clone()).collect();
        self.table.forget_abandoned(dir, &present);

        let candidates: Vec<_> = listing
            .into_iter()
            .filter(|l| self.rules.wants(&l.path) && !self.table.is_abandoned(&l.path))
            .collect();
        let wanted: HashMap<&Path, EntryKind> = candidates
            .iter()
            .map(|l| (l.path.as_path(), l.kind))
            .collect();

        // Removals first, including entries whose type flipped
        for (path, is_dir) in self.table.children_of(dir) {
            let kept = match wanted.get(path.as_path()) {
                Some(EntryKind::Directory) => is_dir,
                Some(EntryKind::File) => !is_dir,
                None => false,
            };
            if !kept {
                self.remove_entry(&path, is_dir);
            }
        }

        for listed in candidates {
            if self.lifecycle.is_closed() {
                return false;
            }
            if self.table.contains(&listed.path) {
                continue;
            }
            match listed.kind {
                EntryKind::File => self.add_file(listed.path, dir, listed.modified),
                EntryKind::Directory => {
                    self.attach_directory(listed.path, Some(dir.to_path_buf()))
                        .await;
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.reconciled(dir, started.elapsed());
        }
        true
    }

    /// Start tracking a directory, discover its contents, then report it
    ///
    /// `parent` is `None` for discovery roots, which are always wanted.
    pub(crate) fn attach_directory(
        &mut self,
        path: PathBuf,
        parent: Option<PathBuf>,
    ) -> BoxFuture<'_, bool> {
        async move {
            if self.lifecycle.is_closed() || self.table.contains(&path) {
                return false;
            }
            if parent.is_some() && !self.rules.wants(&path) {
                return false;
            }

            let covered_by = parent.as_deref().and_then(|p| self.table.anchor_of(p));
            let observation = match self.platform.attach(&path, covered_by.as_deref()) {
                Ok(observation) => observation,
                Err(e) => {
                    self.report_unreadable(&path, e).await;
                    return false;
                }
            };

            self.flush_pending_removal(&path);
            self.table.insert_dir(path.clone(), parent, observation);

            // Catches whatever appeared between the listing that found
            // `path` and the observation starting
            if !self.reconcile(&path).await {
                self.drop_subtree(&path);
                return false;
            }

            debug!("Watching {}", path.display());
            self.emitter.emit(Event::AddDir(path));
            true
        }
        .boxed()
    }

    fn add_file(&mut self, path: PathBuf, parent: &Path, modified: Option<std::time::SystemTime>) {
        self.flush_pending_removal(&path);
        if !self.table.insert_file(path.clone(), parent.to_path_buf()) {
            return;
        }
        if let Some(mtime) = modified {
            self.coalescer.observe_mtime(path.clone(), mtime);
        }
        // Not coalesced, an add cannot race with a removal of the same path
        self.emitter.emit(Event::Add(path));
    }

    fn remove_entry(&mut self, path: &Path, is_dir: bool) {
        if is_dir {
            self.drop_subtree(path);
            self.coalescer.push(path.to_path_buf(), EventKind::UnlinkDir);
        } else {
            self.table.remove(path);
            self.coalescer.forget(path);
            self.coalescer.push(path.to_path_buf(), EventKind::Unlink);
        }
    }

    /// Forget a directory and everything below it without reporting
    fn drop_subtree(&mut self, dir: &Path) {
        for (_, entry) in self.table.remove_subtree(dir) {
            if let Tracked::Directory(observation) = &entry.tracked {
                self.platform.release(observation);
            }
        }
        self.coalescer.forget(dir);
        self.coalescer.forget_under(dir);
    }

    /// Emit a removal still waiting in the coalescer before `path` reappears
    fn flush_pending_removal(&mut self, path: &Path) {
        match self.coalescer.take(path) {
            Some(kind @ (EventKind::Unlink | EventKind::UnlinkDir)) => {
                self.emitter.emit(Event::from_kind(kind, path.to_path_buf()));
            }
            Some(kind) => trace!("Dropping pending {} for {}", kind, path.display()),
            None => {}
        }
    }

    async fn listing_failed(&mut self, dir: &Path, error: io::Error) {
        if !still_exists(dir).await {
            // The parent's own reconcile reports the removal
            debug!("{} vanished before it could be listed", dir.display());
            return;
        }
        self.drop_subtree(dir);
        self.report_unreadable(
            dir,
            WatchError::List {
                path: dir.to_path_buf(),
                source: error,
            },
        )
        .await;
    }

    async fn report_unreadable(&mut self, path: &Path, error: WatchError) {
        if !still_exists(path).await {
            debug!("{} vanished before it could be observed", path.display());
            return;
        }
        warn!("Giving up on {}: {}", path.display(), error);
        self.table.abandon(path.to_path_buf());
        self.emitter.emit(Event::Error {
            path: path.to_path_buf(),
            error: Arc::new(error),
        });
    }

    /// Emit every coalesced event whose window has closed
    pub(crate) async fn flush_due(&mut self) {
        for (path, kind) in self.coalescer.take_due(Instant::now()) {
            if self.lifecycle.is_closed() {
                return;
            }
            match kind {
                EventKind::Change => self.settle_change(path).await,
                kind => {
                    self.emitter.emit(Event::from_kind(kind, path));
                }
            }
        }
    }

    /// Decide what a coalesced `change` really was
    async fn settle_change(&mut self, path: PathBuf) {
        if !self.table.is_file(&path) {
            self.suppress(&path);
            return;
        }

        match tokio::fs::symlink_metadata(&path).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Some backends report a deletion as a modification
                self.table.remove(&path);
                self.coalescer.forget(&path);
                self.emitter.emit(Event::Unlink(path));
            }
            Err(e) => {
                warn!("Failed to stat {}: {}", path.display(), e);
                self.emitter.emit(Event::Error {
                    path: path.clone(),
                    error: Arc::new(WatchError::Stat { path, source: e }),
                });
            }
            Ok(meta) if meta.is_dir() => {
                let parent = self.table.get(&path).and_then(|entry| entry.parent.clone());
                if let Some(parent) = parent {
                    self.reconcile(&parent).await;
                }
            }
            Ok(meta) => {
                let mtime = meta.modified().ok();
                let changed = match mtime {
                    Some(mtime) => {
                        !self.suppress_unchanged
                            || is_coarse(mtime)
                            || self.coalescer.mtime_advanced(&path, mtime)
                    }
                    None => true,
                };
                if let Some(mtime) = mtime {
                    self.coalescer.observe_mtime(path.clone(), mtime);
                }
                if changed {
                    self.emitter.emit(Event::Change(path));
                } else {
                    self.suppress(&path);
                }
            }
        }
    }

    fn suppress(&self, path: &Path) {
        trace!("Suppressed change for {}", path.display());
        if let Some(metrics) = &self.metrics {
            metrics.suppressed(path);
        }
    }
}

/// False only when the path is known to be gone
async fn still_exists(path: &Path) -> bool {
    !matches!(tokio::fs::try_exists(path).await, Ok(false))
}

/// Replace each root by its nearest existing ancestor, not climbing past
/// `bound`, then drop roots nested in another one
async fn climb_to_existing(roots: Vec<PathBuf>, bound: PathBuf) -> Vec<PathBuf> {
    let mut resolved = Vec::new();

    for base in roots {
        let limit = base.starts_with(&bound).then_some(bound.as_path());
        let mut dir = base.as_path();
        loop {
            if is_directory(dir).await {
                break;
            }
            match dir.parent() {
                Some(parent) if Some(dir) != limit => dir = parent,
                _ => {
                    dir = base.as_path();
                    break;
                }
            }
        }
        if dir != base {
            debug!("{} does not exist yet, watching from {}", base.display(), dir.display());
        }
        resolved.push(dir.to_path_buf());
    }

    resolved.sort();
    resolved.dedup();
    let mut nested_free: Vec<PathBuf> = Vec::new();
    for dir in resolved {
        if !nested_free.iter().any(|root| dir.starts_with(root)) {
            nested_free.push(dir);
        }
    }
    nested_free
}

async fn is_directory(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}
