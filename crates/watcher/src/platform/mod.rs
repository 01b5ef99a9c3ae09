//! Native observation and the per-platform watch strategy
//!
//! The engine talks to the OS primitive through [`Observer`]. The
//! [`Platform`] wrapper decides, once per engine, whether every directory
//! gets its own handle or whether one recursive handle per root covers the
//! whole subtree.

pub mod native;

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::options::WatchStrategy;

pub use native::NotifyObserver;

/// Coarse kind of a raw native notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    /// Content or metadata of the path changed
    Write,
    /// The path appeared, disappeared or was renamed
    Rename,
    /// The backend could not tell
    Unknown,
}

/// Notification delivered by an [`Observer`] to the engine
#[derive(Debug)]
pub enum RawEvent {
    Changed { kind: RawKind, path: PathBuf },
    /// Events were lost; every tracked directory has to be re-listed
    Rescan,
    Failed {
        path: Option<PathBuf>,
        error: notify::Error,
    },
}

/// The native change-notification primitive
///
/// Implementations push [`RawEvent`]s into the channel they were built
/// with. `unobserve` and `shutdown` are best effort and never fail.
pub trait Observer: Send {
    /// Start observing `path`, optionally with its whole subtree
    fn observe(&mut self, path: &Path, recursive: bool) -> Result<()>;

    /// Stop observing `path`
    fn unobserve(&mut self, path: &Path);

    /// Stop everything; later calls are no-ops
    fn shutdown(&mut self);
}

/// Shared, lockable observer
pub type SharedObserver = Arc<Mutex<Box<dyn Observer>>>;

/// A live native observation bound to one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handle {
    path: PathBuf,
    recursive: bool,
}

impl Handle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }
}

/// How a tracked directory is observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Holds its own native handle
    Live(Handle),
    /// Covered by the recursive handle of `anchor`
    Delegated { anchor: PathBuf },
}

impl Observation {
    /// Directory whose recursive handle covers this one and its children
    pub fn anchor<'a>(&'a self, own_path: &'a Path) -> Option<&'a Path> {
        match self {
            Observation::Live(handle) if handle.recursive => Some(own_path),
            Observation::Live(_) => None,
            Observation::Delegated { anchor } => Some(anchor),
        }
    }
}

/// Strategy plus observer, owned by the engine
pub(crate) struct Platform {
    strategy: WatchStrategy,
    observer: SharedObserver,
}

impl Platform {
    pub(crate) fn new(strategy: WatchStrategy, observer: SharedObserver) -> Self {
        Self { strategy, observer }
    }

    pub(crate) fn strategy(&self) -> WatchStrategy {
        self.strategy
    }

    /// Observe `path`
    ///
    /// `covered_by` is the anchor of the parent directory, if a recursive
    /// handle already reaches `path`.
    pub(crate) fn attach(&self, path: &Path, covered_by: Option<&Path>) -> Result<Observation> {
        match (self.strategy, covered_by) {
            (WatchStrategy::Recursive, Some(anchor)) => Ok(Observation::Delegated {
                anchor: anchor.to_path_buf(),
            }),
            (WatchStrategy::Recursive, None) => {
                self.observer.lock().observe(path, true)?;
                debug!("Observing {} recursively", path.display());
                Ok(Observation::Live(Handle {
                    path: path.to_path_buf(),
                    recursive: true,
                }))
            }
            (WatchStrategy::PerDirectory, _) => {
                self.observer.lock().observe(path, false)?;
                Ok(Observation::Live(Handle {
                    path: path.to_path_buf(),
                    recursive: false,
                }))
            }
        }
    }

    /// Stop the native handle behind `observation`, if it has one
    pub(crate) fn release(&self, observation: &Observation) {
        if let Observation::Live(handle) = observation {
            self.observer.lock().unobserve(&handle.path);
        }
    }

    pub(crate) fn shutdown(&self) {
        self.observer.lock().shutdown();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory observer for engine tests

    use super::*;
    use crate::error::WatchError;
    use std::collections::HashSet;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Call {
        Observe(PathBuf, bool),
        Unobserve(PathBuf),
        Shutdown,
    }

    /// Records calls; observing a path listed in `refuse` fails
    #[derive(Debug, Default, Clone)]
    pub(crate) struct RecordingObserver {
        pub(crate) calls: Arc<Mutex<Vec<Call>>>,
        pub(crate) refuse: Arc<Mutex<HashSet<PathBuf>>>,
    }

    impl RecordingObserver {
        pub(crate) fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        /// Paths currently observed
        pub(crate) fn live(&self) -> HashSet<PathBuf> {
            let mut live = HashSet::new();
            for call in self.calls.lock().iter() {
                match call {
                    Call::Observe(path, _) => {
                        live.insert(path.clone());
                    }
                    Call::Unobserve(path) => {
                        live.remove(path);
                    }
                    Call::Shutdown => live.clear(),
                }
            }
            live
        }
    }

    impl Observer for RecordingObserver {
        fn observe(&mut self, path: &Path, recursive: bool) -> Result<()> {
            if self.refuse.lock().contains(path) {
                return Err(WatchError::Observe {
                    path: path.to_path_buf(),
                    source: notify::Error::generic("refused"),
                });
            }
            self.calls
                .lock()
                .push(Call::Observe(path.to_path_buf(), recursive));
            Ok(())
        }

        fn unobserve(&mut self, path: &Path) {
            self.calls.lock().push(Call::Unobserve(path.to_path_buf()));
        }

        fn shutdown(&mut self) {
            self.calls.lock().push(Call::Shutdown);
        }
    }

    pub(crate) fn platform(strategy: WatchStrategy) -> (Platform, RecordingObserver) {
        let observer = RecordingObserver::default();
        let shared: SharedObserver = Arc::new(Mutex::new(Box::new(observer.clone())));
        (Platform::new(strategy, shared), observer)
    }
}
