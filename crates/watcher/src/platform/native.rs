//! `notify` backed observer

use notify::event::{AccessKind, AccessMode, MetadataKind, ModifyKind};
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{Observer, RawEvent, RawKind};
use crate::error::{Result, WatchError};

/// Observer built on the platform's recommended `notify` backend
pub struct NotifyObserver {
    watcher: Option<RecommendedWatcher>,
}

impl NotifyObserver {
    /// Create the native watcher; raw events go to `tx`
    pub fn new(tx: mpsc::UnboundedSender<RawEvent>) -> Result<Self> {
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| {
                for raw in translate(res) {
                    // Engine gone, nothing left to notify
                    if tx.send(raw).is_err() {
                        return;
                    }
                }
            },
            Config::default(),
        )?;

        Ok(Self {
            watcher: Some(watcher),
        })
    }
}

impl Observer for NotifyObserver {
    fn observe(&mut self, path: &Path, recursive: bool) -> Result<()> {
        let Some(watcher) = self.watcher.as_mut() else {
            return Ok(());
        };
        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(path, mode)
            .map_err(|source| WatchError::Observe {
                path: path.to_path_buf(),
                source,
            })
    }

    fn unobserve(&mut self, path: &Path) {
        if let Some(watcher) = self.watcher.as_mut() {
            // Fails when the OS already dropped the watch along with the directory
            if let Err(e) = watcher.unwatch(path) {
                debug!("Failed to unwatch {}: {}", path.display(), e);
            }
        }
    }

    fn shutdown(&mut self) {
        // Dropping the backend stops its thread and every watch
        self.watcher = None;
    }
}

fn translate(res: notify::Result<notify::Event>) -> Vec<RawEvent> {
    match res {
        Ok(event) => {
            if event.need_rescan() {
                return vec![RawEvent::Rescan];
            }
            let Some(kind) = classify(&event.kind) else {
                trace!("Ignoring access notification {:?}", event.kind);
                return Vec::new();
            };
            event
                .paths
                .into_iter()
                .map(|path| RawEvent::Changed { kind, path })
                .collect()
        }
        Err(error) => vec![RawEvent::Failed {
            path: error.paths.first().cloned(),
            error,
        }],
    }
}

/// Map a `notify` event kind onto the engine's coarse kinds
///
/// Plain reads are dropped. Closing a file opened for writing counts as a
/// write since some backends report nothing else.
pub(crate) fn classify(kind: &EventKind) -> Option<RawKind> {
    match kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => Some(RawKind::Write),
        EventKind::Access(_) => None,
        EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime)) => None,
        EventKind::Modify(ModifyKind::Name(_)) => Some(RawKind::Rename),
        EventKind::Modify(_) => Some(RawKind::Write),
        EventKind::Create(_) | EventKind::Remove(_) => Some(RawKind::Rename),
        EventKind::Any | EventKind::Other => Some(RawKind::Unknown),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, Flag, RemoveKind, RenameMode};
    use std::path::PathBuf;

    #[test]
    fn test_classify() {
        let write = EventKind::Modify(ModifyKind::Data(DataChange::Content));
        let rename = EventKind::Modify(ModifyKind::Name(RenameMode::Both));
        let read = EventKind::Access(AccessKind::Read);
        let atime = EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime));

        assert_eq!(classify(&write), Some(RawKind::Write));
        assert_eq!(classify(&rename), Some(RawKind::Rename));
        assert_eq!(classify(&EventKind::Create(CreateKind::File)), Some(RawKind::Rename));
        assert_eq!(classify(&EventKind::Remove(RemoveKind::Folder)), Some(RawKind::Rename));
        assert_eq!(
            classify(&EventKind::Access(AccessKind::Close(AccessMode::Write))),
            Some(RawKind::Write)
        );
        assert_eq!(classify(&EventKind::Other), Some(RawKind::Unknown));
        assert_eq!(classify(&read), None);
        assert_eq!(classify(&atime), None);
    }

    #[test]
    fn test_translate_splits_paths() {
        let event = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/w/old"))
            .add_path(PathBuf::from("/w/new"));

        let raw = translate(Ok(event));
        assert_eq!(raw.len(), 2);
        assert!(matches!(
            &raw[1],
            RawEvent::Changed { kind: RawKind::Rename, path } if path == Path::new("/w/new")
        ));
    }

    #[test]
    fn test_translate_rescan_and_errors() {
        let rescan = notify::Event::new(EventKind::Other).set_flag(Flag::Rescan);
        assert!(matches!(translate(Ok(rescan)).as_slice(), [RawEvent::Rescan]));

        let err = notify::Error::generic("boom").add_path(PathBuf::from("/w/x"));
        match translate(Err(err)).as_slice() {
            [RawEvent::Failed { path, .. }] => assert_eq!(path.as_deref(), Some(Path::new("/w/x"))),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
