//! The watch table
//!
//! Authoritative record of every tracked file and directory, keyed by
//! absolute path. Each entry remembers the directory it was discovered in
//! so a reconcile can diff exactly the children of one directory.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::platform::Observation;

/// What is tracked at a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Tracked {
    File,
    Directory(Observation),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Entry {
    /// `None` for discovery roots
    pub(crate) parent: Option<PathBuf>,
    pub(crate) tracked: Tracked,
}

#[derive(Debug, Default)]
pub(crate) struct WatchTable {
    entries: HashMap<PathBuf, Entry>,
    children: HashMap<PathBuf, BTreeSet<PathBuf>>,
    /// Directories given up on after an access error
    abandoned: HashSet<PathBuf>,
}

impl WatchTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub(crate) fn is_file(&self, path: &Path) -> bool {
        matches!(
            self.entries.get(path),
            Some(Entry {
                tracked: Tracked::File,
                ..
            })
        )
    }

    pub(crate) fn is_dir(&self, path: &Path) -> bool {
        matches!(
            self.entries.get(path),
            Some(Entry {
                tracked: Tracked::Directory(_),
                ..
            })
        )
    }

    pub(crate) fn get(&self, path: &Path) -> Option<&Entry> {
        self.entries.get(path)
    }

    /// Track a file found in `parent`. Returns false if the path was already tracked.
    pub(crate) fn insert_file(&mut self, path: PathBuf, parent: PathBuf) -> bool {
        self.insert(
            path,
            Entry {
                parent: Some(parent),
                tracked: Tracked::File,
            },
        )
    }

    /// Track a directory. Returns false if the path was already tracked.
    pub(crate) fn insert_dir(
        &mut self,
        path: PathBuf,
        parent: Option<PathBuf>,
        observation: Observation,
    ) -> bool {
        self.insert(
            path,
            Entry {
                parent,
                tracked: Tracked::Directory(observation),
            },
        )
    }

    fn insert(&mut self, path: PathBuf, entry: Entry) -> bool {
        if self.entries.contains_key(&path) {
            return false;
        }
        if let Some(parent) = &entry.parent {
            self.children
                .entry(parent.clone())
                .or_default()
                .insert(path.clone());
        }
        self.entries.insert(path, entry);
        true
    }

    /// Drop one entry, leaving anything below it in place
    pub(crate) fn remove(&mut self, path: &Path) -> Option<Entry> {
        let entry = self.entries.remove(path)?;
        if let Some(parent) = &entry.parent {
            if let Some(siblings) = self.children.get_mut(parent) {
                siblings.remove(path);
                if siblings.is_empty() {
                    self.children.remove(parent);
                }
            }
        }
        Some(entry)
    }

    /// Drop `path` and everything tracked beneath it
    ///
    /// Returns the removed entries, `path` itself first.
    pub(crate) fn remove_subtree(&mut self, path: &Path) -> Vec<(PathBuf, Entry)> {
        let mut removed = Vec::new();
        let Some(entry) = self.remove(path) else {
            return removed;
        };
        removed.push((path.to_path_buf(), entry));

        let mut stack = vec![path.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let Some(kids) = self.children.remove(&dir) else {
                continue;
            };
            for kid in kids {
                if let Some(entry) = self.entries.remove(&kid) {
                    if matches!(entry.tracked, Tracked::Directory(_)) {
                        stack.push(kid.clone());
                    }
                    removed.push((kid, entry));
                }
            }
        }
        removed
    }

    /// Tracked children of `dir` with a flag telling directories apart
    pub(crate) fn children_of(&self, dir: &Path) -> Vec<(PathBuf, bool)> {
        self.children
            .get(dir)
            .map(|kids| {
                kids.iter()
                    .map(|kid| (kid.clone(), self.is_dir(kid)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Anchor of the recursive handle covering `dir`, if any
    pub(crate) fn anchor_of(&self, dir: &Path) -> Option<PathBuf> {
        match self.entries.get(dir) {
            Some(Entry {
                tracked: Tracked::Directory(observation),
                ..
            }) => observation.anchor(dir).map(Path::to_path_buf),
            _ => None,
        }
    }

    /// Nearest tracked directory that is `path` or one of its ancestors
    pub(crate) fn nearest_dir(&self, path: &Path) -> Option<PathBuf> {
        path.ancestors()
            .find(|candidate| self.is_dir(candidate))
            .map(Path::to_path_buf)
    }

    /// Every tracked directory, parents before children
    pub(crate) fn directories(&self) -> BTreeSet<PathBuf> {
        self.entries
            .iter()
            .filter(|(_, entry)| matches!(entry.tracked, Tracked::Directory(_)))
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub(crate) fn abandon(&mut self, dir: PathBuf) {
        self.abandoned.insert(dir);
    }

    pub(crate) fn is_abandoned(&self, path: &Path) -> bool {
        self.abandoned.contains(path)
    }

    /// Forget abandoned children of `dir` that are not in `present`
    ///
    /// A directory that went away and comes back gets another chance.
    pub(crate) fn forget_abandoned(&mut self, dir: &Path, present: &HashSet<PathBuf>) {
        self.abandoned
            .retain(|path| path.parent() != Some(dir) || present.contains(path));
    }

    /// Number of tracked (files, directories)
    pub(crate) fn counts(&self) -> (usize, usize) {
        self.entries
            .values()
            .fold((0, 0), |(files, dirs), entry| match entry.tracked {
                Tracked::File => (files + 1, dirs),
                Tracked::Directory(_) => (files, dirs + 1),
            })
    }

    /// Empty the table, handing back every observation
    pub(crate) fn drain(&mut self) -> Vec<Observation> {
        self.children.clear();
        self.abandoned.clear();
        self.entries
            .drain()
            .filter_map(|(_, entry)| match entry.tracked {
                Tracked::Directory(observation) => Some(observation),
                Tracked::File => None,
            })
            .collect()
    }
}
