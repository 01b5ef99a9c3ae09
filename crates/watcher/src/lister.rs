//! Directory listing with a retry for unstable results
//!
//! Right after a mutation some platforms hand back a listing that is
//! missing (or still holding) an entry. Listing twice and going for a third
//! round when the two disagree in size papers over that window.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// Kind of a listed entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One child of a listed directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listed {
    pub path: PathBuf,
    pub kind: EntryKind,
    /// Modification time for files, when available
    pub modified: Option<SystemTime>,
}

/// List the immediate children of `dir`, sorted by path
///
/// Symlinks are reported as files and never followed, which keeps
/// discovery from looping through a link to an ancestor.
pub async fn list_dir(dir: &Path) -> io::Result<Vec<Listed>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut listed = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let file_type = match entry.file_type().await {
            Ok(file_type) => file_type,
            // Removed between readdir and lstat
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };

        if file_type.is_dir() {
            listed.push(Listed {
                path: entry.path(),
                kind: EntryKind::Directory,
                modified: None,
            });
        } else {
            let modified = entry
                .metadata()
                .await
                .ok()
                .and_then(|meta| meta.modified().ok());
            listed.push(Listed {
                path: entry.path(),
                kind: EntryKind::File,
                modified,
            });
        }
    }

    listed.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(listed)
}

/// List `dir` twice, and once more if the first two disagree in size
pub async fn list_stable(dir: &Path) -> io::Result<Vec<Listed>> {
    let first = list_dir(dir).await?;
    let second = list_dir(dir).await?;
    if first.len() == second.len() {
        return Ok(second);
    }

    debug!(
        "Listing of {} changed between passes ({} then {} entries), listing again",
        dir.display(),
        first.len(),
        second.len()
    );
    list_dir(dir).await
}
