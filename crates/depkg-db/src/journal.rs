// SPDX-License-Identifier: MPL-2.0

//! The `updates/` crash-recovery journal (§4.3, §6): each in-flight
//! mutation to a single package's status record is written as its own
//! numbered file before the in-memory state is considered committed.
//! A `merge` replays every numbered file into `status` and empties the
//! directory; this must happen on clean shutdown and is re-run (with
//! the same replay code) on startup to recover from an interrupted
//! prior session.

use std::fs;
use std::path::{Path, PathBuf};

use fs_err as ffs;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error on {0:?}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("journal entry {0:?} has a non-numeric name")]
    NonNumericEntry(PathBuf),
}

fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Error {
    let path = path.into();
    move |e| Error::Io(path, e)
}

/// One pending mutation: the raw stanza text that will eventually
/// replace (or insert) a package's record in `status`.
pub struct Entry {
    pub sequence: u32,
    pub text: String,
}

/// List journal entries in numeric replay order. Entries whose
/// filename isn't purely numeric are rejected rather than silently
/// skipped — the directory is expected to contain nothing else.
pub fn list(dir: &Path) -> Result<Vec<Entry>, Error> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut entries = Vec::new();
    for item in ffs::read_dir(dir).map_err(io(dir))? {
        let item = item.map_err(io(dir))?;
        let path = item.path();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::NonNumericEntry(path.clone()))?;
        let sequence: u32 = name.parse().map_err(|_| Error::NonNumericEntry(path.clone()))?;
        let text = ffs::read_to_string(&path).map_err(io(&path))?;
        entries.push(Entry { sequence, text });
    }
    entries.sort_by_key(|e| e.sequence);
    Ok(entries)
}

/// Append one new journal entry. The sequence number is one past the
/// highest currently present (or 1 if the directory is empty),
/// zero-padded to four digits as §6 specifies.
pub fn append(dir: &Path, text: &str) -> Result<u32, Error> {
    ffs::create_dir_all(dir).map_err(io(dir))?;
    let next = list(dir)?.last().map(|e| e.sequence + 1).unwrap_or(1);
    let path = dir.join(format!("{next:04}"));
    let tmp = dir.join(format!("{next:04}.tmp"));
    ffs::write(&tmp, text).map_err(io(&tmp))?;
    let file = fs::File::open(&tmp).map_err(io(&tmp))?;
    file.sync_all().map_err(io(&tmp))?;
    ffs::rename(&tmp, &path).map_err(io(&path))?;
    Ok(next)
}

/// Remove every entry from the journal directory. Called only after
/// every entry has been successfully folded into `status`.
pub fn clear(dir: &Path) -> Result<(), Error> {
    if !dir.exists() {
        return Ok(());
    }
    for item in ffs::read_dir(dir).map_err(io(dir))? {
        let item = item.map_err(io(dir))?;
        ffs::remove_file(item.path()).map_err(io(item.path()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_assigns_increasing_sequence_numbers() {
        let dir = tempdir().unwrap();
        let updates = dir.path().join("updates");
        let a = append(&updates, "first").unwrap();
        let b = append(&updates, "second").unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);

        let entries = list(&updates).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].text, "first");
        assert_eq!(entries[1].text, "second");
    }

    #[test]
    fn clear_empties_directory() {
        let dir = tempdir().unwrap();
        let updates = dir.path().join("updates");
        append(&updates, "x").unwrap();
        clear(&updates).unwrap();
        assert!(list(&updates).unwrap().is_empty());
    }

    #[test]
    fn list_on_missing_directory_is_empty() {
        let dir = tempdir().unwrap();
        let updates = dir.path().join("updates");
        assert!(list(&updates).unwrap().is_empty());
    }
}
