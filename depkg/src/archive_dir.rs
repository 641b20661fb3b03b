// SPDX-License-Identifier: MPL-2.0

//! A directory-tree [`ArchiveReader`]: the front-end's stand-in for the
//! out-of-scope `.deb`/ar/tar container decoder (§1). `depkg unpack`
//! expects its caller to have already extracted a package's data
//! payload onto disk (e.g. by an external `dpkg-deb`-equivalent) under
//! one directory, preserving the target tree's relative layout; this
//! reader walks that tree into the [`ArchiveEntryOwned`] shape the
//! pipeline consumes.

use std::fs;
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use depkg_archive::{ArchiveEntryOwned, ArchiveReader, EntryKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("walking {0:?}: {1}")]
    Io(PathBuf, #[source] io::Error),
}

pub struct DirectoryArchive {
    root: PathBuf,
}

impl DirectoryArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn walk(&self, dir: &Path, out: &mut Vec<ArchiveEntryOwned>) -> Result<(), Error> {
        let mut children: Vec<_> = fs::read_dir(dir).map_err(|e| Error::Io(dir.to_path_buf(), e))?.collect::<Result<_, _>>().map_err(|e| Error::Io(dir.to_path_buf(), e))?;
        children.sort_by_key(|e| e.file_name());

        for child in children {
            let path = child.path();
            let metadata = child.metadata().map_err(|e| Error::Io(path.clone(), e))?;
            let relative = path.strip_prefix(&self.root).unwrap_or(&path).to_string_lossy().replace('\\', "/");
            let archive_path = format!("/{relative}");

            if metadata.is_dir() {
                out.push(ArchiveEntryOwned {
                    path: archive_path,
                    mode: metadata.permissions().mode(),
                    uid: metadata.uid(),
                    gid: metadata.gid(),
                    mtime: metadata.mtime(),
                    kind: EntryKind::Directory,
                    content: Vec::new(),
                });
                self.walk(&path, out)?;
            } else if metadata.file_type().is_symlink() {
                let target = fs::read_link(&path).map_err(|e| Error::Io(path.clone(), e))?;
                out.push(ArchiveEntryOwned {
                    path: archive_path,
                    mode: metadata.permissions().mode(),
                    uid: metadata.uid(),
                    gid: metadata.gid(),
                    mtime: metadata.mtime(),
                    kind: EntryKind::Symlink,
                    content: target.to_string_lossy().into_owned().into_bytes(),
                });
            } else {
                let content = fs::read(&path).map_err(|e| Error::Io(path.clone(), e))?;
                out.push(ArchiveEntryOwned {
                    path: archive_path,
                    mode: metadata.permissions().mode(),
                    uid: metadata.uid(),
                    gid: metadata.gid(),
                    mtime: metadata.mtime(),
                    kind: EntryKind::Regular,
                    content,
                });
            }
        }

        Ok(())
    }
}

impl ArchiveReader for DirectoryArchive {
    type Error = Error;

    fn entries(&mut self) -> Result<Vec<ArchiveEntryOwned>, Self::Error> {
        let mut out = Vec::new();
        if self.root.exists() {
            self.walk(&self.root.clone(), &mut out)?;
        }
        Ok(out)
    }
}
