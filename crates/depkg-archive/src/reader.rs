// SPDX-License-Identifier: MPL-2.0

//! The thin archive-container boundary (§1: "archive container format
//! reading" is out of scope for this engine). [`ArchiveReader`] is the
//! only surface the pipeline needs; a concrete `.deb`/ar/tar decoder
//! lives outside this crate. [`MemoryArchive`] backs the test suite.

use std::io::Read;

/// One file, directory, or symlink entry yielded by an [`ArchiveReader`].
pub struct ArchiveEntry<'a> {
    pub path: String,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime: i64,
    pub kind: EntryKind,
    pub content: Box<dyn Read + 'a>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Regular,
    Directory,
    Symlink,
}

/// Source of archive entries for one package's unpack. Concrete
/// container decoding (reading an actual `.deb`) is a collaborator
/// outside this crate's scope; this trait is the seam.
pub trait ArchiveReader {
    type Error: std::error::Error + 'static;

    fn entries(&mut self) -> Result<Vec<ArchiveEntryOwned>, Self::Error>;
}

/// An owned snapshot of one entry's metadata plus its content bytes.
/// The pipeline operates on these rather than borrowed streams so
/// that staging can happen after validation without holding the
/// reader open.
#[derive(Debug, Clone)]
pub struct ArchiveEntryOwned {
    pub path: String,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime: i64,
    pub kind: EntryKind,
    pub content: Vec<u8>,
}

/// A fully in-memory [`ArchiveReader`], used by tests and by any
/// front-end that has already materialized an archive's entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryArchive {
    entries: Vec<ArchiveEntryOwned>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, entry: ArchiveEntryOwned) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn file(path: impl Into<String>, mode: u32, content: impl Into<Vec<u8>>) -> ArchiveEntryOwned {
        ArchiveEntryOwned {
            path: path.into(),
            mode,
            uid: 0,
            gid: 0,
            mtime: 0,
            kind: EntryKind::Regular,
            content: content.into(),
        }
    }

    pub fn directory(path: impl Into<String>, mode: u32) -> ArchiveEntryOwned {
        ArchiveEntryOwned {
            path: path.into(),
            mode,
            uid: 0,
            gid: 0,
            mtime: 0,
            kind: EntryKind::Directory,
            content: Vec::new(),
        }
    }
}

impl ArchiveReader for MemoryArchive {
    type Error = std::convert::Infallible;

    fn entries(&mut self) -> Result<Vec<ArchiveEntryOwned>, Self::Error> {
        Ok(self.entries.clone())
    }
}
