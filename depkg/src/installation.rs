// SPDX-License-Identifier: MPL-2.0

//! The admin-directory context: its root paths, mutability check, and
//! the exclusive advisory lock guarding the whole session (§5: "An
//! exclusive advisory lock on a sentinel file guards the entire
//! database and filesystem-node table for the session").

use std::fmt;
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs_err::{self as fs, File};
use nix::fcntl::{flock, FlockArg};
use nix::unistd::{access, AccessFlags, Uid};
use thiserror::Error;

/// Whether this session may write to the admin directory and root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    ReadOnly,
    ReadWrite,
}

impl fmt::Display for Mutability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutability::ReadOnly => "read-only".fmt(f),
            Mutability::ReadWrite => "read-write".fmt(f),
        }
    }
}

/// An acquired lock on `<admin_dir>/lock`, released when the last
/// clone is dropped.
#[derive(Debug, Clone)]
#[allow(unused)]
pub struct Lock(Arc<File>);

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error on admin directory: {0}")]
    Io(#[from] io::Error),
    #[error("acquiring exclusive admin-directory lock: {0}")]
    Flock(#[from] nix::Error),
}

/// Acquire the session-wide exclusive lock at `<admin_dir>/lock`. If
/// already held, this blocks until the holder releases it (there is no
/// background daemon to hand off to, unlike dpkg's separate
/// `lock-frontend`).
pub fn acquire_lock(admin_dir: &Path) -> Result<Lock, Error> {
    fs::create_dir_all(admin_dir)?;
    let path = admin_dir.join("lock");
    let file = fs::OpenOptions::new().create(true).write(true).truncate(false).open(path)?;

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(()) => {}
        Err(nix::errno::Errno::EWOULDBLOCK) => {
            log::info!("admin directory locked by another session, waiting…");
            flock(file.as_raw_fd(), FlockArg::LockExclusive)?;
        }
        Err(e) => return Err(e.into()),
    }

    Ok(Lock(Arc::new(file)))
}

/// The resolved `DPKG_ADMINDIR` / `DPKG_ROOT` pair plus the lock held
/// for the session's lifetime (§6: admin directory layout).
pub struct Installation {
    pub admin_dir: PathBuf,
    pub root: PathBuf,
    pub mutability: Mutability,
    pub lock: Lock,
}

impl Installation {
    /// Open the installation rooted at `root`, deriving `admin_dir`
    /// from the `DPKG_ADMINDIR` environment variable or the
    /// conventional `<root>/var/lib/dpkg` default, and acquire the
    /// session lock.
    pub fn open(root: impl Into<PathBuf>, admin_dir: Option<PathBuf>) -> Result<Self, Error> {
        let root: PathBuf = root.into();
        let admin_dir = admin_dir
            .or_else(|| std::env::var_os("DPKG_ADMINDIR").map(PathBuf::from))
            .unwrap_or_else(|| root.join("var/lib/dpkg"));

        let mutability = if Uid::effective().is_root() {
            Mutability::ReadWrite
        } else if access(&admin_dir, AccessFlags::W_OK).is_ok() {
            Mutability::ReadWrite
        } else {
            Mutability::ReadOnly
        };

        log::trace!("admin dir: {admin_dir:?}, root: {root:?}, mutability: {mutability}");

        fs::create_dir_all(admin_dir.join("updates"))?;
        fs::create_dir_all(admin_dir.join("info"))?;
        fs::create_dir_all(admin_dir.join("triggers"))?;

        let lock = acquire_lock(&admin_dir)?;

        Ok(Self {
            admin_dir,
            root,
            mutability,
            lock,
        })
    }

    pub fn read_only(&self) -> bool {
        matches!(self.mutability, Mutability::ReadOnly)
    }
}
