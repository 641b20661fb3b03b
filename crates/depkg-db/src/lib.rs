// SPDX-License-Identifier: MPL-2.0

//! The package database (§4.3): an in-memory [`PackageSet`] indexed by
//! `(name, architecture)`, loaded from and atomically persisted to the
//! admin directory's `status`/`available` flat files, with a numbered
//! `updates/` journal standing in for the in-flight mutations of a
//! session that hasn't merged yet.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use depkg_depend::{Candidate, EvalScope, PackageView};
use fs_err as ffs;
use log::{debug, info, warn};
use thiserror::Error;

pub mod journal;
pub mod package;
pub mod stanza;

pub use package::{Conffile, EFlag, MultiArch, Package, PackageBinary, Status, Triggers, Want};

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error on {0:?}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("control stanza error: {0}")]
    Control(#[from] depkg_control::Error),
    #[error("package record error: {0}")]
    Stanza(#[from] stanza::Error),
    #[error("journal error: {0}")]
    Journal(#[from] journal::Error),
    #[error("internal invariant violation: {0}")]
    Invariant(#[from] package::InvariantViolation),
}

fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Error {
    let path = path.into();
    move |e| Error::Io(path, e)
}

/// Keyed by canonical lowercase name; owns every architecture variant
/// of that name.
#[derive(Debug, Default)]
pub struct PackageSet {
    packages: HashMap<(String, String), Package>,
}

impl PackageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `status` and `available`, then replay any journal left
    /// over from an interrupted prior session (§4.3: "must merge on
    /// startup"). Call [`Self::merge`] afterward once the admin
    /// directory is writable to actually fold the replay into
    /// `status` on disk.
    pub fn load(admin_dir: &Path) -> Result<Self, Error> {
        let mut set = Self::new();

        let status_path = admin_dir.join("status");
        if status_path.exists() {
            let text = ffs::read_to_string(&status_path).map_err(io(&status_path))?;
            for s in depkg_control::parse_all(std::io::Cursor::new(text.as_bytes()))? {
                let pkg = stanza::package_from_status_stanza(&s)?;
                pkg.check_invariants()?;
                set.packages.insert(pkg.key(), pkg);
            }
        }

        let available_path = admin_dir.join("available");
        if available_path.exists() {
            let text = ffs::read_to_string(&available_path).map_err(io(&available_path))?;
            for s in depkg_control::parse_all(std::io::Cursor::new(text.as_bytes()))? {
                let parsed = stanza::package_from_available_stanza(&s)?;
                let entry = set
                    .packages
                    .entry(parsed.key())
                    .or_insert_with(|| Package::new(&parsed.name, &parsed.architecture));
                entry.available = parsed.available;
                if entry.multi_arch == MultiArch::No {
                    entry.multi_arch = parsed.multi_arch;
                }
            }
        }

        let pending = journal::list(&admin_dir.join("updates"))?;
        if !pending.is_empty() {
            warn!(
                "replaying {} journal entr{} from an interrupted session",
                pending.len(),
                if pending.len() == 1 { "y" } else { "ies" }
            );
            for entry in pending {
                let s = depkg_control::parse_all(std::io::Cursor::new(entry.text.as_bytes()))?
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::Journal(journal::Error::NonNumericEntry(admin_dir.join("updates"))))?;
                let pkg = stanza::package_from_status_stanza(&s)?;
                set.packages.insert(pkg.key(), pkg);
            }
        }

        Ok(set)
    }

    pub fn get(&self, name: &str, arch: &str) -> Option<&Package> {
        self.packages.get(&(name.to_string(), arch.to_string()))
    }

    pub fn get_mut(&mut self, name: &str, arch: &str) -> Option<&mut Package> {
        self.packages.get_mut(&(name.to_string(), arch.to_string()))
    }

    /// Every architecture variant sharing `name`.
    pub fn by_name<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Package> {
        self.packages.values().filter(move |p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Insert or replace a whole Package record (used when accepting
    /// a freshly-unpacked `available` slot into `installed`, §4.7
    /// step 9).
    pub fn upsert(&mut self, pkg: Package) {
        self.packages.insert(pkg.key(), pkg);
    }

    /// Record one package's current installed-slot state as a new
    /// journal entry. Must be called for every mutation that needs to
    /// survive a crash before the next [`Self::merge`] (§4.3, §6).
    pub fn record_update(&self, admin_dir: &Path, name: &str, arch: &str) -> Result<(), Error> {
        let pkg = self
            .get(name, arch)
            .expect("record_update called for a package not in the set");
        let stanza = stanza::package_to_status_stanza(pkg);
        journal::append(&admin_dir.join("updates"), &stanza.to_text())?;
        Ok(())
    }

    /// Fold every journal entry into `status`: write a temp file,
    /// fsync, rename over `status`, then truncate `updates/`. Must run
    /// on clean shutdown and is safe to run redundantly on startup
    /// (it's exactly how startup recovers from an interrupted prior
    /// session, since [`Self::load`] already replayed the same
    /// entries into memory).
    pub fn merge(&self, admin_dir: &Path) -> Result<(), Error> {
        let status_path = admin_dir.join("status");
        let tmp_path = admin_dir.join("status.tmp");

        let mut names: Vec<_> = self
            .packages
            .values()
            .filter(|p| !(p.status.implies_no_owned_files() && p.status == Status::NotInstalled))
            .collect();
        names.sort_by(|a, b| (a.name.as_str(), a.architecture.as_str()).cmp(&(b.name.as_str(), b.architecture.as_str())));

        let text: String = names.iter().map(|p| stanza::package_to_status_stanza(p).to_text()).collect();

        ffs::write(&tmp_path, &text).map_err(io(&tmp_path))?;
        let file = fs::File::open(&tmp_path).map_err(io(&tmp_path))?;
        file.sync_all().map_err(io(&tmp_path))?;
        ffs::rename(&tmp_path, &status_path).map_err(io(&status_path))?;

        journal::clear(&admin_dir.join("updates"))?;
        debug!("merged {} package record(s) into {status_path:?}", names.len());
        Ok(())
    }

    /// Rewrite `available` in full (no journal: it is wholesale
    /// replaced whenever the archive index changes, unlike `status`
    /// which accrues incrementally).
    pub fn persist_available(&self, admin_dir: &Path) -> Result<(), Error> {
        let available_path = admin_dir.join("available");
        let tmp_path = admin_dir.join("available.tmp");

        let mut pkgs: Vec<_> = self.packages.values().filter(|p| p.available.is_present()).collect();
        pkgs.sort_by(|a, b| (a.name.as_str(), a.architecture.as_str()).cmp(&(b.name.as_str(), b.architecture.as_str())));

        let text: String = pkgs.iter().map(|p| stanza::package_to_available_stanza(p).to_text()).collect();

        ffs::write(&tmp_path, &text).map_err(io(&tmp_path))?;
        let file = fs::File::open(&tmp_path).map_err(io(&tmp_path))?;
        file.sync_all().map_err(io(&tmp_path))?;
        ffs::rename(&tmp_path, &available_path).map_err(io(&available_path))?;
        info!("wrote {} available record(s) to {available_path:?}", pkgs.len());
        Ok(())
    }
}

impl PackageView for PackageSet {
    fn candidates(&self, name: &str, scope: EvalScope) -> Vec<Candidate> {
        let mut out = Vec::new();
        for pkg in self.packages.values() {
            let binary = match scope {
                EvalScope::Installed => {
                    if pkg.status != Status::Installed {
                        continue;
                    }
                    &pkg.installed
                }
                EvalScope::Available => &pkg.available,
                EvalScope::Present => {
                    if !pkg.status.implies_complete_metadata() {
                        continue;
                    }
                    &pkg.installed
                }
                EvalScope::ByIsToBe => {
                    if !matches!(
                        pkg.status,
                        Status::Installed | Status::Unpacked | Status::HalfConfigured | Status::TriggersPending | Status::TriggersAwaited
                    ) && pkg.want != Want::Install
                    {
                        continue;
                    }
                    if pkg.installed.is_present() {
                        &pkg.installed
                    } else {
                        &pkg.available
                    }
                }
            };

            if pkg.name == name {
                if let Some(version) = &binary.version {
                    out.push(Candidate {
                        name: pkg.name.clone(),
                        arch: pkg.architecture.clone(),
                        version: Some(version.clone()),
                        via_provides: false,
                    });
                }
            }

            if binary.provides.atoms().any(|atom| atom.name == name) {
                out.push(Candidate {
                    name: name.to_string(),
                    arch: pkg.architecture.clone(),
                    version: None,
                    via_provides: true,
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn installed_package(name: &str, version: &str) -> Package {
        let mut pkg = Package::new(name, "amd64");
        pkg.want = Want::Install;
        pkg.status = Status::Installed;
        pkg.installed.version = Some(depkg_version::parse(version).unwrap());
        pkg
    }

    #[test]
    fn merge_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let mut set = PackageSet::new();
        set.upsert(installed_package("foo", "1.0"));
        set.merge(dir.path()).unwrap();

        let reloaded = PackageSet::load(dir.path()).unwrap();
        let pkg = reloaded.get("foo", "amd64").unwrap();
        assert_eq!(pkg.status, Status::Installed);
        assert_eq!(pkg.installed.version, Some(depkg_version::parse("1.0").unwrap()));
    }

    #[test]
    fn journal_replay_on_load_recovers_interrupted_session() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path()).unwrap();

        let mut set = PackageSet::new();
        set.upsert(installed_package("foo", "1.0"));
        set.merge(dir.path()).unwrap();

        set.upsert(installed_package("foo", "2.0"));
        set.record_update(dir.path(), "foo", "amd64").unwrap();
        // Simulate a crash: no merge() call here, updates/ is left behind.

        let reloaded = PackageSet::load(dir.path()).unwrap();
        let pkg = reloaded.get("foo", "amd64").unwrap();
        assert_eq!(pkg.installed.version, Some(depkg_version::parse("2.0").unwrap()));

        reloaded.merge(dir.path()).unwrap();
        assert!(journal::list(&dir.path().join("updates")).unwrap().is_empty());
    }

    #[test]
    fn package_view_reports_installed_candidates() {
        let mut set = PackageSet::new();
        set.upsert(installed_package("foo", "1.0"));
        let candidates = set.candidates("foo", EvalScope::Installed);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].version, Some(depkg_version::parse("1.0").unwrap()));
    }

    #[test]
    fn package_view_resolves_provided_virtual_names() {
        let mut pkg = installed_package("foo", "1.0");
        pkg.installed.provides = depkg_depend::DependencyExpression::parse("bar").unwrap();
        let mut set = PackageSet::new();
        set.upsert(pkg);

        let candidates = set.candidates("bar", EvalScope::Installed);
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].via_provides);
    }

    #[test]
    fn not_installed_package_is_omitted_from_status_file() {
        let dir = tempdir().unwrap();
        let mut set = PackageSet::new();
        set.upsert(Package::new("untouched", "amd64"));
        set.merge(dir.path()).unwrap();

        let text = fs::read_to_string(dir.path().join("status")).unwrap();
        assert!(text.is_empty());
    }
}
