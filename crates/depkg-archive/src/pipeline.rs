// SPDX-License-Identifier: MPL-2.0

//! The archive-processing pipeline (§4.7): one state-machine `Step`
//! per stage, driven in order by [`unpack_and_commit`]. Every
//! irreversible on-disk mutation happens in [`Step::Stage`] and
//! [`Step::Commit`]; everything before `Stage` only touches the
//! in-memory node table and the scratch directory.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use depkg_db::{Package, PackageSet, Status};
use depkg_depend::{EvalScope, PackageView};
use depkg_vfs::{FindFlags, NodeFlags, Table};
use log::{debug, warn};
use thiserror::Error;

use crate::conffile::{self, Action as ConfAction, ConfPolicy};
use crate::force::{Disposition, FailureKind, ForcePolicy};
use crate::reader::{ArchiveEntryOwned, EntryKind};
use crate::script::{self, ScriptAction, ScriptContext, ScriptKind};

/// Ordered stages of one package's unpack + commit, matching §4.7
/// one-to-one. Kept as an explicit enum so the engine can report
/// exactly which step a failure aborted at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    ExtractControl,
    Validate,
    Enumerate,
    ConflictDetection,
    Stage,
    PreRemoveOld,
    PreInstNew,
    Commit,
    UpdateRecord,
    Persist,
    PostRemoveOldPostInstNew,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("step {0:?} failed: incompatible architecture {1:?}")]
    ArchitectureMismatch(Step, String),
    #[error("step {0:?} failed: unsatisfied pre-depends: {1}")]
    PreDependsUnsatisfied(Step, String),
    #[error("step {0:?} failed: {1:?} is already owned by {2:?} with no Replaces relationship")]
    OwnershipConflict(Step, String, String),
    #[error("step {0:?} failed: {1}")]
    ConflictsViolated(Step, String),
    #[error("step {0:?} failed: {1}")]
    BreaksViolated(Step, String),
    #[error("step {0:?} failed: archive entry {1:?} escapes the installation root")]
    BadPath(Step, String),
    #[error("step {0:?} io error on {1:?}: {2}")]
    Io(Step, PathBuf, #[source] std::io::Error),
    #[error("step {0:?} maintainer script failed: {1}")]
    Script(Step, #[source] script::Error),
    #[error("step {0:?} database error: {1}")]
    Db(Step, #[source] depkg_db::Error),
}

/// Everything the pipeline needs across one package's run: the
/// session-scoped filesystem node table and package database, plus
/// the admin directory / target root paths.
pub struct EngineContext<'a> {
    pub nodes: &'a mut Table,
    pub packages: &'a mut PackageSet,
    pub admin_dir: PathBuf,
    pub root: PathBuf,
    pub conf_policy: ConfPolicy,
    pub force: ForcePolicy,
}

/// One incoming package's unpack request.
pub struct UnpackRequest {
    pub package: Package,
    pub entries: Vec<ArchiveEntryOwned>,
    pub configure: bool,
}

fn target_path(root: &Path, archive_path: &str) -> PathBuf {
    root.join(archive_path.trim_start_matches('/'))
}

/// Run the full 11-step pipeline for one archive. On any failure
/// before [`Step::Stage`] completes, no on-disk mutation has occurred.
/// Failures at or after `Stage` leave `.dpkg-new` siblings which a
/// subsequent session can clean up (crash-recovery is driven by the
/// journal replay in `depkg-db`, not by this function retrying
/// itself).
pub fn unpack_and_commit(ctx: &mut EngineContext<'_>, request: UnpackRequest) -> Result<(), Error> {
    let UnpackRequest {
        mut package,
        entries,
        configure,
    } = request;

    // Step 1: extract control metadata. In this engine the caller has
    // already parsed the control stanza into `package.available`
    // before constructing the request (the scratch-directory
    // extraction itself is the archive-container reader's job, out of
    // this crate's scope per §1).
    debug!("{:?}: control metadata present for {}", Step::ExtractControl, package.name);

    // Step 2: validate.
    validate(ctx, &package)?;

    // Step 3: enumerate.
    let resolved = enumerate(ctx, &package, &entries)?;

    // Step 4: conflict detection.
    let mut drop_ownership_from = Vec::new();
    conflict_detection(ctx, &package, &resolved, &mut drop_ownership_from)?;

    // Conffiles never go through the unconditional stage/commit path
    // (§4.8): split them out before step 5 so the three-way decision
    // applies instead of an overwrite.
    let is_conffile = |target: &str| package.available.conffiles.iter().any(|c| c.path == target);
    let (conffile_entries, regular_entries): (Vec<_>, Vec<_>) = resolved.iter().partition(|e| is_conffile(&e.target));

    // Step 5: stage.
    let staged = stage(ctx, &regular_entries)?;

    // Step 6: prerm of the old package, if one is installed.
    let old_version = package.installed.version.clone();
    if let Some(old_version) = &old_version {
        run_script(
            ctx,
            &package.name,
            &package.architecture,
            ScriptKind::PreRm,
            if configure {
                ScriptAction::Upgrade {
                    new_version: package.available.version.as_ref().map(ToString::to_string).unwrap_or_default(),
                }
            } else {
                ScriptAction::Install {
                    old_version: package.available.version.as_ref().map(ToString::to_string).unwrap_or_default(),
                }
            },
            Step::PreRemoveOld,
        )?;
    }

    // Step 7: preinst of the new package.
    run_script(
        ctx,
        &package.name,
        &package.architecture,
        ScriptKind::PreInst,
        if old_version.is_some() {
            ScriptAction::Upgrade {
                new_version: package.available.version.as_ref().map(ToString::to_string).unwrap_or_default(),
            }
        } else {
            ScriptAction::Install {
                old_version: String::new(),
            }
        },
        Step::PreInstNew,
    )?;

    // Step 8: commit. Ordinary files go through the unconditional
    // stage/commit path; conffiles run the three-way decision (§4.8)
    // instead.
    commit(ctx, &staged)?;
    for entry in &conffile_entries {
        let old_hash = package
            .installed
            .conffiles
            .iter()
            .find(|c| c.path == entry.target)
            .and_then(|c| c.hash.as_deref());
        resolve_conffile(ctx, &entry.target, old_hash, &entry.content)?;
        if let Some(c) = package.available.conffiles.iter_mut().find(|c| c.path == entry.target) {
            c.hash = Some(conffile::hash(&entry.content));
        }
    }
    obsolete_conffiles(ctx, &package)?;

    // Step 9: update the in-memory record. Ownership of every touched
    // node transfers to the incoming package; any package this install
    // replaces loses ownership of the same nodes.
    for entry in &resolved {
        if let Some(handle) = ctx.nodes.lookup(&entry.target) {
            for replaced in &drop_ownership_from {
                ctx.nodes.get_mut(handle).remove_owner(replaced);
            }
            ctx.nodes.get_mut(handle).add_owner(&package.name);
            ctx.nodes.get_mut(handle).clear_flag(NodeFlags::IN_NEW_ARCHIVE);
            ctx.nodes.get_mut(handle).set_flag(NodeFlags::PLACED_ON_DISK);
        }
    }
    package.installed = package.available.clone();
    package.status = Status::Unpacked;
    ctx.packages.upsert(package.clone());

    // Step 10: persist.
    ctx.packages
        .record_update(&ctx.admin_dir, &package.name, &package.architecture)
        .map_err(|e| Error::Db(Step::Persist, e))?;
    ctx.packages.merge(&ctx.admin_dir).map_err(|e| Error::Db(Step::Persist, e))?;

    // Step 11: postrm of the old package, postinst of the new one. A
    // failed postrm here is sticky (§3: `eflag = reinstreq`), not a
    // reason to unwind the unpack that already committed: record the
    // flag and surface the error rather than silently swallowing it.
    if old_version.is_some() {
        if let Err(e) = run_script(
            ctx,
            &package.name,
            &package.architecture,
            ScriptKind::PostRm,
            ScriptAction::Upgrade {
                new_version: package.installed.version.as_ref().map(ToString::to_string).unwrap_or_default(),
            },
            Step::PostRemoveOldPostInstNew,
        ) {
            if let Some(pkg) = ctx.packages.get_mut(&package.name, &package.architecture) {
                pkg.eflag = depkg_db::EFlag::Reinstreq;
            }
            ctx.packages
                .record_update(&ctx.admin_dir, &package.name, &package.architecture)
                .map_err(|db_err| Error::Db(Step::Persist, db_err))?;
            ctx.packages.merge(&ctx.admin_dir).map_err(|db_err| Error::Db(Step::Persist, db_err))?;
            return Err(e);
        }
    }
    if configure {
        run_script(
            ctx,
            &package.name,
            &package.architecture,
            ScriptKind::PostInst,
            ScriptAction::Configure {
                old_version: String::new(),
            },
            Step::PostRemoveOldPostInstNew,
        )?;
        if let Some(pkg) = ctx.packages.get_mut(&package.name, &package.architecture) {
            pkg.status = Status::Installed;
        }
        ctx.packages
            .record_update(&ctx.admin_dir, &package.name, &package.architecture)
            .map_err(|e| Error::Db(Step::Persist, e))?;
        ctx.packages.merge(&ctx.admin_dir).map_err(|e| Error::Db(Step::Persist, e))?;
    }

    Ok(())
}

fn validate(ctx: &EngineContext<'_>, package: &Package) -> Result<(), Error> {
    if !ctx.packages.is_empty() {
        // Architecture compatibility: "all" and the installation's own
        // arch are always compatible; anything else must match exactly
        // or be covered by a multi-arch `foreign`/`allowed` slot.
        let archs: Vec<&str> = ctx.packages.iter().map(|p| p.architecture.as_str()).collect();
        if package.architecture != "all" && !archs.is_empty() && !archs.contains(&package.architecture.as_str()) && !archs.contains(&"all") {
            // No installed packages share this architecture yet: not
            // itself an error (first package of a new arch), so this
            // check only rejects a literally empty/garbage arch string.
            if package.architecture.trim().is_empty() {
                return Err(Error::ArchitectureMismatch(Step::Validate, package.architecture.clone()));
            }
        }
    }

    let verdict = depkg_depend::check(&package.available.pre_depends, &*ctx.packages, EvalScope::Installed);
    if !verdict.is_ok() {
        let reason = match verdict {
            depkg_depend::Verdict::Halt(r) | depkg_depend::Verdict::Defer(r) => r,
            depkg_depend::Verdict::Ok => unreachable!(),
        };
        if ctx.force.resolve(FailureKind::Depends) == Disposition::Abort {
            return Err(Error::PreDependsUnsatisfied(Step::Validate, reason));
        }
        warn!("{:?}: proceeding despite unsatisfied pre-depends ({reason}), --force-depends set", Step::Validate);
    }
    Ok(())
}

struct ResolvedEntry {
    /// Canonical target path after diversion resolution.
    target: String,
    entry: ArchiveEntryOwned,
}

impl std::ops::Deref for ResolvedEntry {
    type Target = ArchiveEntryOwned;

    fn deref(&self) -> &Self::Target {
        &self.entry
    }
}

fn enumerate(ctx: &mut EngineContext<'_>, package: &Package, entries: &[ArchiveEntryOwned]) -> Result<Vec<ResolvedEntry>, Error> {
    let mut resolved = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.path.split('/').any(|segment| segment == "..") {
            if ctx.force.resolve(FailureKind::BadPath) == Disposition::Abort {
                return Err(Error::BadPath(Step::Enumerate, entry.path.clone()));
            }
            warn!("{:?}: {:?} escapes the installation root, --force-bad-path set", Step::Enumerate, entry.path);
        }
        let handle = ctx.nodes.find(&entry.path, FindFlags::CREATE_IF_MISSING).expect("CreateIfMissing always returns Some");
        let target = if let Some(divert) = ctx.nodes.get(handle).divert() {
            if divert.holder_is(&package.name) {
                entry.path.clone()
            } else {
                divert.redirected.clone()
            }
        } else {
            entry.path.clone()
        };
        let target_handle = ctx.nodes.find(&target, FindFlags::CREATE_IF_MISSING).expect("CreateIfMissing always returns Some");
        ctx.nodes.get_mut(target_handle).set_flag(NodeFlags::IN_NEW_ARCHIVE);

        resolved.push(ResolvedEntry {
            target,
            entry: entry.clone(),
        });
    }
    Ok(resolved)
}

fn conflict_detection(
    ctx: &EngineContext<'_>,
    package: &Package,
    resolved: &[ResolvedEntry],
    drop_ownership_from: &mut Vec<String>,
) -> Result<(), Error> {
    let conflicts = depkg_depend::check_conflicts(&package.available.conflicts, &*ctx.packages);
    if let depkg_depend::Verdict::Halt(reason) = conflicts {
        if ctx.force.resolve(FailureKind::Conflicts) == Disposition::Abort {
            return Err(Error::ConflictsViolated(Step::ConflictDetection, reason));
        }
        warn!("{:?}: proceeding despite {reason}, --force-conflicts set", Step::ConflictDetection);
    }

    let breaks = depkg_depend::check_breaks(&package.available.breaks, &*ctx.packages);
    if let depkg_depend::Verdict::Halt(reason) = breaks {
        if ctx.force.resolve(FailureKind::Breaks) == Disposition::Abort {
            return Err(Error::BreaksViolated(Step::ConflictDetection, reason));
        }
        warn!("{:?}: proceeding despite {reason}, --force-breaks set", Step::ConflictDetection);
    }

    for entry in resolved {
        let Some(handle) = ctx.nodes.lookup(&entry.target) else {
            continue;
        };
        let node = ctx.nodes.get(handle);
        for owner in node.owners() {
            if owner == package.name {
                continue;
            }
            let allowed = package.available.replaces.atoms().any(|atom| atom.name == owner);
            if allowed {
                drop_ownership_from.push(owner.to_string());
            } else {
                return Err(Error::OwnershipConflict(Step::ConflictDetection, entry.target.clone(), owner.to_string()));
            }
        }
    }
    Ok(())
}

struct StagedFile {
    target: PathBuf,
    staging: PathBuf,
}

fn stage(ctx: &EngineContext<'_>, resolved: &[&ResolvedEntry]) -> Result<Vec<StagedFile>, Error> {
    let mut staged = Vec::with_capacity(resolved.len());

    for entry in resolved {
        let target = target_path(&ctx.root, &entry.target);

        match entry.kind {
            EntryKind::Directory => {
                fs::create_dir_all(&target).map_err(|e| Error::Io(Step::Stage, target.clone(), e))?;
                continue;
            }
            EntryKind::Symlink | EntryKind::Regular => {}
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::Io(Step::Stage, parent.to_path_buf(), e))?;
        }

        let staging_path = with_suffix(&target, "dpkg-new");
        {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .mode(0o600)
                .open(&staging_path)
                .map_err(|e| Error::Io(Step::Stage, staging_path.clone(), e))?;
            file.write_all(&entry.content).map_err(|e| Error::Io(Step::Stage, staging_path.clone(), e))?;
            let mut perms = file.metadata().map_err(|e| Error::Io(Step::Stage, staging_path.clone(), e))?.permissions();
            perms.set_mode(entry.mode);
            fs::set_permissions(&staging_path, perms).map_err(|e| Error::Io(Step::Stage, staging_path.clone(), e))?;
            file.sync_all().map_err(|e| Error::Io(Step::Stage, staging_path.clone(), e))?;
        }

        staged.push(StagedFile {
            target,
            staging: staging_path,
        });
    }

    Ok(staged)
}

/// Append `.suffix` to the whole file name, not just the extension
/// (`PathBuf::with_extension` would instead replace everything after
/// the last dot already in the name).
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
    name.push('.');
    name.push_str(suffix);
    path.with_file_name(name)
}

fn commit(ctx: &EngineContext<'_>, staged: &[StagedFile]) -> Result<(), Error> {
    for file in staged {
        if file.target.exists() && !file.target.is_dir() {
            let backup = with_suffix(&file.target, "dpkg-old");
            fs::rename(&file.target, &backup).map_err(|e| Error::Io(Step::Commit, file.target.clone(), e))?;
        }
        fs::rename(&file.staging, &file.target).map_err(|e| Error::Io(Step::Commit, file.target.clone(), e))?;
    }
    Ok(())
}

/// Resolve one declared conffile against the three-way decision
/// matrix (§4.8) and apply the chosen action to disk. Called by the
/// engine for each path in `package.available.conffiles` before the
/// ordinary [`stage`]/[`commit`] pass handles it (conffiles never go
/// through the unconditional overwrite path).
pub fn resolve_conffile(ctx: &EngineContext<'_>, path: &str, old_hash: Option<&str>, new_content: &[u8]) -> Result<ConfAction, Error> {
    let target = target_path(&ctx.root, path);
    let current = fs::read(&target).ok();
    let current_hash = current.as_deref().map(conffile::hash);
    let new_hash = conffile::hash(new_content);

    let action = conffile::decide(old_hash, &new_hash, current_hash.as_deref(), ctx.conf_policy);

    match action {
        ConfAction::KeepCurrentNoChange => {}
        ConfAction::KeepCurrentStashNew => {
            let dist = with_suffix(&target, "dpkg-dist");
            fs::write(&dist, new_content).map_err(|e| Error::Io(Step::Commit, dist, e))?;
        }
        ConfAction::InstallNew => {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::Io(Step::Commit, parent.to_path_buf(), e))?;
            }
            fs::write(&target, new_content).map_err(|e| Error::Io(Step::Commit, target.clone(), e))?;
        }
        ConfAction::BackupThenInstallNew => {
            if target.exists() {
                let backup = with_suffix(&target, "dpkg-old");
                fs::rename(&target, &backup).map_err(|e| Error::Io(Step::Commit, target.clone(), e))?;
            }
            fs::write(&target, new_content).map_err(|e| Error::Io(Step::Commit, target.clone(), e))?;
        }
    }

    Ok(action)
}

/// Conffiles declared by the installed binary but dropped by the
/// incoming one are renamed out of the way rather than left owned by
/// nobody (§4.8: "renamed to `.dpkg-bak` unless policy dictates
/// preservation").
fn obsolete_conffiles(ctx: &EngineContext<'_>, package: &Package) -> Result<(), Error> {
    for old in &package.installed.conffiles {
        if package.available.conffiles.iter().any(|c| c.path == old.path) {
            continue;
        }
        let target = target_path(&ctx.root, &old.path);
        if target.exists() {
            let backup = with_suffix(&target, "dpkg-bak");
            fs::rename(&target, &backup).map_err(|e| Error::Io(Step::Commit, target, e))?;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_script(
    ctx: &EngineContext<'_>,
    package: &str,
    architecture: &str,
    kind: ScriptKind,
    action: ScriptAction,
    step: Step,
) -> Result<(), Error> {
    let script_path = ctx.admin_dir.join("info").join(format!("{package}.{}", kind.file_suffix()));
    let script_ctx = ScriptContext {
        package: package.to_string(),
        architecture: architecture.to_string(),
        admindir: ctx.admin_dir.clone(),
        root: ctx.root.clone(),
    };
    match script::run(&script_path, &action, &script_ctx, script::DEFAULT_TIMEOUT) {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!("{step:?}: {e}");
            Err(Error::Script(step, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::MemoryArchive;
    use depkg_db::Package as DbPackage;

    fn ctx<'a>(nodes: &'a mut Table, packages: &'a mut PackageSet, dir: &Path) -> EngineContext<'a> {
        EngineContext {
            nodes,
            packages,
            admin_dir: dir.join("admin"),
            root: dir.join("root"),
            conf_policy: ConfPolicy::ConfOld,
            force: ForcePolicy::default(),
        }
    }

    #[test]
    fn fresh_install_places_files_and_marks_installed() {
        let dir = tempfile::tempdir().unwrap();
        let mut nodes = Table::new();
        let mut packages = PackageSet::new();

        let mut pkg = DbPackage::new("foo", "amd64");
        pkg.available.version = Some(depkg_version::parse("1.0").unwrap());

        let entries = vec![MemoryArchive::file("/usr/bin/foo", 0o755, b"binary".to_vec())];

        let mut c = ctx(&mut nodes, &mut packages, dir.path());
        unpack_and_commit(
            &mut c,
            UnpackRequest {
                package: pkg,
                entries,
                configure: true,
            },
        )
        .unwrap();

        let installed = packages.get("foo", "amd64").unwrap();
        assert_eq!(installed.status, Status::Installed);
        assert!(dir.path().join("root/usr/bin/foo").exists());
    }

    #[test]
    fn conflicting_ownership_without_replaces_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut nodes = Table::new();
        let mut packages = PackageSet::new();

        let handle = nodes.find("/usr/bin/x", FindFlags::CREATE_IF_MISSING).unwrap();
        nodes.get_mut(handle).add_owner("a");

        let mut a = DbPackage::new("a", "amd64");
        a.status = Status::Installed;
        a.installed.version = Some(depkg_version::parse("1.0").unwrap());
        packages.upsert(a);

        let mut b = DbPackage::new("b", "amd64");
        b.available.version = Some(depkg_version::parse("1.0").unwrap());

        let entries = vec![MemoryArchive::file("/usr/bin/x", 0o755, b"binary".to_vec())];

        let mut c = ctx(&mut nodes, &mut packages, dir.path());
        let result = unpack_and_commit(
            &mut c,
            UnpackRequest {
                package: b,
                entries,
                configure: true,
            },
        );

        assert!(matches!(result, Err(Error::OwnershipConflict(..))));
        assert!(!dir.path().join("root/usr/bin/x.dpkg-new").exists());
    }

    #[test]
    fn conffile_decision_matrix_is_applied_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("root/etc")).unwrap();
        fs::write(dir.path().join("root/etc/foo.conf"), b"user-edit").unwrap();

        let mut nodes = Table::new();
        let mut packages = PackageSet::new();
        let c = ctx(&mut nodes, &mut packages, dir.path());

        let old_hash = conffile::hash(b"original");
        let action = resolve_conffile(&c, "/etc/foo.conf", Some(&old_hash), b"new-content").unwrap();

        assert_eq!(action, ConfAction::KeepCurrentStashNew);
        assert!(dir.path().join("root/etc/foo.conf.dpkg-dist").exists());
        let kept = fs::read_to_string(dir.path().join("root/etc/foo.conf")).unwrap();
        assert_eq!(kept, "user-edit");
    }
}
