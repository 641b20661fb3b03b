// SPDX-License-Identifier: MPL-2.0

//! The conffile three-way merge engine (§4.8): a pure decision
//! function over three content hashes plus a force-flag-driven policy
//! for the genuinely ambiguous case.

use sha2::{Digest, Sha256};

/// User-selectable behavior for the ambiguous three-way case (old,
/// current, and new are all distinct).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfPolicy {
    /// Keep whatever's on disk; stash the new version as `.dpkg-dist`.
    #[default]
    ConfOld,
    /// Install the new version; back up the on-disk edit as `.dpkg-old`.
    ConfNew,
    /// Use the package maintainer's preferred default (treated as
    /// `ConfNew` here: no interactive prompt surface exists in this
    /// engine).
    ConfDef,
    /// Treat a missing on-disk file as `ConfNew` rather than prompting.
    ConfMiss,
    /// Would normally prompt; this engine has no interactive surface,
    /// so it degrades to `ConfOld` (the safer default) and the caller
    /// is expected to report that a decision was needed.
    ConfAsk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// No on-disk change; new and current already agree.
    KeepCurrentNoChange,
    /// Overwrite the on-disk file with the new content.
    InstallNew,
    /// Leave the on-disk edit alone, and additionally stash the new
    /// content at `<path>.dpkg-dist` for the administrator to review.
    KeepCurrentStashNew,
    /// Leave the on-disk edit alone, back it up to `<path>.dpkg-old`,
    /// then install the new content (used when install is chosen from
    /// the ambiguous case).
    BackupThenInstallNew,
}

/// Decide what to do with one conffile, given the hash recorded at
/// last install (`old`), the hash of the version being installed now
/// (`new`), the hash actually on disk right now (`current`), and the
/// policy to fall back on when all three diverge. `current = None`
/// means the file is missing on disk.
pub fn decide(old: Option<&str>, new: &str, current: Option<&str>, policy: ConfPolicy) -> Action {
    let Some(current) = current else {
        // Missing on disk. A file that was never tracked before, or
        // whose tracked content matches what's about to be installed,
        // has nothing to negotiate: install it. Otherwise the admin
        // deliberately removed a conffile that differs from the
        // incoming one — genuinely ambiguous, and subject to the same
        // confmiss policy as any other three-way conflict rather than
        // a silent reinstall.
        if old.is_none() || old == Some(new) {
            return Action::InstallNew;
        }
        return resolve_missing(policy);
    };

    // Row 1: the conffile is unchanged between the installed and
    // incoming package, regardless of what's on disk — never touch it.
    if old == Some(new) {
        return Action::KeepCurrentNoChange;
    }

    // Row 2: the administrator never touched the file — safe to
    // silently adopt the new version.
    if old == Some(current) {
        return Action::InstallNew;
    }

    // Row 5: disk already holds exactly the incoming content.
    if new == current {
        return Action::InstallNew;
    }

    // Row 4: old, new and current are three genuinely distinct
    // values (or there was no prior record at all) — ambiguous.
    resolve_ambiguous(policy)
}

fn resolve_ambiguous(policy: ConfPolicy) -> Action {
    match policy {
        ConfPolicy::ConfOld | ConfPolicy::ConfAsk => Action::KeepCurrentStashNew,
        ConfPolicy::ConfNew | ConfPolicy::ConfDef => Action::BackupThenInstallNew,
        ConfPolicy::ConfMiss => Action::KeepCurrentStashNew,
    }
}

/// Same ambiguous-case policy table, but for a conffile missing from
/// disk entirely: `confmiss` (and `confnew`/`confdef`, which already
/// imply "take the new content") reinstall it; everything else leaves
/// the deliberate removal alone and stashes the new content instead.
fn resolve_missing(policy: ConfPolicy) -> Action {
    match policy {
        ConfPolicy::ConfMiss | ConfPolicy::ConfNew | ConfPolicy::ConfDef => Action::InstallNew,
        ConfPolicy::ConfOld | ConfPolicy::ConfAsk => Action::KeepCurrentStashNew,
    }
}

/// SHA-256 hex digest of `content`, the hash format recorded in
/// `Conffiles` records and compared by [`decide`].
pub fn hash(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmodified_then_new_installs_silently() {
        let old = hash(b"A");
        let current = hash(b"A");
        let new = hash(b"B");
        assert_eq!(decide(Some(&old), &new, Some(&current), ConfPolicy::ConfOld), Action::InstallNew);
    }

    #[test]
    fn edited_but_new_matches_current_keeps_with_no_change() {
        let old = hash(b"A");
        let current = hash(b"C");
        let new = hash(b"C");
        assert_eq!(
            decide(Some(&old), &new, Some(&current), ConfPolicy::ConfOld),
            Action::KeepCurrentNoChange
        );
    }

    #[test]
    fn unchanged_upstream_version_never_touches_disk() {
        let old = hash(b"A");
        let current = hash(b"B");
        let new = hash(b"A");
        assert_eq!(
            decide(Some(&old), &new, Some(&current), ConfPolicy::ConfOld),
            Action::KeepCurrentNoChange
        );
    }

    #[test]
    fn three_way_conflict_under_confold_stashes_new() {
        let old = hash(b"A");
        let current = hash(b"B");
        let new = hash(b"C");
        assert_eq!(
            decide(Some(&old), &new, Some(&current), ConfPolicy::ConfOld),
            Action::KeepCurrentStashNew
        );
    }

    #[test]
    fn three_way_conflict_under_confnew_backs_up_and_installs() {
        let old = hash(b"A");
        let current = hash(b"B");
        let new = hash(b"C");
        assert_eq!(
            decide(Some(&old), &new, Some(&current), ConfPolicy::ConfNew),
            Action::BackupThenInstallNew
        );
    }

    #[test]
    fn missing_on_disk_with_no_prior_record_installs() {
        let new = hash(b"C");
        assert_eq!(decide(None, &new, None, ConfPolicy::ConfOld), Action::InstallNew);
    }

    #[test]
    fn missing_on_disk_unchanged_from_old_installs() {
        let old = hash(b"A");
        let new = hash(b"A");
        assert_eq!(decide(Some(&old), &new, None, ConfPolicy::ConfOld), Action::InstallNew);
    }

    #[test]
    fn missing_on_disk_with_diverging_old_and_new_respects_confold_default() {
        let old = hash(b"A");
        let new = hash(b"B");
        assert_eq!(decide(Some(&old), &new, None, ConfPolicy::ConfOld), Action::KeepCurrentStashNew);
    }

    #[test]
    fn missing_on_disk_with_diverging_old_and_new_honors_force_confmiss() {
        let old = hash(b"A");
        let new = hash(b"B");
        assert_eq!(decide(Some(&old), &new, None, ConfPolicy::ConfMiss), Action::InstallNew);
    }
}
