// SPDX-License-Identifier: MPL-2.0

//! The `DPKG_FORCE` / `--force-*` policy (§7): a pure mapping from a
//! failure category to "proceed anyway" or "abort", resolved once per
//! pipeline stage rather than threaded through every call site as a
//! bag of booleans.

/// One of the failure categories §7 names as force-flag-gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Depends,
    Breaks,
    Conflicts,
    BadPath,
    RemoveReinstreq,
    RemoveEssential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Proceed,
    Abort,
}

/// Force-flag state for one session. Internal-invariant violations are
/// never represented here (§7: "never masked by force-flags").
#[derive(Debug, Clone, Copy, Default)]
pub struct ForcePolicy {
    pub depends: bool,
    pub breaks: bool,
    pub conflicts: bool,
    pub bad_path: bool,
    pub remove_reinstreq: bool,
    pub remove_essential: bool,
}

impl ForcePolicy {
    /// Parse the comma-separated `DPKG_FORCE` environment variable
    /// (unknown tokens are ignored, matching dpkg's own tolerance of
    /// force-flag synonyms we don't implement).
    pub fn from_env() -> Self {
        let raw = std::env::var("DPKG_FORCE").unwrap_or_default();
        Self::from_tokens(raw.split(','))
    }

    pub fn from_tokens<'a>(tokens: impl Iterator<Item = &'a str>) -> Self {
        let mut policy = Self::default();
        for token in tokens {
            match token.trim() {
                "depends" => policy.depends = true,
                "breaks" => policy.breaks = true,
                "conflicts" => policy.conflicts = true,
                "bad-path" => policy.bad_path = true,
                "remove-reinstreq" => policy.remove_reinstreq = true,
                "remove-essential" => policy.remove_essential = true,
                "all" => {
                    policy = Self {
                        depends: true,
                        breaks: true,
                        conflicts: true,
                        bad_path: true,
                        remove_reinstreq: true,
                        remove_essential: true,
                    }
                }
                _ => {}
            }
        }
        policy
    }

    pub fn resolve(&self, kind: FailureKind) -> Disposition {
        let forced = match kind {
            FailureKind::Depends => self.depends,
            FailureKind::Breaks => self.breaks,
            FailureKind::Conflicts => self.conflicts,
            FailureKind::BadPath => self.bad_path,
            FailureKind::RemoveReinstreq => self.remove_reinstreq,
            FailureKind::RemoveEssential => self.remove_essential,
        };
        if forced {
            Disposition::Proceed
        } else {
            Disposition::Abort
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unforced_defaults_to_abort() {
        let policy = ForcePolicy::default();
        assert_eq!(policy.resolve(FailureKind::Depends), Disposition::Abort);
    }

    #[test]
    fn force_depends_downgrades_only_that_category() {
        let policy = ForcePolicy::from_tokens(["depends"].into_iter());
        assert_eq!(policy.resolve(FailureKind::Depends), Disposition::Proceed);
        assert_eq!(policy.resolve(FailureKind::RemoveEssential), Disposition::Abort);
    }

    #[test]
    fn force_all_downgrades_every_category() {
        let policy = ForcePolicy::from_tokens(["all"].into_iter());
        assert_eq!(policy.resolve(FailureKind::RemoveEssential), Disposition::Proceed);
        assert_eq!(policy.resolve(FailureKind::BadPath), Disposition::Proceed);
    }
}
