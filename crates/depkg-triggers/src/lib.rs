// SPDX-License-Identifier: MPL-2.0

//! The trigger engine (§4.9): packages register interest in named
//! triggers or in a filesystem path prefix; activations (explicit or
//! file-based) accumulate into the interested package's pending set;
//! a deferred processing pass runs each pending package's
//! `postinst triggered` once, bounded against livelock by a hard
//! per-package re-entry cap.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, warn};
use thiserror::Error;

/// A path-prefix interest declaration (`interest /usr/share/icons`).
#[derive(Debug, Clone)]
struct FileInterest {
    package: String,
    prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("package {0:?} is not registered for any trigger")]
    UnknownPackage(String),
}

/// Per-session trigger bookkeeping. Does not itself know about
/// `Package`/`Status`; the engine syncs `pending`/`awaited` here back
/// into the package database's own `Triggers` record after each
/// processing pass.
#[derive(Debug, Default)]
pub struct Manager {
    /// trigger name -> packages interested via explicit activation.
    interest: BTreeMap<String, BTreeSet<String>>,
    file_interest: Vec<FileInterest>,
    /// package -> trigger name -> accumulated activation arguments.
    pending: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    /// package -> set of packages it's awaiting completion of.
    awaited: BTreeMap<String, BTreeSet<String>>,
    /// re-entry count per package within the current [`Self::process_deferred`] pass.
    reentries: BTreeMap<String, u32>,
}

/// Hard cap on re-activations of a single package within one
/// processing pass (§4.9 cycle breaking).
const MAX_REENTRIES: u32 = 20;

/// One package's outcome from a processing pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Ran to completion; the package (and any awaiters whose target
    /// just finished) may transition back to `installed`.
    Completed { newly_eligible_awaiters: Vec<String> },
    /// The maintainer script failed; caller applies force-policy.
    ScriptFailed(String),
}

impl Manager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_interest(&mut self, package: impl Into<String>, trigger_name: impl Into<String>) {
        self.interest.entry(trigger_name.into()).or_default().insert(package.into());
    }

    pub fn register_file_interest(&mut self, package: impl Into<String>, path_prefix: impl Into<String>) {
        self.file_interest.push(FileInterest {
            package: package.into(),
            prefix: path_prefix.into(),
        });
    }

    /// Explicit activation (`activate <name>`): every package that
    /// registered interest in `trigger_name` gets it appended to its
    /// pending set, with `args` as the accumulated argument list.
    pub fn activate_explicit(&mut self, trigger_name: &str, args: &[String]) -> Vec<String> {
        let Some(interested) = self.interest.get(trigger_name).cloned() else {
            return Vec::new();
        };
        for package in &interested {
            self.accumulate(package, trigger_name, args);
        }
        interested.into_iter().collect()
    }

    /// File-trigger activation: every registered prefix that `path`
    /// starts with activates its package, with `path` appended to
    /// that package's arguments for an implicit trigger keyed by the
    /// prefix itself (dpkg treats the interest path as the trigger
    /// name passed to `postinst triggered`).
    pub fn activate_by_path(&mut self, path: &str) -> Vec<String> {
        let matches: Vec<(String, String)> = self
            .file_interest
            .iter()
            .filter(|fi| path.starts_with(&fi.prefix))
            .map(|fi| (fi.package.clone(), fi.prefix.clone()))
            .collect();

        let mut activated = Vec::new();
        for (package, prefix) in matches {
            self.accumulate(&package, &prefix, std::slice::from_ref(&path.to_string()));
            activated.push(package);
        }
        activated.sort();
        activated.dedup();
        activated
    }

    fn accumulate(&mut self, package: &str, trigger_name: &str, args: &[String]) {
        let entry = self
            .pending
            .entry(package.to_string())
            .or_default()
            .entry(trigger_name.to_string())
            .or_default();
        for arg in args {
            if !entry.contains(arg) {
                entry.push(arg.clone());
            }
        }
        debug!("package {package:?} now pending trigger {trigger_name:?} with {entry:?}");
    }

    /// Is `package` known to this manager at all, i.e. has it
    /// registered interest (explicit or file-prefix) in anything?
    fn is_known_package(&self, package: &str) -> bool {
        self.interest.values().any(|pkgs| pkgs.contains(package)) || self.file_interest.iter().any(|fi| fi.package == package)
    }

    /// Mark `awaiter` as waiting on `target`'s trigger processing to
    /// complete before it may be considered `installed`. Fails if
    /// `target` never registered any trigger interest, since it could
    /// then never be processed and the awaiter would wait forever.
    pub fn await_target(&mut self, awaiter: impl Into<String>, target: impl Into<String>) -> Result<(), Error> {
        let target = target.into();
        if !self.is_known_package(&target) {
            return Err(Error::UnknownPackage(target));
        }
        self.awaited.entry(awaiter.into()).or_default().insert(target);
        Ok(())
    }

    pub fn is_pending(&self, package: &str) -> bool {
        self.pending.get(package).is_some_and(|t| !t.is_empty())
    }

    pub fn pending_packages(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().filter(|(_, t)| !t.is_empty()).map(|(p, _)| p.as_str())
    }

    /// Process every pending package once: invoke `run` with the
    /// accumulated `(trigger_name, args)` pairs, then clear its
    /// pending set. Re-activations that occur *during* this call (the
    /// handler may itself call [`Self::activate_explicit`] or
    /// [`Self::activate_by_path`]) are picked up in the same pass,
    /// bounded by [`MAX_REENTRIES`] per package; packages that exceed
    /// the bound are left pending for the next session.
    pub fn process_deferred(
        &mut self,
        mut run: impl FnMut(&str, &[(String, Vec<String>)]) -> ProcessOutcome,
    ) -> BTreeMap<String, ProcessOutcome> {
        self.reentries.clear();
        let mut results = BTreeMap::new();

        loop {
            let Some(package) = self.pending_packages().next().map(str::to_string) else {
                break;
            };

            let count = self.reentries.entry(package.clone()).or_insert(0);
            *count += 1;
            if *count > MAX_REENTRIES {
                warn!("package {package:?} exceeded the trigger re-entry bound; deferring to next session");
                break;
            }

            let activations: Vec<(String, Vec<String>)> = self
                .pending
                .remove(&package)
                .unwrap_or_default()
                .into_iter()
                .collect();

            let outcome = run(&package, &activations);

            if let ProcessOutcome::Completed { newly_eligible_awaiters } = &outcome {
                for awaiter in newly_eligible_awaiters {
                    if let Some(targets) = self.awaited.get_mut(awaiter) {
                        targets.remove(&package);
                        if targets.is_empty() {
                            self.awaited.remove(awaiter);
                        }
                    }
                }
            }

            results.insert(package, outcome);
        }

        results
    }

    /// Packages still awaiting some other package's trigger
    /// completion, i.e. still `triggers-awaited`.
    pub fn still_awaiting(&self) -> impl Iterator<Item = &str> {
        self.awaited.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_activation_marks_interested_package_pending() {
        let mut mgr = Manager::new();
        mgr.register_file_interest("icon-cache", "/usr/share/icons");
        let activated = mgr.activate_by_path("/usr/share/icons/foo.png");
        assert_eq!(activated, vec!["icon-cache".to_string()]);
        assert!(mgr.is_pending("icon-cache"));
    }

    #[test]
    fn explicit_activation_targets_registered_interest() {
        let mut mgr = Manager::new();
        mgr.register_interest("foo", "ldconfig");
        mgr.activate_explicit("ldconfig", &[]);
        assert!(mgr.is_pending("foo"));
    }

    #[test]
    fn processing_clears_pending_and_resolves_awaiters() {
        let mut mgr = Manager::new();
        mgr.register_file_interest("icon-cache", "/usr/share/icons");
        mgr.activate_by_path("/usr/share/icons/foo.png");
        mgr.await_target("downstream", "icon-cache").unwrap();

        let results = mgr.process_deferred(|_pkg, _activations| ProcessOutcome::Completed {
            newly_eligible_awaiters: vec!["downstream".to_string()],
        });

        assert!(!mgr.is_pending("icon-cache"));
        assert!(results.contains_key("icon-cache"));
        assert_eq!(mgr.still_awaiting().count(), 0);
    }

    #[test]
    fn await_target_rejects_unregistered_package() {
        let mut mgr = Manager::new();
        assert_eq!(
            mgr.await_target("downstream", "nobody-home"),
            Err(Error::UnknownPackage("nobody-home".to_string()))
        );
    }

    #[test]
    fn single_pass_terminates_without_reentry() {
        let mut mgr = Manager::new();
        mgr.register_interest("a", "self-trigger");
        mgr.activate_explicit("self-trigger", &[]);

        let results = mgr.process_deferred(|_pkg, _activations| ProcessOutcome::Completed {
            newly_eligible_awaiters: vec![],
        });
        assert_eq!(results.len(), 1);
    }
}
