// SPDX-License-Identifier: MPL-2.0

//! `Engine` threads the package database, filesystem node table, and
//! trigger manager through one session's worth of archive-pipeline and
//! trigger-processing calls (§5: concurrency & resource model).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use depkg_archive::{ConfPolicy, EngineContext, UnpackRequest};
use depkg_db::{PackageSet, Status};
use depkg_triggers::Manager as TriggerManager;
use depkg_vfs::Table;
use log::warn;
use thiserror::Error;

use crate::force::{Disposition, FailureKind, ForcePolicy};
use crate::installation::Installation;

#[derive(Debug, Error)]
pub enum Error {
    #[error("loading package database: {0}")]
    Db(#[from] depkg_db::Error),
    #[error("archive pipeline: {0}")]
    Pipeline(#[from] depkg_archive::Error),
    #[error("package {0} is not installed")]
    NotInstalled(String),
    #[error("refusing to remove essential package {0} without --force-remove-essential")]
    EssentialRemoval(String),
}

/// Set from a `SIGTERM`/`SIGINT` handler; checked between scheduler
/// ticks and maintainer-script invocations (§5 cancellation). A plain
/// `AtomicBool` rather than a channel: the only consumer is a polling
/// loop, and async-signal-safety rules out allocating inside the
/// handler itself.
pub fn abort_flag() -> Arc<AtomicBool> {
    static FLAG: std::sync::OnceLock<Arc<AtomicBool>> = std::sync::OnceLock::new();
    FLAG.get_or_init(|| Arc::new(AtomicBool::new(false))).clone()
}

/// Install a handler that flips [`abort_flag`] on `SIGTERM`/`SIGINT`
/// instead of the default terminate-immediately behavior, matching
/// §5's "mid-rename or mid-script the current operation completes, no
/// tearing" guarantee.
pub fn install_signal_handler() {
    extern "C" fn handler(_: i32) {
        abort_flag().store(true, Ordering::SeqCst);
    }
    let action = nix::sys::signal::SigAction::new(
        nix::sys::signal::SigHandler::Handler(handler),
        nix::sys::signal::SaFlags::empty(),
        nix::sys::signal::SigSet::empty(),
    );
    unsafe {
        let _ = nix::sys::signal::sigaction(nix::sys::signal::Signal::SIGTERM, &action);
        let _ = nix::sys::signal::sigaction(nix::sys::signal::Signal::SIGINT, &action);
    }
}

pub struct Engine {
    pub installation: Installation,
    pub packages: PackageSet,
    pub nodes: Table,
    pub triggers: TriggerManager,
    pub conf_policy: ConfPolicy,
}

impl Engine {
    pub fn open(installation: Installation, conf_policy: ConfPolicy) -> Result<Self, Error> {
        let packages = PackageSet::load(&installation.admin_dir)?;
        let mut triggers = TriggerManager::new();
        for pkg in packages.iter() {
            for name in &pkg.available.triggers_interest {
                triggers.register_interest(pkg.name.clone(), name.clone());
            }
        }
        let mut engine = Self {
            installation,
            packages,
            nodes: Table::new(),
            triggers,
            conf_policy,
        };
        engine.recover_interrupted()?;
        Ok(engine)
    }

    /// Resume any package a prior session left `half-installed` or
    /// `half-configured` when it was killed mid-operation (§4.7 crash
    /// recovery, scenario S6): re-run `postinst configure` for a
    /// half-configured package, or the new package's `postrm abort-*`
    /// for a half-installed one, so every package converges to a
    /// defined state before any new operation is accepted.
    fn recover_interrupted(&mut self) -> Result<(), Error> {
        let admin_dir = self.installation.admin_dir.clone();
        let root = self.installation.root.clone();
        let stuck: Vec<(String, String, Status)> = self
            .packages
            .iter()
            .filter(|p| matches!(p.status, Status::HalfInstalled | Status::HalfConfigured))
            .map(|p| (p.name.clone(), p.architecture.clone(), p.status))
            .collect();

        for (name, architecture, status) in stuck {
            match status {
                Status::HalfConfigured => {
                    warn!("{name}:{architecture} was left half-configured by an interrupted session, resuming postinst configure");
                    if let Err(e) = self.configure(&name, &architecture) {
                        warn!("resuming configure for {name}:{architecture} failed: {e}, marking reinstreq");
                        if let Some(pkg) = self.packages.get_mut(&name, &architecture) {
                            pkg.eflag = depkg_db::EFlag::Reinstreq;
                        }
                        self.packages.record_update(&admin_dir, &name, &architecture)?;
                        self.packages.merge(&admin_dir)?;
                    }
                }
                Status::HalfInstalled => {
                    let Some(pkg) = self.packages.get(&name, &architecture) else {
                        continue;
                    };
                    let had_prior_install = pkg.installed.version.is_some();
                    let action = if had_prior_install {
                        depkg_archive::ScriptAction::AbortUpgrade {
                            new_version: pkg.available.version.as_ref().map(ToString::to_string).unwrap_or_default(),
                        }
                    } else {
                        depkg_archive::ScriptAction::AbortInstall {
                            old_version: pkg.installed.version.as_ref().map(ToString::to_string).unwrap_or_default(),
                        }
                    };
                    warn!("{name}:{architecture} was left half-installed by an interrupted session, resuming with {action:?}");
                    let script_ctx = depkg_archive::ScriptContext {
                        package: name.clone(),
                        architecture: architecture.clone(),
                        admindir: admin_dir.clone(),
                        root: root.clone(),
                    };
                    let result = depkg_archive::script::run(
                        &admin_dir.join("info").join(format!("{name}.postrm")),
                        &action,
                        &script_ctx,
                        depkg_archive::script::DEFAULT_TIMEOUT,
                    );
                    if let Some(pkg) = self.packages.get_mut(&name, &architecture) {
                        match result {
                            Ok(()) => {
                                pkg.status = if had_prior_install { Status::Installed } else { Status::NotInstalled };
                            }
                            Err(e) => {
                                warn!("abort script for {name}:{architecture} failed: {e}, marking reinstreq");
                                pkg.eflag = depkg_db::EFlag::Reinstreq;
                            }
                        }
                    }
                    self.packages.record_update(&admin_dir, &name, &architecture)?;
                    self.packages.merge(&admin_dir)?;
                }
                _ => unreachable!("filtered to half-installed/half-configured above"),
            }
        }
        Ok(())
    }

    fn should_abort(&self) -> bool {
        abort_flag().load(Ordering::SeqCst)
    }

    fn ctx(&mut self, force: ForcePolicy) -> EngineContext<'_> {
        EngineContext {
            nodes: &mut self.nodes,
            packages: &mut self.packages,
            admin_dir: self.installation.admin_dir.clone(),
            root: self.installation.root.clone(),
            conf_policy: self.conf_policy,
            force,
        }
    }

    /// Unpack one package and, if `configure` is set, run its postinst
    /// immediately (otherwise it is left `unpacked` for a later
    /// `configure` pass, matching `dpkg --unpack` vs `--install`).
    /// `force` gates the pre-depends/conflicts/breaks/bad-path checks
    /// the pipeline runs during validation (§7).
    pub fn unpack(&mut self, request: UnpackRequest, force: &ForcePolicy) -> Result<(), Error> {
        if self.should_abort() {
            return Ok(());
        }
        let name = request.package.name.clone();
        let triggers_interest = request.package.available.triggers_interest.clone();
        let mut ctx = self.ctx(*force);
        depkg_archive::unpack_and_commit(&mut ctx, request)?;
        for trigger in triggers_interest {
            self.triggers.register_interest(name.clone(), trigger);
        }
        Ok(())
    }

    /// Run `configure` on an already-unpacked package: its postinst
    /// with the `configure` action, transitioning it to `installed` (or
    /// `triggers-awaited`/`-pending` if deferred triggers remain).
    pub fn configure(&mut self, name: &str, architecture: &str) -> Result<(), Error> {
        if self.should_abort() {
            return Ok(());
        }
        let Some(pkg) = self.packages.get(name, architecture) else {
            return Err(Error::NotInstalled(name.to_string()));
        };
        if pkg.status != Status::Unpacked && pkg.status != Status::HalfConfigured {
            return Ok(());
        }
        let admin_dir = self.installation.admin_dir.clone();
        let root = self.installation.root.clone();
        let old_version = pkg.installed.version.as_ref().map(ToString::to_string).unwrap_or_default();
        depkg_archive::script::run(
            &admin_dir.join("info").join(format!("{name}.postinst")),
            &depkg_archive::ScriptAction::Configure { old_version },
            &depkg_archive::ScriptContext {
                package: name.to_string(),
                architecture: architecture.to_string(),
                admindir: admin_dir.clone(),
                root,
            },
            depkg_archive::script::DEFAULT_TIMEOUT,
        )
        .map_err(|e| depkg_archive::Error::Script(depkg_archive::Step::PostRemoveOldPostInstNew, e))?;

        if let Some(pkg) = self.packages.get_mut(name, architecture) {
            pkg.status = Status::Installed;
        }
        self.packages.record_update(&admin_dir, name, architecture)?;
        self.packages.merge(&admin_dir)?;
        Ok(())
    }

    /// Remove (or, if `purge`, also strip conffiles and database
    /// metadata for) one package. Refuses an essential package unless
    /// `force` permits it (§7: "Essential-package removal — fatal
    /// unless `--force-remove-essential`").
    pub fn remove(&mut self, name: &str, architecture: &str, purge: bool, force: &ForcePolicy) -> Result<(), Error> {
        if self.should_abort() {
            return Ok(());
        }
        let Some(pkg) = self.packages.get(name, architecture).cloned() else {
            return Err(Error::NotInstalled(name.to_string()));
        };

        if pkg.installed.essential && force.resolve(FailureKind::RemoveEssential) == Disposition::Abort {
            return Err(Error::EssentialRemoval(name.to_string()));
        }

        let admin_dir = self.installation.admin_dir.clone();
        let root = self.installation.root.clone();
        let script_ctx = depkg_archive::ScriptContext {
            package: name.to_string(),
            architecture: architecture.to_string(),
            admindir: admin_dir.clone(),
            root: root.clone(),
        };

        depkg_archive::script::run(
            &admin_dir.join("info").join(format!("{name}.prerm")),
            &depkg_archive::ScriptAction::Remove { in_favor_of: None },
            &script_ctx,
            depkg_archive::script::DEFAULT_TIMEOUT,
        )
        .map_err(|e| depkg_archive::Error::Script(depkg_archive::Step::PreRemoveOld, e))?;

        for handle in self.nodes.iter().map(|(h, _)| h).collect::<Vec<_>>() {
            if self.nodes.get(handle).is_owned_by(name) {
                self.nodes.get_mut(handle).remove_owner(name);
            }
        }

        depkg_archive::script::run(
            &admin_dir.join("info").join(format!("{name}.postrm")),
            &depkg_archive::ScriptAction::Remove { in_favor_of: None },
            &script_ctx,
            depkg_archive::script::DEFAULT_TIMEOUT,
        )
        .map_err(|e| depkg_archive::Error::Script(depkg_archive::Step::PostRemoveOldPostInstNew, e))?;

        if let Some(slot) = self.packages.get_mut(name, architecture) {
            if purge {
                slot.installed = Default::default();
                slot.status = Status::NotInstalled;
            } else {
                slot.status = Status::ConfigFiles;
            }
        }
        self.packages.record_update(&admin_dir, name, architecture)?;
        self.packages.merge(&admin_dir)?;
        Ok(())
    }

    /// Drain any deferred trigger processing bounded by the re-entry
    /// cap (§4.9).
    pub fn process_triggers(&mut self) {
        if self.should_abort() {
            return;
        }
        let admin_dir = self.installation.admin_dir.clone();
        let root = self.installation.root.clone();
        let outcomes = self.triggers.process_deferred(|package, activations| {
            let ctx = depkg_archive::ScriptContext {
                package: package.to_string(),
                architecture: String::new(),
                admindir: admin_dir.clone(),
                root: root.clone(),
            };
            let trigger_names = activations.iter().map(|(name, _)| name.clone()).collect();
            let result = depkg_archive::script::run(
                &admin_dir.join("info").join(format!("{package}.postinst")),
                &depkg_archive::ScriptAction::Triggered { trigger_names },
                &ctx,
                depkg_archive::script::DEFAULT_TIMEOUT,
            );
            match result {
                Ok(()) => depkg_triggers::ProcessOutcome::Completed {
                    newly_eligible_awaiters: Vec::new(),
                },
                Err(e) => depkg_triggers::ProcessOutcome::ScriptFailed(e.to_string()),
            }
        });
        for (package, outcome) in outcomes {
            if let depkg_triggers::ProcessOutcome::Completed { .. } = outcome {
                let architectures: Vec<String> = self.packages.by_name(&package).map(|p| p.architecture.clone()).collect();
                for architecture in architectures {
                    if let Some(pkg) = self.packages.get_mut(&package, &architecture) {
                        pkg.status = Status::Installed;
                    }
                }
            }
        }
    }
}
