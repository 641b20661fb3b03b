// SPDX-License-Identifier: MPL-2.0

//! The maintainer-script subprocess contract (§6, Open Question 2).
//! Every invocation is a direct `argv` exec via [`std::process::Command`]
//! — never a shell-joined command line — bounded by a wall-clock
//! timeout via `wait-timeout`.

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use log::{debug, warn};
use thiserror::Error;
use wait_timeout::ChildExt;

/// The maintainer-script action being invoked, each mapping to one
/// fixed argv shape per §6.
#[derive(Debug, Clone)]
pub enum ScriptAction {
    Configure { old_version: String },
    Triggered { trigger_names: Vec<String> },
    Upgrade { new_version: String },
    Install { old_version: String },
    Remove { in_favor_of: Option<String> },
    Purge,
    AbortUpgrade { new_version: String },
    AbortInstall { old_version: String },
    AbortRemove { in_favor_of: Option<String> },
}

impl ScriptAction {
    fn argv(&self) -> Vec<String> {
        match self {
            ScriptAction::Configure { old_version } => vec!["configure".to_string(), old_version.clone()],
            ScriptAction::Triggered { trigger_names } => {
                let mut argv = vec!["triggered".to_string()];
                argv.extend(trigger_names.iter().cloned());
                argv
            }
            ScriptAction::Upgrade { new_version } => vec!["upgrade".to_string(), new_version.clone()],
            ScriptAction::Install { old_version } => vec!["install".to_string(), old_version.clone()],
            ScriptAction::Remove { in_favor_of } => {
                let mut argv = vec!["remove".to_string()];
                if let Some(pkg) = in_favor_of {
                    argv.push(pkg.clone());
                }
                argv
            }
            ScriptAction::Purge => vec!["purge".to_string()],
            ScriptAction::AbortUpgrade { new_version } => vec!["abort-upgrade".to_string(), new_version.clone()],
            ScriptAction::AbortInstall { old_version } => vec!["abort-install".to_string(), old_version.clone()],
            ScriptAction::AbortRemove { in_favor_of } => {
                let mut argv = vec!["abort-remove".to_string()];
                if let Some(pkg) = in_favor_of {
                    argv.push(pkg.clone());
                }
                argv
            }
        }
    }
}

/// Which maintainer script file to run (`info/<pkg>.<script>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    PreInst,
    PostInst,
    PreRm,
    PostRm,
}

impl ScriptKind {
    pub fn file_suffix(&self) -> &'static str {
        match self {
            ScriptKind::PreInst => "preinst",
            ScriptKind::PostInst => "postinst",
            ScriptKind::PreRm => "prerm",
            ScriptKind::PostRm => "postrm",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScriptContext {
    pub package: String,
    pub architecture: String,
    pub admindir: std::path::PathBuf,
    pub root: std::path::PathBuf,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error launching script {0:?}: {1}")]
    Spawn(std::path::PathBuf, #[source] std::io::Error),
    #[error("script {0:?} exceeded its {1:?} timeout and was killed")]
    Timeout(std::path::PathBuf, Duration),
    #[error("script {0:?} exited with non-zero status {1}")]
    NonZeroExit(std::path::PathBuf, i32),
    #[error("script {0:?} was terminated by a signal")]
    Signaled(std::path::PathBuf),
}

/// Default bound on a single maintainer-script invocation. dpkg
/// itself has none; we set one so a hung postinst cannot wedge the
/// whole session indefinitely.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Invoke one maintainer script with `action`'s fixed argv and the
/// `DPKG_*` environment contract of §6. `script_path` must not exist
/// as a path built from untrusted input joined into a shell string —
/// it is passed straight to `execve` via [`Command`].
pub fn run(script_path: &Path, action: &ScriptAction, ctx: &ScriptContext, timeout: Duration) -> Result<(), Error> {
    if !script_path.exists() {
        debug!("no {script_path:?}, nothing to run for {:?}", action.argv());
        return Ok(());
    }

    let mut cmd = Command::new(script_path);
    cmd.args(action.argv());
    cmd.env("DPKG_MAINTSCRIPT_PACKAGE", &ctx.package);
    cmd.env("DPKG_MAINTSCRIPT_ARCH", &ctx.architecture);
    cmd.env("DPKG_MAINTSCRIPT_NAME", script_path.file_name().and_then(|n| n.to_str()).unwrap_or_default());
    cmd.env("DPKG_ADMINDIR", &ctx.admindir);
    cmd.env("DPKG_ROOT", &ctx.root);
    cmd.stdin(Stdio::null());

    let mut child = cmd.spawn().map_err(|e| Error::Spawn(script_path.to_path_buf(), e))?;

    match child.wait_timeout(timeout).map_err(|e| Error::Spawn(script_path.to_path_buf(), e))? {
        Some(status) => match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(Error::NonZeroExit(script_path.to_path_buf(), code)),
            None => Err(Error::Signaled(script_path.to_path_buf())),
        },
        None => {
            warn!("script {script_path:?} exceeded {timeout:?}, killing");
            let _ = child.kill();
            let _ = child.wait();
            Err(Error::Timeout(script_path.to_path_buf(), timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "#!/bin/sh\n{body}").unwrap();
        let mut perms = f.metadata().unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn ctx(dir: &Path) -> ScriptContext {
        ScriptContext {
            package: "foo".to_string(),
            architecture: "amd64".to_string(),
            admindir: dir.join("admin"),
            root: dir.join("root"),
        }
    }

    #[test]
    fn missing_script_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = run(
            &dir.path().join("nonexistent"),
            &ScriptAction::Configure {
                old_version: String::new(),
            },
            &ctx(dir.path()),
            DEFAULT_TIMEOUT,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn successful_script_reports_ok() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "postinst", "exit 0");
        let result = run(
            &script,
            &ScriptAction::Configure {
                old_version: "1.0".to_string(),
            },
            &ctx(dir.path()),
            DEFAULT_TIMEOUT,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn failing_script_reports_non_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "postinst", "exit 7");
        let result = run(&script, &ScriptAction::Purge, &ctx(dir.path()), DEFAULT_TIMEOUT);
        assert!(matches!(result, Err(Error::NonZeroExit(_, 7))));
    }

    #[test]
    fn argv_never_passes_through_a_shell() {
        let dir = tempfile::tempdir().unwrap();
        // A package name containing shell metacharacters must not be
        // interpretable as shell syntax: it is only ever an argv
        // element or an env var value.
        let script = write_script(dir.path(), "postinst", "[ \"$DPKG_MAINTSCRIPT_PACKAGE\" = \"foo; rm -rf /\" ] && exit 0 || exit 1");
        let mut context = ctx(dir.path());
        context.package = "foo; rm -rf /".to_string();
        let result = run(
            &script,
            &ScriptAction::Configure {
                old_version: String::new(),
            },
            &context,
            DEFAULT_TIMEOUT,
        );
        assert!(result.is_ok());
    }
}
