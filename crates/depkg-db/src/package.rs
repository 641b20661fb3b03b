// SPDX-License-Identifier: MPL-2.0

//! The `Package`/`PackageBinary`/`Status` record types of §3.

use depkg_depend::DependencyExpression;
use depkg_version::Version;

/// Per-architecture coexistence mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiArch {
    No,
    Same,
    Foreign,
    Allowed,
}

impl MultiArch {
    pub fn parse(text: &str) -> Self {
        match text {
            "same" => MultiArch::Same,
            "foreign" => MultiArch::Foreign,
            "allowed" => MultiArch::Allowed,
            _ => MultiArch::No,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MultiArch::No => "no",
            MultiArch::Same => "same",
            MultiArch::Foreign => "foreign",
            MultiArch::Allowed => "allowed",
        }
    }
}

/// What the administrator or a higher-layer resolver wants done with
/// this package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Want {
    Unknown,
    Install,
    Hold,
    Deinstall,
    Purge,
}

impl Want {
    pub fn as_str(&self) -> &'static str {
        match self {
            Want::Unknown => "unknown",
            Want::Install => "install",
            Want::Hold => "hold",
            Want::Deinstall => "deinstall",
            Want::Purge => "purge",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        Some(match text {
            "unknown" => Want::Unknown,
            "install" => Want::Install,
            "hold" => Want::Hold,
            "deinstall" => Want::Deinstall,
            "purge" => Want::Purge,
            _ => return None,
        })
    }
}

/// Error flag. Sticky across sessions until a successful unpack+configure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EFlag {
    Ok,
    Reinstreq,
}

impl EFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            EFlag::Ok => "ok",
            EFlag::Reinstreq => "reinstreq",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        Some(match text {
            "ok" => EFlag::Ok,
            "reinstreq" => EFlag::Reinstreq,
            _ => return None,
        })
    }
}

/// A Package's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    NotInstalled,
    ConfigFiles,
    HalfInstalled,
    Unpacked,
    HalfConfigured,
    TriggersAwaited,
    TriggersPending,
    Installed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::NotInstalled => "not-installed",
            Status::ConfigFiles => "config-files",
            Status::HalfInstalled => "half-installed",
            Status::Unpacked => "unpacked",
            Status::HalfConfigured => "half-configured",
            Status::TriggersAwaited => "triggers-awaited",
            Status::TriggersPending => "triggers-pending",
            Status::Installed => "installed",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        Some(match text {
            "not-installed" => Status::NotInstalled,
            "config-files" => Status::ConfigFiles,
            "half-installed" => Status::HalfInstalled,
            "unpacked" => Status::Unpacked,
            "half-configured" => Status::HalfConfigured,
            "triggers-awaited" => Status::TriggersAwaited,
            "triggers-pending" => Status::TriggersPending,
            "installed" => Status::Installed,
            _ => return None,
        })
    }

    /// Does this state imply the package's installed metadata must be
    /// complete (§3 invariant)?
    pub fn implies_complete_metadata(&self) -> bool {
        matches!(
            self,
            Status::HalfInstalled
                | Status::Unpacked
                | Status::HalfConfigured
                | Status::TriggersAwaited
                | Status::TriggersPending
                | Status::Installed
        )
    }

    /// Does this state imply no files are owned (conffiles may still
    /// be remembered)?
    pub fn implies_no_owned_files(&self) -> bool {
        matches!(self, Status::NotInstalled | Status::ConfigFiles)
    }
}

/// One conffile declaration: path plus the content hash recorded at
/// the time this binary slot was installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conffile {
    pub path: String,
    pub hash: Option<String>,
}

/// The control-stanza-derived fields of one binary slot (installed or
/// available) of a Package.
#[derive(Debug, Clone, Default)]
pub struct PackageBinary {
    pub version: Option<Version>,
    pub maintainer: String,
    pub description: String,
    pub section: String,
    pub priority: String,
    pub essential: bool,
    pub conffiles: Vec<Conffile>,
    pub depends: DependencyExpression,
    pub pre_depends: DependencyExpression,
    pub recommends: DependencyExpression,
    pub suggests: DependencyExpression,
    pub enhances: DependencyExpression,
    pub conflicts: DependencyExpression,
    pub breaks: DependencyExpression,
    pub replaces: DependencyExpression,
    pub provides: DependencyExpression,
    pub triggers_interest: Vec<String>,
    /// Unknown/extra fields, preserved in original order for round trip
    /// (`Installed-Size`, `Homepage`, `Origin`, `Bugs`, `Tag`, `Source`,
    /// and anything the registry doesn't decode).
    pub extra_fields: Vec<(String, String)>,
}

impl PackageBinary {
    pub fn is_present(&self) -> bool {
        self.version.is_some()
    }
}

/// Per-package trigger bookkeeping (§3, §4.9).
#[derive(Debug, Clone, Default)]
pub struct Triggers {
    pub pending: std::collections::BTreeSet<String>,
    pub awaited: std::collections::BTreeSet<String>,
}

/// One `(name, architecture)` package record.
#[derive(Debug, Clone)]
pub struct Package {
    pub name: String,
    pub architecture: String,
    pub multi_arch: MultiArch,
    pub installed: PackageBinary,
    pub available: PackageBinary,
    pub want: Want,
    pub eflag: EFlag,
    pub status: Status,
    pub triggers: Triggers,
}

impl Package {
    pub fn new(name: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            architecture: architecture.into(),
            multi_arch: MultiArch::No,
            installed: PackageBinary::default(),
            available: PackageBinary::default(),
            want: Want::Unknown,
            eflag: EFlag::Ok,
            status: Status::NotInstalled,
            triggers: Triggers::default(),
        }
    }

    /// Check the §3 status/metadata invariants; violations are
    /// internal bugs, never user-facing conditions.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if self.status == Status::NotInstalled && self.installed.version.is_some() {
            return Err(InvariantViolation::NotInstalledHasVersion);
        }
        if self.status.implies_complete_metadata() && self.installed.version.is_none() {
            return Err(InvariantViolation::IncompleteMetadata(self.status));
        }
        Ok(())
    }

    pub fn key(&self) -> (String, String) {
        (self.name.clone(), self.architecture.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("status is not-installed but installed.version is set")]
    NotInstalledHasVersion,
    #[error("status {0:?} requires complete installed metadata")]
    IncompleteMetadata(Status),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_package_is_not_installed() {
        let pkg = Package::new("foo", "amd64");
        assert_eq!(pkg.status, Status::NotInstalled);
        pkg.check_invariants().unwrap();
    }

    #[test]
    fn not_installed_with_version_violates_invariant() {
        let mut pkg = Package::new("foo", "amd64");
        pkg.installed.version = Some(depkg_version::parse("1.0").unwrap());
        assert_eq!(pkg.check_invariants(), Err(InvariantViolation::NotInstalledHasVersion));
    }

    #[test]
    fn installed_without_version_violates_invariant() {
        let mut pkg = Package::new("foo", "amd64");
        pkg.status = Status::Installed;
        assert!(matches!(
            pkg.check_invariants(),
            Err(InvariantViolation::IncompleteMetadata(Status::Installed))
        ));
    }
}
