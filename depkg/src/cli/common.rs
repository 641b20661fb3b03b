// SPDX-License-Identifier: MPL-2.0

//! Shared argument-resolution helpers used by several subcommands.

use depkg_db::PackageSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("package {0:?} not found")]
    NotFound(String),
    #[error("package {0:?} has installed variants for multiple architectures ({1}); pass --architecture to disambiguate")]
    Ambiguous(String, String),
}

/// Resolve the architecture to operate on for a package-name-only CLI
/// invocation: the explicit `--architecture` flag if given, otherwise
/// the package's sole known architecture variant.
pub fn resolve_architecture(packages: &PackageSet, name: &str, explicit: Option<&str>) -> Result<String, Error> {
    if let Some(arch) = explicit {
        return Ok(arch.to_string());
    }
    let mut archs: Vec<&str> = packages.by_name(name).map(|p| p.architecture.as_str()).collect();
    archs.sort_unstable();
    archs.dedup();
    match archs.as_slice() {
        [] => Err(Error::NotFound(name.to_string())),
        [only] => Ok((*only).to_string()),
        many => Err(Error::Ambiguous(name.to_string(), many.join(", "))),
    }
}
