// SPDX-License-Identifier: MPL-2.0

//! Converts between a [`Package`]'s binary slots and `depkg-control`
//! [`Stanza`]s. Known fields are decoded via the registry named in
//! `depkg-control::registry`; everything else round-trips through
//! `extra_fields` in original order.

use depkg_control::Stanza;
use depkg_depend::DependencyExpression;
use thiserror::Error;

use crate::package::{Conffile, MultiArch, Package, PackageBinary, Want};

const KNOWN: &[&str] = &[
    "Package",
    "Architecture",
    "Multi-Arch",
    "Version",
    "Maintainer",
    "Description",
    "Section",
    "Priority",
    "Essential",
    "Conffiles",
    "Depends",
    "Pre-Depends",
    "Recommends",
    "Suggests",
    "Enhances",
    "Conflicts",
    "Breaks",
    "Replaces",
    "Provides",
    "Trigger-Interest",
    "Status",
];

#[derive(Debug, Error)]
pub enum Error {
    #[error("stanza is missing required field {0:?}")]
    MissingField(&'static str),
    #[error("invalid version in field {0:?}: {1}")]
    InvalidVersion(&'static str, #[source] depkg_version::Error),
    #[error("invalid dependency expression in field {0:?}: {1}")]
    InvalidDependency(&'static str, #[source] depkg_depend::ParseError),
    #[error("malformed status field: {0:?}")]
    MalformedStatus(String),
}

fn parse_dep(stanza: &Stanza, field: &'static str) -> Result<DependencyExpression, Error> {
    match stanza.get(field) {
        Some(text) => DependencyExpression::parse(text).map_err(|e| Error::InvalidDependency(field, e)),
        None => Ok(DependencyExpression::default()),
    }
}

fn binary_from_stanza(stanza: &Stanza) -> Result<PackageBinary, Error> {
    let version = match stanza.get("Version") {
        Some(text) => Some(depkg_version::parse(text).map_err(|e| Error::InvalidVersion("Version", e))?),
        None => None,
    };

    let conffiles = stanza
        .get("Conffiles")
        .map(|text| {
            text.lines()
                .filter(|l| !l.trim().is_empty())
                .map(|line| {
                    let mut parts = line.trim().splitn(2, char::is_whitespace);
                    let path = parts.next().unwrap_or_default().to_string();
                    let hash = parts.next().map(|h| h.trim().to_string()).filter(|h| !h.is_empty());
                    Conffile { path, hash }
                })
                .collect()
        })
        .unwrap_or_default();

    let extra_fields = stanza
        .fields()
        .iter()
        .filter(|f| !KNOWN.iter().any(|k| f.name.eq_ignore_ascii_case(k)))
        .map(|f| (f.name.clone(), f.value.clone()))
        .collect();

    Ok(PackageBinary {
        version,
        maintainer: stanza.get("Maintainer").unwrap_or_default().to_string(),
        description: stanza.get("Description").unwrap_or_default().to_string(),
        section: stanza.get("Section").unwrap_or_default().to_string(),
        priority: stanza.get("Priority").unwrap_or_default().to_string(),
        essential: stanza.get_bool("Essential").unwrap_or(false),
        conffiles,
        depends: parse_dep(stanza, "Depends")?,
        pre_depends: parse_dep(stanza, "Pre-Depends")?,
        recommends: parse_dep(stanza, "Recommends")?,
        suggests: parse_dep(stanza, "Suggests")?,
        enhances: parse_dep(stanza, "Enhances")?,
        conflicts: parse_dep(stanza, "Conflicts")?,
        breaks: parse_dep(stanza, "Breaks")?,
        replaces: parse_dep(stanza, "Replaces")?,
        provides: parse_dep(stanza, "Provides")?,
        triggers_interest: stanza.get_list("Trigger-Interest"),
        extra_fields,
    })
}

fn binary_to_stanza(binary: &PackageBinary, stanza: &mut Stanza) {
    if let Some(version) = &binary.version {
        stanza.set("Version", version.to_string());
    }
    if !binary.maintainer.is_empty() {
        stanza.set("Maintainer", &binary.maintainer);
    }
    if !binary.description.is_empty() {
        stanza.set("Description", &binary.description);
    }
    if !binary.section.is_empty() {
        stanza.set("Section", &binary.section);
    }
    if !binary.priority.is_empty() {
        stanza.set("Priority", &binary.priority);
    }
    if binary.essential {
        stanza.set("Essential", "yes");
    }
    if !binary.conffiles.is_empty() {
        let text = binary
            .conffiles
            .iter()
            .map(|c| match &c.hash {
                Some(hash) => format!("{} {}", c.path, hash),
                None => c.path.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n");
        stanza.set("Conffiles", text);
    }
    set_dep(stanza, "Depends", &binary.depends);
    set_dep(stanza, "Pre-Depends", &binary.pre_depends);
    set_dep(stanza, "Recommends", &binary.recommends);
    set_dep(stanza, "Suggests", &binary.suggests);
    set_dep(stanza, "Enhances", &binary.enhances);
    set_dep(stanza, "Conflicts", &binary.conflicts);
    set_dep(stanza, "Breaks", &binary.breaks);
    set_dep(stanza, "Replaces", &binary.replaces);
    set_dep(stanza, "Provides", &binary.provides);
    if !binary.triggers_interest.is_empty() {
        stanza.set("Trigger-Interest", binary.triggers_interest.join(", "));
    }
    for (name, value) in &binary.extra_fields {
        stanza.set(name, value);
    }
}

fn set_dep(stanza: &mut Stanza, field: &str, expr: &DependencyExpression) {
    if expr.is_empty() {
        return;
    }
    let text = expr
        .0
        .iter()
        .map(|clause| clause.iter().map(ToString::to_string).collect::<Vec<_>>().join(" | "))
        .collect::<Vec<_>>()
        .join(", ");
    stanza.set(field, text);
}

/// Build a `Package` (installed slot only) from one `status`-file
/// stanza.
pub fn package_from_status_stanza(stanza: &Stanza) -> Result<Package, Error> {
    let name = stanza.get("Package").ok_or(Error::MissingField("Package"))?;
    let arch = stanza.get("Architecture").unwrap_or("all");
    let mut pkg = Package::new(name, arch);
    pkg.multi_arch = stanza.get("Multi-Arch").map(MultiArch::parse).unwrap_or(MultiArch::No);

    let status_field = stanza.get("Status").ok_or(Error::MissingField("Status"))?;
    let mut parts = status_field.split_whitespace();
    let want = parts
        .next()
        .and_then(Want::parse)
        .ok_or_else(|| Error::MalformedStatus(status_field.to_string()))?;
    let eflag = parts
        .next()
        .and_then(crate::package::EFlag::parse)
        .ok_or_else(|| Error::MalformedStatus(status_field.to_string()))?;
    let status = parts
        .next()
        .and_then(crate::package::Status::parse)
        .ok_or_else(|| Error::MalformedStatus(status_field.to_string()))?;

    pkg.want = want;
    pkg.eflag = eflag;
    pkg.status = status;
    pkg.installed = binary_from_stanza(stanza)?;
    Ok(pkg)
}

/// Render a `Package`'s installed slot as one `status`-file stanza.
/// Packages with `Status::NotInstalled` and no retained conffiles are
/// never written (caller filters before calling this).
pub fn package_to_status_stanza(pkg: &Package) -> Stanza {
    let mut stanza = Stanza::new();
    stanza.set("Package", &pkg.name);
    stanza.set("Architecture", &pkg.architecture);
    if pkg.multi_arch != MultiArch::No {
        stanza.set("Multi-Arch", pkg.multi_arch.as_str());
    }
    stanza.set(
        "Status",
        format!("{} {} {}", pkg.want.as_str(), pkg.eflag.as_str(), pkg.status.as_str()),
    );
    binary_to_stanza(&pkg.installed, &mut stanza);
    stanza
}

/// Build a `Package`'s available slot from one `available`-file
/// stanza.
pub fn package_from_available_stanza(stanza: &Stanza) -> Result<Package, Error> {
    let name = stanza.get("Package").ok_or(Error::MissingField("Package"))?;
    let arch = stanza.get("Architecture").unwrap_or("all");
    let mut pkg = Package::new(name, arch);
    pkg.multi_arch = stanza.get("Multi-Arch").map(MultiArch::parse).unwrap_or(MultiArch::No);
    pkg.available = binary_from_stanza(stanza)?;
    Ok(pkg)
}

pub fn package_to_available_stanza(pkg: &Package) -> Stanza {
    let mut stanza = Stanza::new();
    stanza.set("Package", &pkg.name);
    stanza.set("Architecture", &pkg.architecture);
    if pkg.multi_arch != MultiArch::No {
        stanza.set("Multi-Arch", pkg.multi_arch.as_str());
    }
    binary_to_stanza(&pkg.available, &mut stanza);
    stanza
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_status_stanza() {
        let mut pkg = Package::new("foo", "amd64");
        pkg.want = Want::Install;
        pkg.status = crate::package::Status::Installed;
        pkg.installed.version = Some(depkg_version::parse("1.0-1").unwrap());
        pkg.installed.depends = DependencyExpression::parse("bar (>= 1.0)").unwrap();

        let stanza = package_to_status_stanza(&pkg);
        let reparsed = package_from_status_stanza(&stanza).unwrap();

        assert_eq!(reparsed.name, "foo");
        assert_eq!(reparsed.installed.version, pkg.installed.version);
        assert_eq!(reparsed.installed.depends, pkg.installed.depends);
        assert_eq!(reparsed.status, crate::package::Status::Installed);
    }

    #[test]
    fn preserves_unknown_fields() {
        let mut stanza = Stanza::new();
        stanza.set("Package", "foo");
        stanza.set("Architecture", "amd64");
        stanza.set("Status", "install ok installed");
        stanza.set("Version", "1.0");
        stanza.set("Homepage", "https://example.com");

        let pkg = package_from_status_stanza(&stanza).unwrap();
        assert_eq!(
            pkg.installed.extra_fields,
            vec![("Homepage".to_string(), "https://example.com".to_string())]
        );

        let rendered = package_to_status_stanza(&pkg);
        assert_eq!(rendered.get("Homepage"), Some("https://example.com"));
    }
}
