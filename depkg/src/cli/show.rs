// SPDX-License-Identifier: MPL-2.0

use clap::{arg, ArgMatches, Command};
use depkg_archive::ConfPolicy;
use thiserror::Error;

use crate::installation::Installation;
use crate::session::Engine;

use super::{common, GlobalArgs};

pub fn command() -> Command {
    Command::new("show")
        .about("Display the full record for one package")
        .arg(arg!(<PACKAGE> "package name"))
        .arg(arg!(--architecture <ARCH> "architecture, if the package name is ambiguous").required(false))
}

pub fn handle(args: &ArgMatches, globals: &GlobalArgs) -> Result<(), Error> {
    let name = args.get_one::<String>("PACKAGE").expect("required");
    let explicit_arch = args.get_one::<String>("architecture").map(String::as_str);

    let installation = Installation::open(globals.root.clone(), globals.admin_dir.clone())?;
    let engine = Engine::open(installation, ConfPolicy::default())?;
    let architecture = common::resolve_architecture(&engine.packages, name, explicit_arch)?;
    let pkg = engine
        .packages
        .get(name, &architecture)
        .ok_or_else(|| common::Error::NotFound(name.to_string()))?;

    let binary = if pkg.installed.is_present() { &pkg.installed } else { &pkg.available };

    println!("Package: {}", pkg.name);
    println!("Architecture: {}", pkg.architecture);
    println!("Status: {}", pkg.status.as_str());
    println!("Want: {}", pkg.want.as_str());
    if let Some(version) = &binary.version {
        println!("Version: {version}");
    }
    if !binary.maintainer.is_empty() {
        println!("Maintainer: {}", binary.maintainer);
    }
    if !binary.section.is_empty() {
        println!("Section: {}", binary.section);
    }
    if !binary.priority.is_empty() {
        println!("Priority: {}", binary.priority);
    }
    if binary.essential {
        println!("Essential: yes");
    }
    if !binary.description.is_empty() {
        println!("Description: {}", binary.description);
    }
    for conffile in &binary.conffiles {
        println!("Conffile: {}", conffile.path);
    }
    if !pkg.triggers.pending.is_empty() {
        println!("Triggers-Pending: {}", pkg.triggers.pending.iter().cloned().collect::<Vec<_>>().join(" "));
    }
    if !pkg.triggers.awaited.is_empty() {
        println!("Triggers-Awaited: {}", pkg.triggers.awaited.iter().cloned().collect::<Vec<_>>().join(" "));
    }

    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("acquiring installation: {0}")]
    Installation(#[from] crate::installation::Error),
    #[error("engine: {0}")]
    Engine(#[from] crate::session::Error),
    #[error("resolving package: {0}")]
    Resolve(#[from] common::Error),
}
