// SPDX-License-Identifier: MPL-2.0

use clap::{arg, ArgMatches, Command};
use depkg_archive::ConfPolicy;
use thiserror::Error;

use crate::installation::Installation;
use crate::session::Engine;

use super::{common, GlobalArgs};

pub fn command() -> Command {
    Command::new("configure")
        .about("Run postinst on an already-unpacked package, completing its installation")
        .arg(arg!(<PACKAGE> "package name"))
        .arg(arg!(--architecture <ARCH> "architecture, if the package name is ambiguous").required(false))
}

pub fn handle(args: &ArgMatches, globals: &GlobalArgs) -> Result<(), Error> {
    let name = args.get_one::<String>("PACKAGE").expect("required");
    let explicit_arch = args.get_one::<String>("architecture").map(String::as_str);

    let installation = Installation::open(globals.root.clone(), globals.admin_dir.clone())?;
    let mut engine = Engine::open(installation, ConfPolicy::default())?;
    let architecture = common::resolve_architecture(&engine.packages, name, explicit_arch)?;

    engine.configure(name, &architecture)?;
    engine.process_triggers();

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

impl Error {
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Engine(_) => 1,
            _ => 2,
        }
    }
}
