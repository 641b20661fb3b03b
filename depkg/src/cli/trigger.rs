// SPDX-License-Identifier: MPL-2.0

use clap::{arg, Arg, ArgAction, ArgMatches, Command};
use depkg_archive::ConfPolicy;
use depkg_db::Status;
use thiserror::Error;

use crate::installation::Installation;
use crate::session::Engine;

use super::GlobalArgs;

pub fn command() -> Command {
    Command::new("trigger")
        .about("Explicit trigger activation and deferred trigger processing")
        .subcommand_required(true)
        .subcommand(
            Command::new("activate")
                .about("Explicitly activate a named trigger for every package interested in it")
                .arg(arg!(<NAME> "trigger name"))
                .arg(
                    Arg::new("ARGS")
                        .help("arguments passed to interested packages' postinst triggered")
                        .action(ArgAction::Append)
                        .num_args(0..),
                ),
        )
        .subcommand(Command::new("process").about("Run one deferred trigger-processing pass (--triggers-only)"))
}

pub fn handle(args: &ArgMatches, globals: &GlobalArgs) -> Result<(), Error> {
    let installation = Installation::open(globals.root.clone(), globals.admin_dir.clone())?;
    let mut engine = Engine::open(installation, ConfPolicy::default())?;

    match args.subcommand() {
        Some(("activate", sub)) => {
            let name = sub.get_one::<String>("NAME").expect("required");
            let trigger_args: Vec<String> = sub.get_many::<String>("ARGS").map(|v| v.cloned().collect()).unwrap_or_default();

            let activated = engine.triggers.activate_explicit(name, &trigger_args);
            let admin_dir = engine.installation.admin_dir.clone();
            for package in activated {
                let architectures: Vec<String> = engine.packages.by_name(&package).map(|p| p.architecture.clone()).collect();
                for architecture in architectures {
                    if let Some(pkg) = engine.packages.get_mut(&package, &architecture) {
                        if pkg.status == Status::Installed {
                            pkg.status = Status::TriggersPending;
                        }
                    }
                    engine.packages.record_update(&admin_dir, &package, &architecture)?;
                }
            }
            engine.packages.merge(&admin_dir)?;
        }
        Some(("process", _)) => {
            engine.process_triggers();
        }
        _ => unreachable!("clap requires a subcommand"),
    }

    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("acquiring installation: {0}")]
    Installation(#[from] crate::installation::Error),
    #[error("engine: {0}")]
    Engine(#[from] crate::session::Error),
    #[error("database: {0}")]
    Db(#[from] depkg_db::Error),
}

impl Error {
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Engine(_) => 1,
            _ => 2,
        }
    }
}
