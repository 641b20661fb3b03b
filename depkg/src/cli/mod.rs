// SPDX-License-Identifier: MPL-2.0

use std::path::PathBuf;

use clap::{Arg, ArgAction, Command};
use thiserror::Error;

mod common;
mod configure;
mod list;
mod purge;
mod remove;
mod show;
mod trigger;
mod unpack;

/// Generate the CLI command structure.
fn command() -> Command {
    Command::new("depkg")
        .about("Package installation engine")
        .arg(
            Arg::new("admindir")
                .short('D')
                .long("admindir")
                .global(true)
                .help("Administrative directory (defaults to DPKG_ADMINDIR or <root>/var/lib/dpkg)")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("root")
                .long("root")
                .global(true)
                .help("Installation root directory")
                .action(ArgAction::Set)
                .default_value("/"),
        )
        .arg_required_else_help(true)
        .subcommand(unpack::command())
        .subcommand(configure::command())
        .subcommand(remove::command())
        .subcommand(purge::command())
        .subcommand(trigger::command())
        .subcommand(list::command())
        .subcommand(show::command())
}

pub struct GlobalArgs {
    pub root: PathBuf,
    pub admin_dir: Option<PathBuf>,
}

/// Process all CLI arguments, returning the process's final
/// disposition (§6: exit codes 0/1/2).
pub fn process() -> Result<(), Error> {
    let matches = command().get_matches();
    let globals = GlobalArgs {
        root: PathBuf::from(matches.get_one::<String>("root").expect("has default")),
        admin_dir: matches.get_one::<String>("admindir").map(PathBuf::from),
    };

    match matches.subcommand() {
        Some(("unpack", args)) => unpack::handle(args, &globals).map_err(Error::Unpack),
        Some(("configure", args)) => configure::handle(args, &globals).map_err(Error::Configure),
        Some(("remove", args)) => remove::handle(args, &globals).map_err(Error::Remove),
        Some(("purge", args)) => purge::handle(args, &globals).map_err(Error::Purge),
        Some(("trigger", args)) => trigger::handle(args, &globals).map_err(Error::Trigger),
        Some(("list", args)) => list::handle(args, &globals).map_err(Error::List),
        Some(("show", args)) => show::handle(args, &globals).map_err(Error::Show),
        _ => unreachable!("clap requires a subcommand"),
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("unpack: {0}")]
    Unpack(#[from] unpack::Error),
    #[error("configure: {0}")]
    Configure(#[from] configure::Error),
    #[error("remove: {0}")]
    Remove(#[from] remove::Error),
    #[error("purge: {0}")]
    Purge(#[from] purge::Error),
    #[error("trigger: {0}")]
    Trigger(#[from] trigger::Error),
    #[error("list: {0}")]
    List(#[from] list::Error),
    #[error("show: {0}")]
    Show(#[from] show::Error),
}

impl Error {
    /// Maps to §6's process exit codes: 1 for a requested action that
    /// failed cleanly, 2 for anything that prevented the engine from
    /// proceeding at all (lock contention, malformed admin directory).
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Unpack(e) => e.exit_code(),
            Error::Configure(e) => e.exit_code(),
            Error::Remove(e) => e.exit_code(),
            Error::Purge(e) => e.exit_code(),
            Error::Trigger(e) => e.exit_code(),
            Error::List(_) | Error::Show(_) => 2,
        }
    }
}
