// SPDX-License-Identifier: MPL-2.0

use std::fs;
use std::path::PathBuf;

use clap::{arg, ArgMatches, Command};
use depkg_archive::{ArchiveReader, ConfPolicy, UnpackRequest};
use depkg_control::StanzaReader;
use thiserror::Error;

use crate::archive_dir::DirectoryArchive;
use crate::force::ForcePolicy;
use crate::installation::Installation;
use crate::session::Engine;

use super::GlobalArgs;

pub fn command() -> Command {
    Command::new("unpack")
        .about("Unpack a package's already-extracted control and data trees")
        .arg(arg!(<CONTROL> "path to the package's control stanza file"))
        .arg(arg!(<DATA> "path to the package's extracted data tree"))
        .arg(arg!(--configure "run postinst immediately (equivalent to --install)").action(clap::ArgAction::SetTrue))
}

pub fn handle(args: &ArgMatches, globals: &GlobalArgs) -> Result<(), Error> {
    let control_path = PathBuf::from(args.get_one::<String>("CONTROL").expect("required"));
    let data_path = PathBuf::from(args.get_one::<String>("DATA").expect("required"));
    let configure = args.get_flag("configure");

    let text = fs::read_to_string(&control_path).map_err(|e| Error::Io(control_path.clone(), e))?;
    let mut reader = StanzaReader::new(std::io::Cursor::new(text.as_bytes()));
    let stanza = reader.next_stanza()?.ok_or(Error::EmptyControlFile(control_path.clone()))?;
    let package = depkg_db::stanza::package_from_available_stanza(&stanza)?;

    let mut archive = DirectoryArchive::new(&data_path);
    let entries = archive.entries()?;

    let installation = Installation::open(globals.root.clone(), globals.admin_dir.clone())?;
    let mut engine = Engine::open(installation, ConfPolicy::default())?;
    let force = ForcePolicy::from_env();
    engine.unpack(UnpackRequest { package, entries, configure }, &force)?;

    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("reading {0:?}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("{0:?} has no control stanza")]
    EmptyControlFile(PathBuf),
    #[error("parsing control stanza: {0}")]
    Control(#[from] depkg_control::Error),
    #[error("converting control stanza: {0}")]
    Stanza(#[from] depkg_db::stanza::Error),
    #[error("walking data tree: {0}")]
    Walk(#[from] crate::archive_dir::Error),
    #[error("acquiring installation: {0}")]
    Installation(#[from] crate::installation::Error),
    #[error("engine: {0}")]
    Engine(#[from] crate::session::Error),
}

impl Error {
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Engine(crate::session::Error::Pipeline(_)) => 1,
            _ => 2,
        }
    }
}
