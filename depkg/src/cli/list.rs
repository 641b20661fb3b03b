// SPDX-License-Identifier: MPL-2.0

use clap::{arg, ArgMatches, Command};
use depkg_archive::ConfPolicy;
use thiserror::Error;

use crate::installation::Installation;
use crate::session::Engine;

use super::GlobalArgs;

pub fn command() -> Command {
    Command::new("list")
        .about("List known packages and their status")
        .arg(arg!([PATTERN] "only list packages whose name contains this substring").required(false))
}

pub fn handle(args: &ArgMatches, globals: &GlobalArgs) -> Result<(), Error> {
    let pattern = args.get_one::<String>("PATTERN").map(String::as_str);

    let installation = Installation::open(globals.root.clone(), globals.admin_dir.clone())?;
    let engine = Engine::open(installation, ConfPolicy::default())?;

    let mut rows: Vec<_> = engine
        .packages
        .iter()
        .filter(|p| pattern.map_or(true, |pat| p.name.contains(pat)))
        .collect();
    rows.sort_by(|a, b| (a.name.as_str(), a.architecture.as_str()).cmp(&(b.name.as_str(), b.architecture.as_str())));

    for pkg in rows {
        let version = pkg
            .installed
            .version
            .as_ref()
            .or(pkg.available.version.as_ref())
            .map(ToString::to_string)
            .unwrap_or_else(|| "<none>".to_string());
        println!("{:<3} {:<32} {:<10} {:<16} {}", pkg.want.as_str().chars().next().unwrap_or('?'), pkg.name, pkg.architecture, pkg.status.as_str(), version);
    }

    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("acquiring installation: {0}")]
    Installation(#[from] crate::installation::Error),
    #[error("engine: {0}")]
    Engine(#[from] crate::session::Error),
}
