// SPDX-License-Identifier: MPL-2.0

mod archive_dir;
mod cli;
mod force;
mod installation;
mod session;

use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match cli::process() {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            log::error!("{e}");
            match e.exit_code() {
                1 => ExitCode::from(1),
                _ => ExitCode::from(2),
            }
        }
    }
}
