// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use clap::{ArgMatches, Command};
use thiserror::Error;

use apk::client::{self, Client};

use super::Context;

pub fn command() -> Command {
    Command::new("list").about("List installed packages")
}

pub fn handle(context: &Context, _args: &ArgMatches) -> Result<(), Error> {
    let client = Client::open(&context.root, None, context.quiet)?;

    for &pkg in client.db.installed_order() {
        let meta = &client.db.package(pkg).meta;
        if meta.description.is_empty() {
            println!("{}-{}", meta.name, meta.version);
        } else {
            println!("{}-{} - {}", meta.name, meta.version, meta.description);
        }
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("client error: {0}")]
    Client(#[from] client::Error),
}
