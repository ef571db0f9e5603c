// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use clap::{Arg, ArgAction, ArgMatches, Command};
use thiserror::Error;

use apk::client::{self, Client};
use apk::dependency::{self, Dependency};

use super::Context;

pub fn command() -> Command {
    Command::new("add")
        .about("Add packages to the world and commit")
        .arg(
            Arg::new("packages")
                .value_name("PACKAGE")
                .help("Package names (optionally constrained) or local .apk files")
                .action(ArgAction::Append)
                .required(true),
        )
}

pub fn handle(context: &Context, args: &ArgMatches) -> Result<(), Error> {
    let mut client = Client::open(&context.root, context.repository.as_deref(), context.quiet)?;

    for package in args.get_many::<String>("packages").into_iter().flatten() {
        if package.ends_with(".apk") {
            let pkg = client.add_local_package(package)?;
            let name = client.db.package(pkg).meta.name.clone();
            client.world_add(Dependency::unversioned(name));
        } else {
            client.world_add(package.parse()?);
        }
    }

    client.recalculate_and_commit()?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("client error: {0}")]
    Client(#[from] client::Error),

    #[error("invalid package spec: {0}")]
    Dependency(#[from] dependency::ParseError),
}
