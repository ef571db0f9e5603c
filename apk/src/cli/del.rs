// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use clap::{Arg, ArgAction, ArgMatches, Command};
use log::warn;
use thiserror::Error;

use apk::client::{self, Client};

use super::Context;

pub fn command() -> Command {
    Command::new("del")
        .about("Remove packages from the world and commit")
        .arg(
            Arg::new("packages")
                .value_name("NAME")
                .action(ArgAction::Append)
                .required(true),
        )
}

pub fn handle(context: &Context, args: &ArgMatches) -> Result<(), Error> {
    let mut client = Client::open(&context.root, context.repository.as_deref(), context.quiet)?;

    for name in args.get_many::<String>("packages").into_iter().flatten() {
        if !client.world_del(name) {
            warn!("{name} is not in world");
        }
    }

    client.recalculate_and_commit()?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("client error: {0}")]
    Client(#[from] client::Error),
}
