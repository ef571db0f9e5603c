// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use clap::{ArgMatches, Command};
use thiserror::Error;

use apk::client::{self, Client};

use super::Context;

pub fn command() -> Command {
    Command::new("create").about("Initialize an empty root filesystem")
}

pub fn handle(context: &Context, _args: &ArgMatches) -> Result<(), Error> {
    Client::create(&context.root)?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("client error: {0}")]
    Client(#[from] client::Error),
}
