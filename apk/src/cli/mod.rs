// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use clap::{Arg, ArgAction, Command};
use thiserror::Error;

mod add;
mod create;
mod del;
mod list;
mod version;

/// Global options shared by every applet
pub struct Context {
    pub root: String,
    pub repository: Option<String>,
    pub quiet: bool,
}

/// Generate the CLI command structure
fn command() -> Command {
    Command::new("apk")
        .about("Alpine-style package manager")
        .arg(
            Arg::new("version")
                .short('v')
                .long("version")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("root")
                .short('D')
                .long("directory")
                .global(true)
                .help("Root directory")
                .action(ArgAction::Set)
                .default_value("/"),
        )
        .arg(
            Arg::new("repository")
                .short('X')
                .long("repository")
                .global(true)
                .help("Additional repository URL")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .global(true)
                .help("Only print errors, with a progress dot per install")
                .action(ArgAction::SetTrue),
        )
        .arg_required_else_help(true)
        .subcommand(create::command())
        .subcommand(add::command())
        .subcommand(del::command())
        .subcommand(list::command())
        .subcommand(version::command())
}

/// Process all CLI arguments
pub fn process() -> Result<(), Error> {
    let matches = command().get_matches();
    if matches.get_flag("version") {
        version::print();
        return Ok(());
    }

    let context = Context {
        root: matches
            .get_one::<String>("root")
            .cloned()
            .unwrap_or_else(|| "/".into()),
        repository: matches.get_one::<String>("repository").cloned(),
        quiet: matches.get_flag("quiet"),
    };

    logging::init(context.quiet);

    match matches.subcommand() {
        Some(("create", args)) => create::handle(&context, args).map_err(Error::Create),
        Some(("add", args)) => add::handle(&context, args).map_err(Error::Add),
        Some(("del", args)) => del::handle(&context, args).map_err(Error::Del),
        Some(("list", args)) => list::handle(&context, args).map_err(Error::List),
        Some(("version", _)) => {
            version::print();
            Ok(())
        }
        _ => unreachable!(),
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("error handling create: {0}")]
    Create(#[from] create::Error),

    #[error("error handling add: {0}")]
    Add(#[from] add::Error),

    #[error("error handling del: {0}")]
    Del(#[from] del::Error),

    #[error("error handling list: {0}")]
    List(#[from] list::Error),
}

mod logging {
    use log::{Level, LevelFilter, Log, Metadata, Record};

    struct Logger {
        quiet: bool,
    }

    impl Log for Logger {
        fn enabled(&self, metadata: &Metadata<'_>) -> bool {
            !self.quiet || metadata.level() <= Level::Error
        }

        fn log(&self, record: &Record<'_>) {
            if !self.enabled(record.metadata()) {
                return;
            }
            match record.level() {
                Level::Error => eprintln!("ERROR: {}", record.args()),
                Level::Warn => eprintln!("WARNING: {}", record.args()),
                _ => println!("{}", record.args()),
            }
        }

        fn flush(&self) {}
    }

    pub fn init(quiet: bool) {
        let level = if std::env::var_os("APK_DEBUG").is_some() {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        };
        if log::set_boxed_logger(Box::new(Logger { quiet })).is_ok() {
            log::set_max_level(level);
        }
    }
}
