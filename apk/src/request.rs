// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::io::{self, Read};
use std::sync::OnceLock;

use fs_err as fs;
use thiserror::Error;

/// Shared client for tcp socket reuse
static CLIENT: OnceLock<reqwest::blocking::Client> = OnceLock::new();

fn client() -> &'static reqwest::blocking::Client {
    CLIENT.get_or_init(|| {
        reqwest::blocking::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("build http client")
    })
}

/// Open a byte stream for `uri`: http(s) URLs through the shared
/// client, anything else as a local file path.
pub fn open(uri: &str) -> Result<Box<dyn Read>, Error> {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        let response = client().get(uri).send()?.error_for_status()?;
        Ok(Box::new(response))
    } else {
        Ok(Box::new(fs::File::open(uri)?))
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("io: {0}")]
    Io(#[from] io::Error),
}
