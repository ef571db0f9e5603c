// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Package scripts and the external process runner.
//!
//! Scripts travel inside archives (`var/db/apk/<name>/<version>/<kind>`
//! for APK 1.0, `.INSTALL` for APK 2.0) and persist in the script store
//! between runs. Execution materializes the payload as an executable
//! temp file under the root and polices the exit status.

use std::fmt;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::process::Command;

use log::debug;
use thiserror::Error;

use crate::installation::Installation;

/// Kind of a package script. Discriminants are the script store
/// wire codes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::FromRepr,
)]
#[strum(serialize_all = "kebab-case")]
#[repr(u32)]
pub enum Kind {
    PreInstall = 0,
    PostInstall = 1,
    PreDeinstall = 2,
    PostDeinstall = 3,
    PreUpgrade = 4,
    PostUpgrade = 5,
    /// APK 2.0 `.INSTALL`, invoked at every phase with the phase name
    Generic = 6,
}

/// Executable payload attached to a package
#[derive(Clone, PartialEq, Eq)]
pub struct Script {
    pub kind: Kind,
    pub data: Vec<u8>,
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script")
            .field("kind", &self.kind)
            .field("size", &self.data.len())
            .finish()
    }
}

/// Run `script` for `phase` with the installation root as working
/// directory. Nonzero exit aborts the surrounding transition.
pub fn run(installation: &Installation, script: &Script, phase: Kind) -> Result<(), Error> {
    let mut file = tempfile::Builder::new()
        .prefix(".apk-script.")
        .tempfile_in(&installation.root)?;

    file.write_all(&script.data)?;
    file.as_file()
        .set_permissions(std::fs::Permissions::from_mode(0o755))?;

    debug!("running {} script for phase {phase}", script.kind);

    let status = Command::new(file.path())
        .arg(phase.to_string())
        .current_dir(&installation.root)
        .status()?;

    if !status.success() {
        return Err(Error::Failed {
            kind: script.kind,
            code: status.code().unwrap_or(-1),
        });
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{kind} script exited with status {code}")]
    Failed { kind: Kind, code: i32 },

    #[error("io: {0}")]
    Io(#[from] io::Error),
}
