// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The on-disk script store: a concatenation of
//! `digest | u32 kind | u32 size | payload` records, little endian,
//! keyed by package content checksum.

use std::io::{self, Read, Write};

use thiserror::Error;

use crate::checksum::{Checksum, CHECKSUM_SIZE};
use crate::script::{Kind, Script};

use super::Database;

/// Load a script blob, attaching payloads to the packages they
/// address. Records for unknown checksums are skipped.
pub fn read(db: &mut Database, input: &mut impl Read) -> Result<(), Error> {
    loop {
        let mut digest = [0u8; CHECKSUM_SIZE];
        if !fill_or_eof(input, &mut digest)? {
            break;
        }

        let mut word = [0u8; 4];
        input.read_exact(&mut word)?;
        let kind = u32::from_le_bytes(word);
        input.read_exact(&mut word)?;
        let size = u32::from_le_bytes(word) as u64;

        let kind = Kind::from_repr(kind).ok_or(Error::UnknownKind(kind))?;
        let csum = Checksum::from_bytes(digest);

        match db.package_by_csum(&csum) {
            Some(pkg) => {
                let mut data = vec![0u8; size as usize];
                input.read_exact(&mut data)?;
                db.package_mut(pkg).scripts.push(Script { kind, data });
            }
            None => {
                let skipped = io::copy(&mut (&mut *input).take(size), &mut io::sink())?;
                if skipped != size {
                    return Err(Error::Truncated);
                }
            }
        }
    }
    Ok(())
}

/// Serialize every installed package's scripts
pub fn write(db: &Database, out: &mut impl Write) -> io::Result<()> {
    for &pkg_id in db.installed_order() {
        let pkg = db.package(pkg_id);
        for script in &pkg.scripts {
            out.write_all(pkg.meta.csum.as_bytes())?;
            out.write_all(&(script.kind as u32).to_le_bytes())?;
            out.write_all(&(script.data.len() as u32).to_le_bytes())?;
            out.write_all(&script.data)?;
        }
    }
    Ok(())
}

/// Fill `buf` completely, or report a clean end of input when no byte
/// was available
fn fill_or_eof(input: &mut impl Read, buf: &mut [u8]) -> Result<bool, Error> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = input.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(Error::Truncated);
        }
        filled += n;
    }
    Ok(true)
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("unknown script kind {0}")]
    UnknownKind(u32),

    #[error("truncated script store")]
    Truncated,
}
