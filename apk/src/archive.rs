// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Streamed iteration over package archives (gzipped tarballs)

use std::io::{self, Read};

use flate2::read::GzDecoder;
use thiserror::Error;

/// Metadata of one archive entry
#[derive(Debug, Clone)]
pub struct Entry {
    /// Path relative to the root, `./` prefix stripped
    pub path: String,
    pub kind: EntryKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Payload size in bytes
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Symlink(String),
    /// Device nodes, fifos, pax headers.. skipped by the engine
    Other,
}

/// Walk a gzipped tar stream, handing each entry and its payload
/// stream to `visit`. The raw reader is returned once the archive is
/// exhausted so callers can drain it and finalize a stream checksum.
pub fn walk<R, E, F>(reader: R, mut visit: F) -> Result<R, E>
where
    R: Read,
    E: From<Error>,
    F: FnMut(&Entry, &mut dyn Read) -> Result<(), E>,
{
    let mut archive = tar::Archive::new(GzDecoder::new(reader));

    {
        let entries = archive.entries().map_err(|e| E::from(Error::Io(e)))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| E::from(Error::Io(e)))?;
            let meta = entry_meta(&entry).map_err(E::from)?;
            visit(&meta, &mut entry)?;
        }
    }

    Ok(archive.into_inner().into_inner())
}

fn entry_meta<R: Read>(entry: &tar::Entry<'_, R>) -> Result<Entry, Error> {
    let header = entry.header();

    let path = entry.path()?.to_string_lossy().into_owned();
    let path = path.trim_start_matches("./").to_owned();

    let kind = match header.entry_type() {
        tar::EntryType::Directory => EntryKind::Directory,
        tar::EntryType::Regular | tar::EntryType::Continuous | tar::EntryType::GNUSparse => {
            EntryKind::File
        }
        tar::EntryType::Symlink => {
            let target = entry
                .link_name()?
                .ok_or_else(|| Error::Malformed(format!("symlink {path} without target")))?;
            EntryKind::Symlink(target.to_string_lossy().into_owned())
        }
        _ => EntryKind::Other,
    };

    Ok(Entry {
        path,
        kind,
        mode: header.mode()?,
        uid: header.uid()? as u32,
        gid: header.gid()? as u32,
        size: header.size()?,
    })
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("malformed archive entry: {0}")]
    Malformed(String),
}
