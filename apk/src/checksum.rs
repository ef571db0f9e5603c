// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Content addressing for packages and installed files

use std::fmt;
use std::io::{self, Read};
use std::path::Path;

use fs_err as fs;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::environment;

/// Width of a content digest in bytes
pub const CHECKSUM_SIZE: usize = 32;

/// A fixed-width content digest. Doubles as the global identity
/// of a [`crate::Package`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum([u8; CHECKSUM_SIZE]);

impl Checksum {
    pub fn from_bytes(bytes: [u8; CHECKSUM_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(hex: &str) -> Result<Self, Error> {
        let bytes = hex::decode(hex)?;
        let bytes: [u8; CHECKSUM_SIZE] = bytes.try_into().map_err(|_| Error::Length)?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; CHECKSUM_SIZE] {
        &self.0
    }

    /// Digest everything remaining in `reader`
    pub fn of_reader(reader: &mut impl Read) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; environment::FILE_READ_BUFFER_SIZE];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(Self(hasher.finalize().into()))
    }

    /// Digest the contents of the file at `path`
    pub fn of_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let mut file = fs::File::open(path.as_ref())?;
        Self::of_reader(&mut file)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({self})")
    }
}

/// Read adapter digesting every byte that passes through it.
/// Wrapped around a raw package stream so the identity checksum
/// falls out of extraction without a second pass.
pub struct Digester<R> {
    inner: R,
    hasher: Sha256,
    count: u64,
}

impl<R: Read> Digester<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            count: 0,
        }
    }

    /// Consume the adapter, yielding the digest and the byte count
    pub fn finalize(self) -> (Checksum, u64) {
        (Checksum(self.hasher.finalize().into()), self.count)
    }
}

impl<R: Read> Read for Digester<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid checksum hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("checksum has wrong length")]
    Length,
}
