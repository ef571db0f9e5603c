// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::io::{self, Write};

use thiserror::Error;

use crate::checksum::{self, Checksum};
use crate::dependency::{self, Dependency};

/// The metadata of a [`Package`](crate::Package), shared between
/// repository index entries and installed database records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    /// Package name
    pub name: String,
    /// Version string, compared with [`version::compare`](super::version::compare)
    pub version: String,
    /// Brief one line description
    pub description: String,
    /// Upstream homepage
    pub url: String,
    /// License identifier
    pub license: String,
    /// Architecture this was built for
    pub arch: String,
    /// Size of the package archive in bytes
    pub size: u64,
    /// Size of the installed payload in bytes
    pub installed_size: u64,
    /// Runtime dependencies
    pub depends: Vec<Dependency>,
    /// Content checksum of the archive; the package identity
    pub csum: Checksum,
}

impl Meta {
    /// Emit the shared `<letter>:<value>` index block
    pub fn write_index(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "P:{}", self.name)?;
        writeln!(out, "V:{}", self.version)?;
        if !self.description.is_empty() {
            writeln!(out, "T:{}", self.description)?;
        }
        if !self.url.is_empty() {
            writeln!(out, "U:{}", self.url)?;
        }
        if !self.license.is_empty() {
            writeln!(out, "L:{}", self.license)?;
        }
        if !self.arch.is_empty() {
            writeln!(out, "A:{}", self.arch)?;
        }
        writeln!(out, "S:{}", self.size)?;
        writeln!(out, "I:{}", self.installed_size)?;
        writeln!(out, "C:{}", self.csum)?;
        if !self.depends.is_empty() {
            let depends = self
                .depends
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(out, "D:{depends}")?;
        }
        Ok(())
    }
}

/// Accumulates index fields for one record until it is finalized
#[derive(Debug, Default)]
pub struct Builder {
    name: Option<String>,
    version: Option<String>,
    description: Option<String>,
    url: Option<String>,
    license: Option<String>,
    arch: Option<String>,
    size: Option<u64>,
    installed_size: Option<u64>,
    depends: Vec<Dependency>,
    csum: Option<Checksum>,
    seen: bool,
}

impl Builder {
    /// Apply one `<letter>:<value>` field. Returns false when the letter
    /// is not part of the shared index namespace, leaving it for the
    /// caller to interpret.
    pub fn set_field(&mut self, letter: char, value: &str) -> Result<bool, FieldError> {
        match letter {
            'P' => self.name = Some(value.to_owned()),
            'V' => self.version = Some(value.to_owned()),
            'T' => self.description = Some(value.to_owned()),
            'U' => self.url = Some(value.to_owned()),
            'L' => self.license = Some(value.to_owned()),
            'A' => self.arch = Some(value.to_owned()),
            'S' => self.size = Some(parse_size(value)?),
            'I' => self.installed_size = Some(parse_size(value)?),
            'C' => self.csum = Some(Checksum::from_hex(value)?),
            'D' => {
                self.depends = value
                    .split_whitespace()
                    .map(str::parse)
                    .collect::<Result<_, _>>()?;
            }
            _ => return Ok(false),
        }
        self.seen = true;
        Ok(true)
    }

    /// Whether any field has been applied yet
    pub fn is_empty(&self) -> bool {
        !self.seen
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Finalize into a [`Meta`]; name, version and checksum are mandatory
    pub fn build(self) -> Result<Meta, FieldError> {
        Ok(Meta {
            name: self.name.ok_or(FieldError::Missing('P'))?,
            version: self.version.ok_or(FieldError::Missing('V'))?,
            description: self.description.unwrap_or_default(),
            url: self.url.unwrap_or_default(),
            license: self.license.unwrap_or_default(),
            arch: self.arch.unwrap_or_default(),
            size: self.size.unwrap_or_default(),
            installed_size: self.installed_size.unwrap_or_default(),
            depends: self.depends,
            csum: self.csum.ok_or(FieldError::Missing('C'))?,
        })
    }
}

#[derive(Debug, Error)]
pub enum FieldError {
    #[error("invalid size value: {0}")]
    InvalidSize(String),

    #[error("invalid checksum: {0}")]
    InvalidChecksum(#[from] checksum::Error),

    #[error("invalid dependency: {0}")]
    InvalidDependency(#[from] dependency::ParseError),

    #[error("record missing '{0}' field")]
    Missing(char),
}

fn parse_size(value: &str) -> Result<u64, FieldError> {
    value
        .parse()
        .map_err(|_| FieldError::InvalidSize(value.to_owned()))
}
