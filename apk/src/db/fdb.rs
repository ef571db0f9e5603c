// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Reader and writer for the line-oriented front database.
//!
//! Every line is `<letter>:<value>`; anything shorter, or without the
//! `:` in second position, terminates the current record. The index
//! letters (`P V T U L A S I C D`) are shared with repository indexes;
//! the file-section letters (`F M R Z`) only appear in the installed
//! database and rebuild the ownership graph on load.

use std::io::{self, BufRead, Write};

use thiserror::Error;

use crate::checksum::{self, Checksum};
use crate::package::meta;

use super::{Database, DirId};

/// Which database a stream is being loaded into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The installed database; file sections attach ownership
    Installed,
    /// A repository index feeding the given slot
    Repository(usize),
}

/// One `F:` block and the files declared beneath it
#[derive(Debug)]
struct DirBlock {
    path: String,
    /// uid, gid, mode from an `M:` line
    meta: Option<(u32, u32, u32)>,
    /// basename and optional `Z:` digest, in declaration order
    files: Vec<(String, Option<Checksum>)>,
}

#[derive(Debug, Default)]
struct Record {
    meta: meta::Builder,
    dirs: Vec<DirBlock>,
}

/// Streaming parser rebuilding packages (and, for the installed
/// database, the file ownership graph) from an FDB stream
pub struct Reader<'a> {
    db: &'a mut Database,
    source: Source,
    record: Option<Record>,
}

impl<'a> Reader<'a> {
    pub fn new(db: &'a mut Database, source: Source) -> Self {
        Self {
            db,
            source,
            record: None,
        }
    }

    /// Consume `input` to exhaustion
    pub fn load(mut self, input: impl BufRead) -> Result<(), Error> {
        for line in input.lines() {
            self.line(&line?)?;
        }
        // end of input finalizes a pending record
        self.finalize_record()
    }

    fn line(&mut self, line: &str) -> Result<(), Error> {
        let bytes = line.as_bytes();
        if bytes.len() < 2 || bytes[1] != b':' {
            return self.finalize_record();
        }

        let letter = bytes[0] as char;
        let value = &line[2..];

        // any field line before a package exists begins a new record
        let record = self.record.get_or_insert_with(Record::default);

        if record.meta.set_field(letter, value)? {
            return Ok(());
        }

        match (self.source, letter) {
            (Source::Installed, 'F') => {
                if record.meta.name().is_none() {
                    return Err(Error::FileSectionBeforeName);
                }
                record.dirs.push(DirBlock {
                    path: value.to_owned(),
                    meta: None,
                    files: Vec::new(),
                });
            }
            (Source::Installed, 'M') => {
                let block = record
                    .dirs
                    .last_mut()
                    .ok_or(Error::OrphanDirectoryField('M'))?;
                block.meta = Some(parse_dir_meta(value)?);
            }
            (Source::Installed, 'R') => {
                let block = record
                    .dirs
                    .last_mut()
                    .ok_or(Error::OrphanDirectoryField('R'))?;
                block.files.push((value.to_owned(), None));
            }
            (Source::Installed, 'Z') => {
                let file = record
                    .dirs
                    .last_mut()
                    .and_then(|block| block.files.last_mut())
                    .ok_or(Error::OrphanChecksum)?;
                file.1 = Some(Checksum::from_hex(value)?);
            }
            (_, letter) => return Err(Error::UnknownField(letter)),
        }

        Ok(())
    }

    fn finalize_record(&mut self) -> Result<(), Error> {
        let Some(record) = self.record.take() else {
            return Ok(());
        };
        if record.meta.is_empty() {
            return Ok(());
        }

        let meta = record.meta.build()?;
        let repo = match self.source {
            Source::Installed => None,
            Source::Repository(slot) => Some(slot),
        };

        let (pkg, existing) = self.db.add_pkg(meta, repo, None);

        if self.source == Source::Installed {
            // two complete installed records for one content address
            if existing {
                return Err(Error::DuplicatePackage);
            }
            self.db.mark_installed(pkg);

            for block in record.dirs {
                let dir = self.db.dir_get(&block.path);
                if let Some((uid, gid, mode)) = block.meta {
                    let dir = self.db.dir_mut(dir);
                    dir.uid = uid;
                    dir.gid = gid;
                    dir.mode = mode;
                }
                for (basename, csum) in block.files {
                    let file = self.db.file_get(dir, &basename);
                    // loading never touches the disk
                    self.db.set_owner(file, pkg, None);
                    self.db.file_mut(file).csum = csum;
                }
            }
        }

        Ok(())
    }
}

/// `uid:gid:octal_mode`
fn parse_dir_meta(value: &str) -> Result<(u32, u32, u32), Error> {
    let mut parts = value.split(':');
    let (Some(uid), Some(gid), Some(mode), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::MalformedDirectoryMeta(value.to_owned()));
    };

    let uid = uid.parse().map_err(|_| Error::MalformedDirectoryMeta(value.to_owned()))?;
    let gid = gid.parse().map_err(|_| Error::MalformedDirectoryMeta(value.to_owned()))?;
    let mode = u32::from_str_radix(mode, 8)
        .map_err(|_| Error::MalformedDirectoryMeta(value.to_owned()))?;

    Ok((uid, gid, mode))
}

/// Serialize the installed database in installation order
pub fn write(db: &Database, out: &mut impl Write) -> io::Result<()> {
    for &pkg_id in db.installed_order() {
        let pkg = db.package(pkg_id);
        pkg.meta.write_index(out)?;

        let mut last_dir: Option<DirId> = None;
        for &file_id in &pkg.files {
            let file = db.file(file_id);
            if file.owner != Some(pkg_id) {
                continue;
            }
            // files arrive grouped by directory, so a change of
            // directory opens a new F/M block
            if last_dir != Some(file.dir) {
                let dir = db.dir(file.dir);
                writeln!(out, "F:{}", dir.dirname)?;
                writeln!(out, "M:{}:{}:{:o}", dir.uid, dir.gid, dir.mode)?;
                last_dir = Some(file.dir);
            }
            writeln!(out, "R:{}", file.name)?;
            if let Some(csum) = &file.csum {
                writeln!(out, "Z:{csum}")?;
            }
        }

        writeln!(out)?;
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Field(#[from] meta::FieldError),

    #[error("file section before package name")]
    FileSectionBeforeName,

    #[error("'{0}' field outside a directory section")]
    OrphanDirectoryField(char),

    #[error("'Z' field without a preceding file")]
    OrphanChecksum,

    #[error("malformed directory metadata: {0}")]
    MalformedDirectoryMeta(String),

    #[error("invalid file checksum: {0}")]
    InvalidChecksum(#[from] checksum::Error),

    #[error("unsupported field '{0}'")]
    UnknownField(char),

    #[error("duplicate package record")]
    DuplicatePackage,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db::DirFlags;

    const SAMPLE: &str = "\
P:busybox
V:1.36.1-r0
T:Size optimized toolbox
S:1024
I:4096
C:0101010101010101010101010101010101010101010101010101010101010101
F:bin
M:0:0:755
R:busybox
Z:0202020202020202020202020202020202020202020202020202020202020202
F:etc
M:0:0:755
R:busybox.conf

P:musl
V:1.2.4-r2
S:512
I:2048
C:0303030303030303030303030303030303030303030303030303030303030303
D:busybox>=1
F:lib
M:0:0:755
R:ld-musl-x86_64.so.1
Z:0404040404040404040404040404040404040404040404040404040404040404
";

    fn load_installed(input: &str) -> Result<Database, Error> {
        let mut db = Database::new();
        Reader::new(&mut db, Source::Installed).load(input.as_bytes())?;
        Ok(db)
    }

    #[test]
    fn loads_installed_database() {
        let db = load_installed(SAMPLE).unwrap();

        // two packages, root + bin + etc + lib, three files
        assert_eq!(db.stats().packages, 2);
        assert_eq!(db.stats().dirs, 4);
        assert_eq!(db.stats().files, 3);

        let busybox = db.installed_order()[0];
        let pkg = db.package(busybox);
        assert_eq!(pkg.meta.name, "busybox");
        assert_eq!(pkg.meta.version, "1.36.1-r0");
        assert_eq!(pkg.meta.installed_size, 4096);
        assert!(pkg.is_installed());
        assert_eq!(pkg.files.len(), 2);

        let file = db.file(pkg.files[0]);
        assert_eq!(db.file_path(pkg.files[0]), "bin/busybox");
        assert_eq!(
            file.csum.unwrap().to_string(),
            "0202020202020202020202020202020202020202020202020202020202020202"
        );
        // no Z line leaves the checksum unknown
        assert_eq!(db.file(pkg.files[1]).csum, None);

        let bin = db.dir_lookup("bin").unwrap();
        assert_eq!(db.dir(bin).mode, 0o755);

        let musl = db.installed_order()[1];
        assert_eq!(db.package(musl).meta.depends.len(), 1);

        db.assert_consistent();
    }

    #[test]
    fn round_trips() {
        let db = load_installed(SAMPLE).unwrap();

        let mut first = Vec::new();
        write(&db, &mut first).unwrap();

        let reloaded = load_installed(std::str::from_utf8(&first).unwrap()).unwrap();
        let mut second = Vec::new();
        write(&reloaded, &mut second).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn loads_repository_index() {
        let index = "\
P:busybox
V:1.36.1-r0
S:1024
I:4096
C:0101010101010101010101010101010101010101010101010101010101010101

P:musl
V:1.2.4-r2
S:512
I:2048
C:0303030303030303030303030303030303030303030303030303030303030303
";

        let mut db = Database::new();
        Reader::new(&mut db, Source::Repository(0))
            .load(index.as_bytes())
            .unwrap();
        Reader::new(&mut db, Source::Repository(3))
            .load(index.as_bytes())
            .unwrap();

        // nothing installed, repo bits OR-ed across slots
        assert_eq!(db.stats().packages, 0);
        let name = db.name_lookup("busybox").unwrap();
        let pkg = db.name(name).pkgs[0];
        assert_eq!(db.package(pkg).repos, 0b1001);
    }

    #[test]
    fn installed_bits_survive_index_load() {
        let mut db = load_installed(SAMPLE).unwrap();

        let index = "\
P:busybox
V:1.36.1-r0
S:1024
I:4096
C:0101010101010101010101010101010101010101010101010101010101010101
";
        Reader::new(&mut db, Source::Repository(0))
            .load(index.as_bytes())
            .unwrap();

        let busybox = db.installed_order()[0];
        assert!(db.package(busybox).is_installed());
        assert_eq!(db.package(busybox).repos, 1);
        assert_eq!(db.stats().packages, 2);
    }

    #[test]
    fn duplicate_installed_record_is_fatal() {
        let duplicated = format!("{SAMPLE}\n{SAMPLE}");
        assert!(matches!(
            load_installed(&duplicated),
            Err(Error::DuplicatePackage)
        ));
    }

    #[test]
    fn ordering_violations_are_fatal() {
        assert!(matches!(
            load_installed("F:usr/bin\n"),
            Err(Error::FileSectionBeforeName)
        ));
        assert!(matches!(
            load_installed("P:foo\nM:0:0:755\n"),
            Err(Error::OrphanDirectoryField('M'))
        ));
        assert!(matches!(
            load_installed("P:foo\nR:foo\n"),
            Err(Error::OrphanDirectoryField('R'))
        ));
        assert!(matches!(
            load_installed("P:foo\nF:usr\nZ:01\n"),
            Err(Error::OrphanChecksum)
        ));
    }

    #[test]
    fn unknown_letters_are_fatal() {
        assert!(matches!(
            load_installed("P:foo\nQ:nope\n"),
            Err(Error::UnknownField('Q'))
        ));

        // file sections never belong in a repository index
        let mut db = Database::new();
        let result = Reader::new(&mut db, Source::Repository(0)).load("P:foo\nF:usr\n".as_bytes());
        assert!(matches!(result, Err(Error::UnknownField('F'))));
    }

    #[test]
    fn malformed_values_are_fatal() {
        assert!(matches!(
            load_installed("P:foo\nV:1\nC:zz\n"),
            Err(Error::Field(_))
        ));
        assert!(matches!(
            load_installed("P:foo\nF:etc\nM:0:0\n"),
            Err(Error::MalformedDirectoryMeta(_))
        ));
        assert!(matches!(
            load_installed("P:foo\nF:etc\nM:0:0:9x9\n"),
            Err(Error::MalformedDirectoryMeta(_))
        ));
    }

    #[test]
    fn record_missing_identity_is_fatal() {
        assert!(matches!(
            load_installed("P:foo\nV:1.0\n\n"),
            Err(Error::Field(meta::FieldError::Missing('C')))
        ));
        // a record with only ancillary fields is still a record
        assert!(matches!(
            load_installed("S:10\n\n"),
            Err(Error::Field(meta::FieldError::Missing('P')))
        ));
    }

    #[test]
    fn protected_flag_set_during_load() {
        let db = load_installed(SAMPLE).unwrap();
        let etc = db.dir_lookup("etc").unwrap();
        assert!(db.dir(etc).flags.contains(DirFlags::PROTECTED));
    }

    #[test]
    fn blank_lines_between_records_are_tolerated() {
        let spaced = SAMPLE.replace("\nP:musl", "\n\n\nP:musl");
        let db = load_installed(&spaced).unwrap();
        assert_eq!(db.stats().packages, 2);
    }
}
