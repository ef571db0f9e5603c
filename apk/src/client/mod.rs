// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The client façade binding a root filesystem to its in-memory
//! database: open and create roots, load state, register
//! repositories, commit resolved transactions and write state back.

use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use fs_err as fs;
use log::debug;
use thiserror::Error;

use crate::archive::{self, EntryKind};
use crate::checksum::Digester;
use crate::db::{self, fdb, scripts, Database};
use crate::dependency::{self, Dependency};
use crate::environment;
use crate::installation::{self, Installation};
use crate::package::{self, Meta};
use crate::repository::Repository;
use crate::request;
use crate::transaction;

pub mod install;

#[derive(Debug)]
pub struct Client {
    pub installation: Installation,
    pub db: Database,
    quiet: bool,
}

impl Client {
    /// Initialize a fresh root skeleton
    pub fn create(root: impl Into<PathBuf>) -> Result<(), Error> {
        Installation::create(root)?;
        Ok(())
    }

    /// Open `root`, loading world, installed state, scripts and the
    /// configured repositories
    pub fn open(
        root: impl Into<PathBuf>,
        repository_override: Option<&str>,
        quiet: bool,
    ) -> Result<Self, Error> {
        let installation = Installation::open(root)?;
        let mut client = Self {
            installation,
            db: Database::new(),
            quiet,
        };

        client.read_state()?;
        client.read_repositories()?;
        if let Some(url) = repository_override {
            client.add_repository(url)?;
        }

        Ok(client)
    }

    fn read_state(&mut self) -> Result<(), Error> {
        match fs::read_to_string(self.installation.world_path()) {
            Ok(world) => self.db.set_world(dependency::parse_world(&world)?),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => return Err(error.into()),
        }

        match fs::File::open(self.installation.installed_db_path()) {
            Ok(file) => fdb::Reader::new(&mut self.db, fdb::Source::Installed)
                .load(BufReader::new(file))
                .map_err(Error::InstalledLoad)?,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => return Err(error.into()),
        }

        match fs::File::open(self.installation.scripts_path()) {
            Ok(file) => scripts::read(&mut self.db, &mut BufReader::new(file))?,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => return Err(error.into()),
        }

        Ok(())
    }

    fn read_repositories(&mut self) -> Result<(), Error> {
        let content = match fs::read_to_string(self.installation.repositories_path()) {
            Ok(content) => content,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(error) => return Err(error.into()),
        };

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            self.add_repository(line)?;
        }
        Ok(())
    }

    /// Claim a repository slot and load `<url>/APK_INDEX.gz` into it
    pub fn add_repository(&mut self, url: &str) -> Result<usize, Error> {
        let slot = self.db.add_repository(Repository::new(url))?;
        let index_url = self.db.repositories()[slot].index_url();

        debug!("loading index {index_url}");
        let stream = request::open(&index_url)?;
        fdb::Reader::new(&mut self.db, fdb::Source::Repository(slot))
            .load(BufReader::new(GzDecoder::new(stream)))?;

        Ok(slot)
    }

    /// Register a local archive, deriving identity from its metadata
    /// entries and content checksum from the stream
    pub fn add_local_package(&mut self, path: impl AsRef<Path>) -> Result<package::Id, Error> {
        let path = path.as_ref();
        let file = fs::File::open(path)?;

        let mut identity: Option<(String, String)> = None;
        let mut installed_size = 0;

        let mut raw = archive::walk(Digester::new(file), |entry, _payload| -> Result<(), Error> {
            if identity.is_none() {
                if let Some(rest) = entry.path.strip_prefix("var/db/apk/") {
                    let mut parts = rest.split('/');
                    if let (Some(name), Some(version)) = (parts.next(), parts.next()) {
                        if !name.is_empty() && !version.is_empty() {
                            identity = Some((name.to_owned(), version.to_owned()));
                        }
                    }
                }
            }
            if entry.kind == EntryKind::File {
                installed_size += entry.size;
            }
            Ok(())
        })?;

        io::copy(&mut raw, &mut io::sink())?;
        let (csum, size) = raw.finalize();

        let Some((name, version)) = identity else {
            return Err(Error::MalformedPackage(path.to_path_buf()));
        };

        let meta = Meta {
            name,
            version,
            description: String::new(),
            url: String::new(),
            license: String::new(),
            arch: String::new(),
            size,
            installed_size,
            depends: Vec::new(),
            csum,
        };
        let (pkg, _) = self.db.add_pkg(meta, None, None);
        // a local archive always becomes the preferred source
        self.db.package_mut(pkg).filename = Some(path.to_path_buf());

        Ok(pkg)
    }

    /// Apply one package transition through the engine
    pub fn install_pkg(
        &mut self,
        old: Option<package::Id>,
        new: Option<package::Id>,
    ) -> Result<(), Error> {
        install::install_pkg(&mut self.db, &self.installation, old, new)?;
        Ok(())
    }

    /// Resolve world, commit the changes, persist the configuration
    /// and report the installed totals
    pub fn recalculate_and_commit(&mut self) -> Result<(), Error> {
        let tx = transaction::plan(&self.db)?;

        let mut progressed = false;
        for change in &tx.changes {
            let (old, new) = change.as_transition();
            self.install_pkg(old, new)?;
            if self.quiet && new.is_some() {
                print!(".");
                let _ = io::stdout().flush();
                progressed = true;
            }
        }
        if progressed {
            println!();
        }

        self.write_config()?;

        let stats = self.db.stats();
        if !self.quiet {
            println!(
                "OK: {} packages, {} dirs, {} files",
                stats.packages, stats.dirs, stats.files
            );
        }
        Ok(())
    }

    /// Serialize world, installed database and scripts to their
    /// canonical locations, atomically per file
    pub fn write_config(&self) -> Result<(), Error> {
        let world = dependency::format_world(self.db.world());
        self.installation
            .write_config(environment::WORLD_FILE, world.as_bytes())?;

        let mut installed = Vec::new();
        fdb::write(&self.db, &mut installed)?;
        self.installation
            .write_config(environment::INSTALLED_DB_FILE, &installed)?;

        let mut blob = Vec::new();
        scripts::write(&self.db, &mut blob)?;
        self.installation
            .write_config(environment::SCRIPTS_FILE, &blob)?;

        Ok(())
    }

    /// Persist state and release the root
    pub fn close(self) -> Result<(), Error> {
        self.write_config()
    }

    /// Merge a dependency into world
    pub fn world_add(&mut self, dep: Dependency) {
        self.db.world_add(dep);
    }

    /// Drop a name from world; returns whether it was present
    pub fn world_del(&mut self, name: &str) -> bool {
        self.db.world_del(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("installation: {0}")]
    Installation(#[from] installation::Error),

    #[error("Installed database load failed")]
    InstalledLoad(#[source] fdb::Error),

    #[error("world: {0}")]
    World(#[from] dependency::ParseError),

    #[error("index: {0}")]
    Index(#[from] fdb::Error),

    #[error("scripts: {0}")]
    Scripts(#[from] scripts::Error),

    #[error("database: {0}")]
    Database(#[from] db::Error),

    #[error("fetch: {0}")]
    Request(#[from] request::Error),

    #[error("archive: {0}")]
    Archive(#[from] archive::Error),

    #[error("resolve: {0}")]
    Transaction(#[from] transaction::Error),

    #[error("install: {0}")]
    Install(#[from] install::Error),

    #[error("{0:?} does not look like a package archive")]
    MalformedPackage(PathBuf),
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::Path;

    use flate2::write::GzEncoder;
    use flate2::Compression;

    use super::*;
    use crate::checksum::Checksum;

    /// Build a package archive with one payload file and its state
    /// directory marker
    fn package_archive(name: &str, version: &str, file: &str, data: &[u8]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);

        let parts: Vec<&str> = file.split('/').collect();
        let mut dirs: Vec<String> = Vec::new();
        let mut accumulated = String::new();
        for part in &parts[..parts.len() - 1] {
            if !accumulated.is_empty() {
                accumulated.push('/');
            }
            accumulated.push_str(part);
            dirs.push(format!("{accumulated}/"));
        }
        dirs.push(format!("var/db/apk/{name}/{version}/"));

        for dir in dirs {
            let mut header = tar::Header::new_ustar();
            header.set_entry_type(tar::EntryType::Directory);
            header.set_mode(0o755);
            header.set_uid(0);
            header.set_gid(0);
            header.set_size(0);
            header.set_cksum();
            builder
                .append_data(&mut header, dir.as_str(), io::empty())
                .unwrap();
        }

        let mut header = tar::Header::new_ustar();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(0o755);
        header.set_uid(0);
        header.set_gid(0);
        header.set_size(data.len() as u64);
        header.set_cksum();
        builder.append_data(&mut header, file, data).unwrap();

        builder.into_inner().unwrap().finish().unwrap()
    }

    /// Lay out a repository directory: archives plus APK_INDEX.gz
    fn write_repository(dir: &Path, packages: &[(&str, &str, Vec<u8>)]) {
        fs::create_dir_all(dir).unwrap();

        let mut index = Vec::new();
        for (name, version, bytes) in packages {
            let csum = Checksum::of_reader(&mut bytes.as_slice()).unwrap();
            let archive_name = format!("{name}-{version}.apk");
            fs::write(dir.join(&archive_name), bytes).unwrap();

            index.extend_from_slice(format!("P:{name}\n").as_bytes());
            index.extend_from_slice(format!("V:{version}\n").as_bytes());
            index.extend_from_slice(format!("S:{}\n", bytes.len()).as_bytes());
            index.extend_from_slice(b"I:0\n");
            index.extend_from_slice(format!("C:{csum}\n").as_bytes());
            index.push(b'\n');
        }

        let mut encoder = GzEncoder::new(
            fs::File::create(dir.join(environment::INDEX_FILE)).unwrap(),
            Compression::default(),
        );
        encoder.write_all(&index).unwrap();
        encoder.finish().unwrap();
    }

    #[test]
    fn create_then_open_starts_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");

        Client::create(&root).unwrap();
        let client = Client::open(&root, None, true).unwrap();

        assert_eq!(client.db.world().len(), 1);
        assert_eq!(client.db.world()[0].name, "busybox");
        assert_eq!(client.db.stats().packages, 0);
        assert_eq!(client.db.stats().dirs, 1);
    }

    #[test]
    fn full_cycle_through_a_local_repository() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        let repo = tmp.path().join("repo");

        write_repository(
            &repo,
            &[(
                "foo",
                "1.0",
                package_archive("foo", "1.0", "usr/bin/foo", b"payload"),
            )],
        );

        Client::create(&root).unwrap();
        {
            let mut client = Client::open(&root, repo.to_str(), true).unwrap();
            client.world_del("busybox");
            client.world_add("foo".parse().unwrap());
            client.recalculate_and_commit().unwrap();

            let stats = client.db.stats();
            assert_eq!((stats.packages, stats.files), (1, 1));
            assert_eq!(fs::read(root.join("usr/bin/foo")).unwrap(), b"payload");
        }

        // persisted state reloads to the same picture
        let client = Client::open(&root, None, true).unwrap();
        assert_eq!(client.db.stats().packages, 1);
        assert_eq!(client.db.world().len(), 1);
        assert_eq!(client.db.world()[0].name, "foo");

        let installed = fs::read_to_string(root.join(environment::INSTALLED_DB_FILE)).unwrap();
        assert!(installed.contains("P:foo"));
        assert!(installed.contains("R:foo"));

        client.db.assert_consistent();
    }

    #[test]
    fn repositories_file_registers_slots() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        let repo_a = tmp.path().join("a");
        let repo_b = tmp.path().join("b");

        let bytes = package_archive("foo", "1.0", "usr/bin/foo", b"payload");
        write_repository(&repo_a, &[("foo", "1.0", bytes.clone())]);
        write_repository(&repo_b, &[("foo", "1.0", bytes)]);

        Client::create(&root).unwrap();
        fs::write(
            root.join(environment::REPOSITORIES_FILE),
            format!("{}\n\n{}\n", repo_a.display(), repo_b.display()),
        )
        .unwrap();

        let client = Client::open(&root, None, true).unwrap();
        assert_eq!(client.db.repositories().len(), 2);

        // both slots carry the same content address
        let name = client.db.name_lookup("foo").unwrap();
        let pkg = client.db.name(name).pkgs[0];
        assert_eq!(client.db.package(pkg).repos, 0b11);
    }

    #[test]
    fn duplicate_installed_record_fails_open() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        Client::create(&root).unwrap();

        let record = "\
P:foo
V:1.0
S:1
I:1
C:0101010101010101010101010101010101010101010101010101010101010101
";
        fs::write(
            root.join(environment::INSTALLED_DB_FILE),
            format!("{record}\n{record}\n"),
        )
        .unwrap();

        let error = Client::open(&root, None, true).unwrap_err();
        assert!(matches!(error, Error::InstalledLoad(_)));
        assert_eq!(error.to_string(), "Installed database load failed");
    }

    #[test]
    fn add_local_package_derives_identity() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        Client::create(&root).unwrap();

        let bytes = package_archive("hello", "2.12", "usr/bin/hello", b"hello world");
        let path = tmp.path().join("hello-2.12.apk");
        fs::write(&path, &bytes).unwrap();

        let mut client = Client::open(&root, None, true).unwrap();
        let pkg = client.add_local_package(&path).unwrap();

        let package = client.db.package(pkg);
        assert_eq!(package.meta.name, "hello");
        assert_eq!(package.meta.version, "2.12");
        assert_eq!(package.meta.size, bytes.len() as u64);
        assert_eq!(package.meta.installed_size, b"hello world".len() as u64);
        assert_eq!(package.filename.as_deref(), Some(path.as_path()));
        assert_eq!(
            package.meta.csum,
            Checksum::of_reader(&mut bytes.as_slice()).unwrap()
        );
    }

    #[test]
    fn add_local_package_rejects_foreign_archives() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        Client::create(&root).unwrap();

        // a tarball without the state directory marker
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_ustar();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(4);
        header.set_cksum();
        builder.append_data(&mut header, "data", &b"data"[..]).unwrap();
        let bytes = builder.into_inner().unwrap().finish().unwrap();

        let path = tmp.path().join("not-a-package.apk");
        fs::write(&path, bytes).unwrap();

        let mut client = Client::open(&root, None, true).unwrap();
        assert!(matches!(
            client.add_local_package(&path),
            Err(Error::MalformedPackage(_))
        ));
    }

    #[test]
    fn world_edits_drive_removal() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        let repo = tmp.path().join("repo");

        write_repository(
            &repo,
            &[(
                "foo",
                "1.0",
                package_archive("foo", "1.0", "usr/bin/foo", b"payload"),
            )],
        );

        Client::create(&root).unwrap();
        {
            let mut client = Client::open(&root, repo.to_str(), true).unwrap();
            client.world_del("busybox");
            client.world_add("foo".parse().unwrap());
            client.recalculate_and_commit().unwrap();
        }

        {
            let mut client = Client::open(&root, repo.to_str(), true).unwrap();
            client.world_del("foo");
            client.recalculate_and_commit().unwrap();

            let stats = client.db.stats();
            assert_eq!((stats.packages, stats.dirs, stats.files), (0, 1, 0));
            assert!(!root.join("usr/bin/foo").exists());
        }

        let client = Client::open(&root, None, true).unwrap();
        assert_eq!(client.db.stats().packages, 0);
        assert!(client.db.world().is_empty());
    }

    #[test]
    fn config_files_written_private() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        Client::create(&root).unwrap();

        let client = Client::open(&root, None, true).unwrap();
        client.close().unwrap();

        for path in [
            environment::WORLD_FILE,
            environment::INSTALLED_DB_FILE,
            environment::SCRIPTS_FILE,
        ] {
            let mode = fs::metadata(root.join(path)).unwrap().permissions().mode();
            assert_eq!(mode & 0o7777, 0o600, "{path}");
        }
    }
}
