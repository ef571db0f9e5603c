// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use fs_err as fs;
use log::debug;
use nix::sys::stat::{makedev, mknod, Mode, SFlag};
use nix::unistd::{chown, mkdir, Gid, Uid};
use thiserror::Error;

use crate::environment;

/// Handle to a root filesystem under management. Every disk mutation
/// the engine performs resolves against this root; the process working
/// directory is never changed.
#[derive(Debug, Clone)]
pub struct Installation {
    pub root: PathBuf,
}

impl Installation {
    /// Open an existing root
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root: PathBuf = root.into();

        let meta = fs::metadata(&root)?;
        if !meta.is_dir() {
            return Err(Error::NotADirectory(root));
        }

        debug!("root dir: {root:?}");

        Ok(Self { root })
    }

    /// Seed a fresh root with the baseline layout: `tmp`, `dev` with a
    /// null device, the apk state directory and a baseline world.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root: PathBuf = root.into();

        fs::create_dir_all(&root)?;
        make_dir(&root.join("tmp"), 0o1777)?;
        make_dir(&root.join("dev"), 0o755)?;
        device_node(&root.join("dev/null"), 0o666, 1, 3);
        fs::create_dir_all(root.join("var/lib"))?;
        make_dir(&root.join("var/lib/apk"), 0o755)?;
        fs::create_dir_all(root.join("etc/apk"))?;

        let installation = Self { root };

        let world = installation.real_path(environment::WORLD_FILE);
        if !world.exists() {
            installation.write_config(
                environment::WORLD_FILE,
                format!("{}\n", environment::BASE_WORLD).as_bytes(),
            )?;
        }

        Ok(installation)
    }

    /// Resolve a root-relative path
    pub fn real_path(&self, path: impl AsRef<Path>) -> PathBuf {
        self.root.join(path)
    }

    pub fn world_path(&self) -> PathBuf {
        self.real_path(environment::WORLD_FILE)
    }

    pub fn installed_db_path(&self) -> PathBuf {
        self.real_path(environment::INSTALLED_DB_FILE)
    }

    pub fn scripts_path(&self) -> PathBuf {
        self.real_path(environment::SCRIPTS_FILE)
    }

    pub fn repositories_path(&self) -> PathBuf {
        self.real_path(environment::REPOSITORIES_FILE)
    }

    /// Atomically replace the config file at `path` (root-relative)
    /// with `contents` at mode 0600
    pub fn write_config(&self, path: &str, contents: &[u8]) -> Result<(), Error> {
        let real = self.real_path(path);
        if let Some(parent) = real.parent() {
            fs::create_dir_all(parent)?;
        }

        let staging = real.with_extension("new");
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&staging)?;
        file.write_all(contents)?;
        drop(file);

        fs::rename(&staging, &real)?;
        Ok(())
    }

    /// Materialize a directory with the recorded metadata. Failures are
    /// expected (the path may already exist) and only logged.
    pub fn make_directory(&self, path: &str, mode: u32, uid: u32, gid: u32) {
        let real = self.real_path(path);
        if let Err(error) = mkdir(&real, Mode::from_bits_truncate(mode)) {
            debug!("mkdir {}: {error}", real.display());
        }
        if let Err(error) = chown(&real, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid))) {
            debug!("chown {}: {error}", real.display());
        }
    }

    /// Best-effort removal of an empty directory
    pub fn remove_directory(&self, path: &str) {
        let real = self.real_path(path);
        if let Err(error) = fs::remove_dir(&real) {
            debug!("rmdir {}: {error}", real.display());
        }
    }

    pub fn remove_file(&self, path: &str) -> io::Result<()> {
        fs::remove_file(self.real_path(path))
    }

    /// Create (or truncate) a regular file at `path` with `mode`
    pub fn create_file(&self, path: &str, mode: u32) -> io::Result<std::fs::File> {
        std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode & 0o7777)
            .open(self.real_path(path))
    }

    /// Best-effort ownership fixup; fails harmlessly without privileges
    pub fn set_file_owner(&self, path: &str, uid: u32, gid: u32) {
        let real = self.real_path(path);
        if let Err(error) = chown(&real, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid))) {
            debug!("chown {}: {error}", real.display());
        }
    }

    /// Create a symlink at `path` pointing at `target`, replacing any
    /// previous entry
    pub fn symlink(&self, target: &str, path: &str) -> io::Result<()> {
        let real = self.real_path(path);
        match fs::remove_file(&real) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => return Err(error),
        }
        std::os::unix::fs::symlink(target, &real)
    }
}

/// mkdir honours the umask, so follow up with an explicit chmod to get
/// the exact requested mode
fn make_dir(path: &Path, mode: u32) -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;

    if let Err(error) = mkdir(path, Mode::from_bits_truncate(mode)) {
        debug!("mkdir {}: {error}", path.display());
    }
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Character device creation needs privileges; a plain user root is
/// still usable without one
fn device_node(path: &Path, mode: u32, major: u64, minor: u64) {
    if let Err(error) = mknod(
        path,
        SFlag::S_IFCHR,
        Mode::from_bits_truncate(mode),
        makedev(major, minor),
    ) {
        debug!("mknod {}: {error}", path.display());
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("root is not a directory: {0:?}")]
    NotADirectory(PathBuf),
}
