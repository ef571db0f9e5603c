// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The in-memory installed-state database.
//!
//! Names, packages, directories and files live in append-only arenas
//! addressed by typed indices; the maps over them provide the lookup
//! paths the engine needs (name, content checksum, directory path,
//! basename within a directory). Directories are reference counted by
//! the files installed beneath them, and the 0↔1 edges drive on-disk
//! creation and removal.

use std::collections::HashMap;
use std::path::PathBuf;

use bitflags::bitflags;
use thiserror::Error;

use crate::checksum::Checksum;
use crate::dependency::Dependency;
use crate::environment;
use crate::installation::Installation;
use crate::package::{self, Meta, Package, State};
use crate::repository::Repository;

pub mod fdb;
pub mod scripts;

/// Index of an interned [`package::Name`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NameId(u32);

/// Index of an interned [`Directory`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirId(u32);

/// Index of an interned [`File`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(u32);

impl NameId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl DirId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl FileId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

bitflags! {
    /// Directory behaviour flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DirFlags: u32 {
        /// Configuration lives here; never silently overwrite
        const PROTECTED = 1 << 0;
    }
}

/// An interned directory path, reference counted by the installed
/// files beneath it
#[derive(Debug)]
pub struct Directory {
    /// Full path without trailing slash; the root is the empty path
    pub dirname: String,
    /// Mode recorded from an archive or FDB entry; 0 means unknown and
    /// suppresses on-disk creation
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub flags: DirFlags,
    pub parent: Option<DirId>,
    /// Owned files plus live child directories (and one self reference
    /// for the root)
    pub refs: u32,
    /// Files interned under this directory, keyed by basename
    pub files: HashMap<String, FileId>,
}

/// A single filesystem entry owned by at most one package at a time.
/// Purged files stay interned with `owner` cleared so a later install
/// can reclaim them.
#[derive(Debug)]
pub struct File {
    /// Basename within `dir`
    pub name: String,
    pub dir: DirId,
    pub owner: Option<package::Id>,
    /// Payload digest recorded at extraction; drives upgrade diversion
    pub csum: Option<Checksum>,
}

/// One protect/unprotect rule, applied in order on exact dirname match
#[derive(Debug, Clone)]
pub struct ProtectedPath {
    pub path: String,
    pub protect: bool,
}

/// Counters over the installed set
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub packages: usize,
    pub dirs: usize,
    pub files: usize,
}

#[derive(Debug)]
pub struct Database {
    names: Vec<package::Name>,
    name_index: HashMap<String, NameId>,
    packages: Vec<Package>,
    package_index: HashMap<Checksum, package::Id>,
    dirs: Vec<Directory>,
    dir_index: HashMap<String, DirId>,
    files: Vec<File>,
    installed: Vec<package::Id>,
    repositories: Vec<Repository>,
    protected_paths: Vec<ProtectedPath>,
    world: Vec<Dependency>,
    stats: Stats,
    root_dir: DirId,
}

impl Database {
    pub fn new() -> Self {
        let mut db = Self {
            names: Vec::new(),
            name_index: HashMap::with_capacity(1000),
            packages: Vec::new(),
            package_index: HashMap::with_capacity(4000),
            dirs: Vec::new(),
            dir_index: HashMap::with_capacity(1000),
            files: Vec::new(),
            installed: Vec::new(),
            repositories: Vec::new(),
            protected_paths: Vec::new(),
            world: Vec::new(),
            stats: Stats::default(),
            root_dir: DirId(0),
        };

        db.add_protected_paths(environment::DEFAULT_PROTECTED_PATHS);

        // the root keeps one reference for the lifetime of the database
        db.root_dir = db.dir_get("");
        db.dir_ref(db.root_dir, None);

        db
    }

    /// Append rules from a `:`-separated list; a `-` prefix clears
    /// the protection on exact match
    pub fn add_protected_paths(&mut self, rules: &str) {
        for rule in rules.split(':').filter(|rule| !rule.is_empty()) {
            let (path, protect) = match rule.strip_prefix('-') {
                Some(path) => (path, false),
                None => (rule, true),
            };
            self.protected_paths.push(ProtectedPath {
                path: path.to_owned(),
                protect,
            });
        }
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn root_dir(&self) -> DirId {
        self.root_dir
    }

    // --- names ---

    /// Intern `name`
    pub fn name_get(&mut self, name: &str) -> NameId {
        if let Some(id) = self.name_index.get(name) {
            return *id;
        }
        let id = NameId(self.names.len() as u32);
        self.names.push(package::Name {
            name: name.to_owned(),
            pkgs: Vec::new(),
        });
        self.name_index.insert(name.to_owned(), id);
        id
    }

    pub fn name_lookup(&self, name: &str) -> Option<NameId> {
        self.name_index.get(name).copied()
    }

    pub fn name(&self, id: NameId) -> &package::Name {
        &self.names[id.index()]
    }

    // --- packages ---

    /// Register `meta` under its content checksum. A checksum already
    /// registered absorbs the duplicate: repository bits are OR-ed onto
    /// the existing instance, which is returned with `existing = true`.
    pub fn add_pkg(
        &mut self,
        meta: Meta,
        repo: Option<usize>,
        filename: Option<PathBuf>,
    ) -> (package::Id, bool) {
        if let Some(&id) = self.package_index.get(&meta.csum) {
            if let Some(slot) = repo {
                self.packages[id.index()].repos |= 1 << slot;
            }
            return (id, true);
        }

        let name = self.name_get(&meta.name);
        let id = package::Id::new(self.packages.len() as u32);
        let csum = meta.csum;

        self.packages.push(Package {
            name,
            meta,
            repos: repo.map(|slot| 1 << slot).unwrap_or(0),
            filename,
            state: State::Available,
            files: Vec::new(),
            scripts: Vec::new(),
        });
        self.package_index.insert(csum, id);
        self.names[name.index()].pkgs.push(id);

        (id, false)
    }

    pub fn package(&self, id: package::Id) -> &Package {
        &self.packages[id.index()]
    }

    pub fn package_mut(&mut self, id: package::Id) -> &mut Package {
        &mut self.packages[id.index()]
    }

    pub fn package_by_csum(&self, csum: &Checksum) -> Option<package::Id> {
        self.package_index.get(csum).copied()
    }

    /// The installed package carrying `name`, if any
    pub fn installed_package_for_name(&self, name: NameId) -> Option<package::Id> {
        self.names[name.index()]
            .pkgs
            .iter()
            .copied()
            .find(|&id| self.packages[id.index()].is_installed())
    }

    /// Installed packages in installation order
    pub fn installed_order(&self) -> &[package::Id] {
        &self.installed
    }

    /// Move `id` into the installed set
    pub fn mark_installed(&mut self, id: package::Id) {
        let pkg = &mut self.packages[id.index()];
        if pkg.is_installed() {
            return;
        }
        pkg.state = State::Installed;
        self.installed.push(id);
        self.stats.packages += 1;
    }

    /// Drop `id` back to available
    pub fn mark_available(&mut self, id: package::Id) {
        let pkg = &mut self.packages[id.index()];
        if !pkg.is_installed() {
            return;
        }
        pkg.state = State::Available;
        self.installed.retain(|installed| *installed != id);
        self.stats.packages -= 1;
    }

    // --- repositories ---

    /// Claim the next repository slot (check first, then assign)
    pub fn add_repository(&mut self, repository: Repository) -> Result<usize, Error> {
        if self.repositories.len() >= environment::MAX_REPOS {
            return Err(Error::TooManyRepositories(environment::MAX_REPOS));
        }
        let slot = self.repositories.len();
        self.repositories.push(repository);
        Ok(slot)
    }

    pub fn repositories(&self) -> &[Repository] {
        &self.repositories
    }

    // --- world ---

    pub fn world(&self) -> &[Dependency] {
        &self.world
    }

    pub fn set_world(&mut self, world: Vec<Dependency>) {
        self.world = world;
    }

    /// Merge `dep` into world, replacing a previous entry of the
    /// same name
    pub fn world_add(&mut self, dep: Dependency) {
        match self.world.iter_mut().find(|entry| entry.name == dep.name) {
            Some(entry) => *entry = dep,
            None => self.world.push(dep),
        }
    }

    /// Drop `name` from world; returns whether it was present
    pub fn world_del(&mut self, name: &str) -> bool {
        let before = self.world.len();
        self.world.retain(|entry| entry.name != name);
        self.world.len() != before
    }

    // --- directories ---

    /// Intern `path` (one trailing slash stripped), resolving parents
    /// lazily. Flags inherit from the parent, then the ordered
    /// protected-path rules apply on exact match.
    pub fn dir_get(&mut self, path: &str) -> DirId {
        let path = path.strip_suffix('/').unwrap_or(path);
        if let Some(id) = self.dir_index.get(path) {
            return *id;
        }

        let parent = if path.is_empty() {
            None
        } else {
            let parent_path = match path.rfind('/') {
                Some(at) => &path[..at],
                None => "",
            };
            Some(self.dir_get(parent_path))
        };

        let mut flags = parent
            .map(|parent| self.dirs[parent.index()].flags)
            .unwrap_or(DirFlags::empty());
        for rule in &self.protected_paths {
            if rule.path == path {
                flags.set(DirFlags::PROTECTED, rule.protect);
            }
        }

        let id = DirId(self.dirs.len() as u32);
        self.dirs.push(Directory {
            dirname: path.to_owned(),
            mode: 0,
            uid: 0,
            gid: 0,
            flags,
            parent,
            refs: 0,
            files: HashMap::new(),
        });
        self.dir_index.insert(path.to_owned(), id);
        id
    }

    pub fn dir_lookup(&self, path: &str) -> Option<DirId> {
        self.dir_index.get(path.strip_suffix('/').unwrap_or(path)).copied()
    }

    pub fn dir(&self, id: DirId) -> &Directory {
        &self.dirs[id.index()]
    }

    pub fn dir_mut(&mut self, id: DirId) -> &mut Directory {
        &mut self.dirs[id.index()]
    }

    /// Take a reference on `id`. The 0→1 edge references the parent
    /// chain, counts the directory, and with `disk` materializes it
    /// when its mode is known.
    pub fn dir_ref(&mut self, id: DirId, disk: Option<&Installation>) {
        if self.dirs[id.index()].refs == 0 {
            if let Some(parent) = self.dirs[id.index()].parent {
                self.dir_ref(parent, disk);
            }
            self.stats.dirs += 1;

            let dir = &self.dirs[id.index()];
            if dir.mode != 0 {
                if let Some(installation) = disk {
                    installation.make_directory(&dir.dirname, dir.mode, dir.uid, dir.gid);
                }
            }
        }
        self.dirs[id.index()].refs += 1;
    }

    /// Release a reference on `id`. The 1→0 edge uncounts the
    /// directory, attempts removal on disk, and releases the parent.
    pub fn dir_unref(&mut self, id: DirId, disk: Option<&Installation>) {
        let dir = &mut self.dirs[id.index()];
        debug_assert!(dir.refs > 0);
        dir.refs -= 1;
        if dir.refs > 0 {
            return;
        }

        self.stats.dirs -= 1;

        let dir = &self.dirs[id.index()];
        if !dir.dirname.is_empty() {
            if let Some(installation) = disk {
                installation.remove_directory(&dir.dirname);
            }
        }

        if let Some(parent) = dir.parent {
            self.dir_unref(parent, disk);
        }
    }

    // --- files ---

    /// Find or intern the file `basename` under `dir`
    pub fn file_get(&mut self, dir: DirId, basename: &str) -> FileId {
        if let Some(id) = self.dirs[dir.index()].files.get(basename) {
            return *id;
        }
        let id = FileId(self.files.len() as u32);
        self.files.push(File {
            name: basename.to_owned(),
            dir,
            owner: None,
            csum: None,
        });
        self.dirs[dir.index()]
            .files
            .insert(basename.to_owned(), id);
        id
    }

    pub fn file(&self, id: FileId) -> &File {
        &self.files[id.index()]
    }

    pub fn file_mut(&mut self, id: FileId) -> &mut File {
        &mut self.files[id.index()]
    }

    /// Root-relative path of `id`
    pub fn file_path(&self, id: FileId) -> String {
        let file = &self.files[id.index()];
        let dir = &self.dirs[file.dir.index()];
        if dir.dirname.is_empty() {
            file.name.clone()
        } else {
            format!("{}/{}", dir.dirname, file.name)
        }
    }

    /// Transfer ownership of `file` to `pkg`. A previously unowned
    /// file joins the installed set and takes a directory reference;
    /// a transfer between owners only moves list membership.
    pub fn set_owner(&mut self, file: FileId, pkg: package::Id, disk: Option<&Installation>) {
        match self.files[file.index()].owner {
            Some(owner) if owner == pkg => return,
            Some(owner) => {
                self.packages[owner.index()].files.retain(|f| *f != file);
            }
            None => {
                self.stats.files += 1;
                let dir = self.files[file.index()].dir;
                self.dir_ref(dir, disk);
            }
        }
        self.files[file.index()].owner = Some(pkg);
        self.packages[pkg.index()].files.push(file);
    }

    /// Purge-side bookkeeping for one file: clear the owner, uncount
    /// it and release its directory. Disk removal is the caller's
    /// policy. The caller has already detached the file from the
    /// owner's list.
    pub fn drop_owner(&mut self, file: FileId, disk: Option<&Installation>) {
        let entry = &mut self.files[file.index()];
        debug_assert!(entry.owner.is_some());
        entry.owner = None;
        let dir = entry.dir;
        self.stats.files -= 1;
        self.dir_unref(dir, disk);
    }

    /// Cross-check counters, reference counts and list membership;
    /// panics on the first inconsistency.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let owned = self.files.iter().filter(|f| f.owner.is_some()).count();
        assert_eq!(self.stats.files, owned, "files counter");

        let live = self.dirs.iter().filter(|d| d.refs > 0).count();
        assert_eq!(self.stats.dirs, live, "dirs counter");

        assert_eq!(self.stats.packages, self.installed.len(), "packages counter");

        for (at, dir) in self.dirs.iter().enumerate() {
            let files_here = self
                .files
                .iter()
                .filter(|f| f.owner.is_some() && f.dir.index() == at)
                .count() as u32;
            let live_children = self
                .dirs
                .iter()
                .filter(|d| d.refs > 0 && d.parent.map(DirId::index) == Some(at))
                .count() as u32;
            let self_ref = u32::from(at == self.root_dir.index());
            assert_eq!(
                dir.refs,
                files_here + live_children + self_ref,
                "refs of {:?}",
                dir.dirname
            );
        }

        for (at, file) in self.files.iter().enumerate() {
            let id = FileId(at as u32);
            let Some(owner) = file.owner else { continue };
            assert!(
                self.packages[owner.index()].files.contains(&id),
                "{} missing from owner list",
                self.file_path(id)
            );
            assert_eq!(
                self.dirs[file.dir.index()].files.get(&file.name),
                Some(&id),
                "{} missing from directory",
                self.file_path(id)
            );
        }
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("repository slots exhausted ({0} max)")]
    TooManyRepositories(usize),
}
