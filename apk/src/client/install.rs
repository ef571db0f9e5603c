// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The per-package install engine.
//!
//! One call drives one transition: fresh install (`None, Some`),
//! upgrade (`Some, Some`) or removal (`Some, None`). Archive entries
//! stream straight onto the root while ownership, reference counts and
//! checksums are maintained in the database; there is no rollback, a
//! failed transition leaves the partial state behind.

use std::io::{self, Read};

use log::{debug, warn};
use thiserror::Error;

use crate::archive::{self, Entry, EntryKind};
use crate::checksum::{Checksum, Digester};
use crate::db::{Database, DirFlags, DirId, FileId};
use crate::environment;
use crate::installation::Installation;
use crate::package;
use crate::request;
use crate::script::{self, Kind, Script};

/// Apply one package transition
pub fn install_pkg(
    db: &mut Database,
    installation: &Installation,
    old: Option<package::Id>,
    new: Option<package::Id>,
) -> Result<(), Error> {
    if let Some(old_id) = old {
        if new.is_none() {
            // a failing pre-deinstall vetoes the removal
            run_script(db, installation, old_id, Kind::PreDeinstall)?;
            purge(db, installation, old_id);
            if let Err(error) = run_script(db, installation, old_id, Kind::PostDeinstall) {
                warn!("{error}");
            }
            return Ok(());
        }
        purge(db, installation, old_id);
    }

    let Some(new_id) = new else {
        return Ok(());
    };

    let uri = package_uri(db, new_id)?;
    debug!("fetching {uri}");
    let stream = request::open(&uri)?;
    let digester = Digester::new(stream);

    let mut ctx = Context {
        pkg: new_id,
        phase: if old.is_some() {
            Kind::PreUpgrade
        } else {
            Kind::PreInstall
        },
        name: db.package(new_id).meta.name.clone(),
        version: db.package(new_id).meta.version.clone(),
        last_dir: None,
    };

    let mut raw = archive::walk(digester, |entry, payload| {
        install_entry(db, installation, &mut ctx, entry, payload)
    })?;

    // drain compressed trailer bytes so the digest covers the stream
    io::copy(&mut raw, &mut io::sink())?;
    let (csum, _) = raw.finalize();

    db.mark_installed(new_id);

    if csum != db.package(new_id).meta.csum {
        warn!("{}-{}: checksum mismatch", ctx.name, ctx.version);
    }

    let post = if old.is_some() {
        Kind::PostUpgrade
    } else {
        Kind::PostInstall
    };
    run_script(db, installation, new_id, post)?;

    Ok(())
}

/// Per-install state threaded through the entry callbacks
struct Context {
    pkg: package::Id,
    /// The pre-phase script of this transition, run as soon as it is
    /// seen in the archive
    phase: Kind,
    name: String,
    version: String,
    /// One-slot memo for the directory of the previous entry; archive
    /// entries arrive grouped by directory
    last_dir: Option<(String, DirId)>,
}

/// Strip `pkg` of everything it owns. Locally modified files under
/// protected directories stay on disk; all bookkeeping proceeds.
fn purge(db: &mut Database, installation: &Installation, pkg: package::Id) {
    let files = std::mem::take(&mut db.package_mut(pkg).files);
    for file_id in files {
        let path = db.file_path(file_id);
        if keeps_local_changes(db, installation, file_id) {
            debug!("{path}: locally modified, left on disk");
        } else {
            match installation.remove_file(&path) {
                Ok(()) => {}
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(error) => warn!("unlink {path}: {error}"),
            }
        }
        db.drop_owner(file_id, Some(installation));
    }
    db.mark_available(pkg);
}

/// A protected file whose on-disk content no longer matches the
/// recorded checksum was edited by the administrator
fn keeps_local_changes(db: &Database, installation: &Installation, file: FileId) -> bool {
    let entry = db.file(file);
    if !db.dir(entry.dir).flags.contains(DirFlags::PROTECTED) {
        return false;
    }
    let Some(stored) = entry.csum else {
        return false;
    };
    match Checksum::of_file(installation.real_path(db.file_path(file))) {
        Ok(on_disk) => on_disk != stored,
        Err(_) => false,
    }
}

/// Where to stream the archive from: a local file when registered
/// from one, otherwise the first repository carrying the package
fn package_uri(db: &Database, pkg: package::Id) -> Result<String, Error> {
    let package = db.package(pkg);
    if let Some(path) = &package.filename {
        return Ok(path.to_string_lossy().into_owned());
    }

    let slot = (0..environment::MAX_REPOS)
        .find(|slot| package.repos & (1 << slot) != 0)
        .ok_or_else(|| Error::NoSource(package.meta.name.clone()))?;

    Ok(db.repositories()[slot].package_url(&package.archive_name()))
}

fn install_entry(
    db: &mut Database,
    installation: &Installation,
    ctx: &mut Context,
    entry: &Entry,
    payload: &mut dyn Read,
) -> Result<(), Error> {
    let path = entry.path.as_str();

    // APK 2.0 control entries live at the top, dot-prefixed
    if path.starts_with('.') {
        if path == ".INSTALL" {
            let script = read_script(Kind::Generic, entry, payload)?;
            return store_script(db, installation, ctx, script);
        }
        debug!("ignoring control entry {path}");
        return Ok(());
    }

    // APK 1.0 keeps scripts under the state directory
    if let Some(rest) = path.strip_prefix("var/db/apk/") {
        return install_script_entry(db, installation, ctx, rest, entry, payload);
    }

    match &entry.kind {
        EntryKind::Directory => {
            let dir = db.dir_get(path);
            let dir = db.dir_mut(dir);
            dir.mode = entry.mode & 0o7777;
            dir.uid = entry.uid;
            dir.gid = entry.gid;
            Ok(())
        }
        EntryKind::File => install_file(db, installation, ctx, entry, payload),
        EntryKind::Symlink(target) => install_symlink(db, installation, ctx, entry, target),
        EntryKind::Other => {
            debug!("skipping special entry {path}");
            Ok(())
        }
    }
}

/// `<name>/<version>/<kind>` under the state directory; entries for
/// other packages or unknown kinds are ignored
fn install_script_entry(
    db: &mut Database,
    installation: &Installation,
    ctx: &mut Context,
    rest: &str,
    entry: &Entry,
    payload: &mut dyn Read,
) -> Result<(), Error> {
    if entry.kind != EntryKind::File {
        return Ok(());
    }

    let mut parts = rest.splitn(3, '/');
    let (Some(name), Some(version), Some(kind)) = (parts.next(), parts.next(), parts.next())
    else {
        return Ok(());
    };

    if name != ctx.name || version != ctx.version {
        debug!("ignoring metadata for {name}-{version}");
        return Ok(());
    }
    let Ok(kind) = kind.parse::<Kind>() else {
        debug!("ignoring unknown script {kind}");
        return Ok(());
    };

    let script = read_script(kind, entry, payload)?;
    store_script(db, installation, ctx, script)
}

fn read_script(kind: Kind, entry: &Entry, payload: &mut dyn Read) -> Result<Script, Error> {
    let mut data = Vec::with_capacity(entry.size as usize);
    payload.read_to_end(&mut data)?;
    Ok(Script { kind, data })
}

/// Attach the script to the package; generic scripts and the pending
/// pre-phase script run immediately, a nonzero exit aborts the install
fn store_script(
    db: &mut Database,
    installation: &Installation,
    ctx: &mut Context,
    script: Script,
) -> Result<(), Error> {
    let run_now = script.kind == Kind::Generic || script.kind == ctx.phase;
    let pkg = db.package_mut(ctx.pkg);
    pkg.scripts.push(script);
    if run_now {
        if let Some(script) = pkg.scripts.last() {
            script::run(installation, script, ctx.phase)?;
        }
    }
    Ok(())
}

fn install_file(
    db: &mut Database,
    installation: &Installation,
    ctx: &mut Context,
    entry: &Entry,
    payload: &mut dyn Read,
) -> Result<(), Error> {
    let (dir_path, basename) = split_path(&entry.path);
    let dir = cached_dir(db, ctx, dir_path);
    let file_id = db.file_get(dir, basename);

    claim_file(db, ctx, file_id, &entry.path)?;
    db.set_owner(file_id, ctx.pkg, Some(installation));

    // marker files only pin their directory
    if basename.starts_with(".keep_") {
        return Ok(());
    }

    let target = db.file_path(file_id);
    let destination = if diverges(db, installation, file_id) {
        let destination = format!("{target}.apk-new");
        warn!("{target}: locally modified, new version left as {destination}");
        destination
    } else {
        target
    };

    let mut out = installation.create_file(&destination, entry.mode)?;
    let mut digesting = Digester::new(payload);
    io::copy(&mut digesting, &mut out)?;
    drop(out);
    let (csum, _) = digesting.finalize();

    installation.set_file_owner(&destination, entry.uid, entry.gid);
    db.file_mut(file_id).csum = Some(csum);

    Ok(())
}

fn install_symlink(
    db: &mut Database,
    installation: &Installation,
    ctx: &mut Context,
    entry: &Entry,
    target: &str,
) -> Result<(), Error> {
    let (dir_path, basename) = split_path(&entry.path);
    let dir = cached_dir(db, ctx, dir_path);
    let file_id = db.file_get(dir, basename);

    claim_file(db, ctx, file_id, &entry.path)?;
    db.set_owner(file_id, ctx.pkg, Some(installation));

    let path = db.file_path(file_id);
    installation.symlink(target, &path)?;
    // a link has no payload digest
    db.file_mut(file_id).csum = None;

    Ok(())
}

/// A file already owned by an unrelated package is a conflict. The
/// base layout owner is grandfathered; it ships bits other packages
/// later take over.
fn claim_file(
    db: &Database,
    ctx: &Context,
    file: FileId,
    path: &str,
) -> Result<(), Error> {
    let Some(owner) = db.file(file).owner else {
        return Ok(());
    };
    let owner_name = &db.name(db.package(owner).name).name;
    if owner_name.as_str() != ctx.name && owner_name.as_str() != environment::BASE_OWNER {
        return Err(Error::Conflict {
            path: path.to_owned(),
            owner: owner_name.clone(),
        });
    }
    Ok(())
}

/// Divergence gates the overwrite of protected configuration: the
/// directory is protected, a prior checksum is on record, and the
/// on-disk content matches neither
fn diverges(db: &Database, installation: &Installation, file: FileId) -> bool {
    let entry = db.file(file);
    if !db.dir(entry.dir).flags.contains(DirFlags::PROTECTED) {
        return false;
    }
    let Some(stored) = entry.csum else {
        return false;
    };
    match Checksum::of_file(installation.real_path(db.file_path(file))) {
        Ok(on_disk) => on_disk != stored,
        Err(_) => false,
    }
}

fn cached_dir(db: &mut Database, ctx: &mut Context, path: &str) -> DirId {
    if let Some((cached, id)) = &ctx.last_dir {
        if cached == path {
            return *id;
        }
    }
    let id = db.dir_get(path);
    ctx.last_dir = Some((path.to_owned(), id));
    id
}

fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(at) => (&path[..at], &path[at + 1..]),
        None => ("", path),
    }
}

/// Run the stored script of `kind` (or a generic stand-in), if any
fn run_script(
    db: &Database,
    installation: &Installation,
    pkg: package::Id,
    kind: Kind,
) -> Result<(), Error> {
    if let Some(script) = db.package(pkg).script(kind) {
        script::run(installation, script, kind)?;
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("archive: {0}")]
    Archive(#[from] archive::Error),

    #[error("fetch: {0}")]
    Request(#[from] request::Error),

    #[error("script: {0}")]
    Script(#[from] script::Error),

    #[error("{path} already owned by {owner}")]
    Conflict { path: String, owner: String },

    #[error("no source for package {0}")]
    NoSource(String),
}
