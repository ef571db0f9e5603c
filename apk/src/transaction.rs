// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Resolution of the world into an ordered set of package changes.
//!
//! For every dependency reachable from the world the newest available
//! version satisfying the constraint is selected; the resulting target
//! set is diffed against the installed set. Installs and upgrades come
//! out dependency-first, removals last.

use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;

use crate::db::{Database, NameId};
use crate::package::{self, version};

/// One change produced by resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Install { new: package::Id },
    Upgrade { old: package::Id, new: package::Id },
    Remove { old: package::Id },
}

impl Change {
    /// The `(old, new)` pair handed to the install engine
    pub fn as_transition(&self) -> (Option<package::Id>, Option<package::Id>) {
        match *self {
            Change::Install { new } => (None, Some(new)),
            Change::Upgrade { old, new } => (Some(old), Some(new)),
            Change::Remove { old } => (Some(old), None),
        }
    }
}

#[derive(Debug, Default)]
pub struct Transaction {
    pub changes: Vec<Change>,
}

/// Resolve the current world against everything the database knows
pub fn plan(db: &Database) -> Result<Transaction, Error> {
    // pin one package per name, breadth-first over dependencies
    let mut chosen: HashMap<NameId, package::Id> = HashMap::new();
    let mut queue: VecDeque<_> = db.world().iter().cloned().collect();

    while let Some(dep) = queue.pop_front() {
        let name = db
            .name_lookup(&dep.name)
            .ok_or_else(|| Error::NoCandidate(dep.to_string()))?;

        match chosen.get(&name) {
            Some(&pinned) => {
                if !dep.satisfied_by(&db.package(pinned).meta.version) {
                    return Err(Error::Conflicting(dep.to_string()));
                }
                continue;
            }
            None => {
                let candidate = best_candidate(db, name, &dep)?;
                chosen.insert(name, candidate);
                queue.extend(db.package(candidate).meta.depends.iter().cloned());
            }
        }
    }

    // dependency-first ordering over the target set
    let mut order = Vec::with_capacity(chosen.len());
    let mut visited = HashSet::new();
    for dep in db.world() {
        if let Some(name) = db.name_lookup(&dep.name) {
            visit(db, &chosen, name, &mut visited, &mut order);
        }
    }

    let mut changes = Vec::new();
    for &pkg in &order {
        let name = db.package(pkg).name;
        match db.installed_package_for_name(name) {
            Some(old) if old == pkg => {}
            Some(old) => changes.push(Change::Upgrade { old, new: pkg }),
            None => changes.push(Change::Install { new: pkg }),
        }
    }

    // whatever the target no longer wants goes last, dependents first
    let target: HashSet<package::Id> = chosen.values().copied().collect();
    for &old in db.installed_order().iter().rev() {
        if !target.contains(&old) {
            changes.push(Change::Remove { old });
        }
    }

    Ok(Transaction { changes })
}

/// Newest package of `name` satisfying `dep`
fn best_candidate(
    db: &Database,
    name: NameId,
    dep: &crate::dependency::Dependency,
) -> Result<package::Id, Error> {
    db.name(name)
        .pkgs
        .iter()
        .copied()
        .filter(|&pkg| dep.satisfied_by(&db.package(pkg).meta.version))
        .max_by(|&a, &b| {
            version::compare(&db.package(a).meta.version, &db.package(b).meta.version)
        })
        .ok_or_else(|| Error::NoCandidate(dep.to_string()))
}

fn visit(
    db: &Database,
    chosen: &HashMap<NameId, package::Id>,
    name: NameId,
    visited: &mut HashSet<NameId>,
    order: &mut Vec<package::Id>,
) {
    if !visited.insert(name) {
        return;
    }
    let Some(&pkg) = chosen.get(&name) else {
        return;
    };
    for dep in &db.package(pkg).meta.depends {
        if let Some(dep_name) = db.name_lookup(&dep.name) {
            visit(db, chosen, dep_name, visited, order);
        }
    }
    order.push(pkg);
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("no candidate for dependency: {0}")]
    NoCandidate(String),

    #[error("conflicting constraints for: {0}")]
    Conflicting(String),
}
