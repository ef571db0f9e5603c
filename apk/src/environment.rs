// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

/// World file, one line of top-level dependencies
pub const WORLD_FILE: &str = "var/lib/apk/world";
/// Installed-packages database, line oriented text
pub const INSTALLED_DB_FILE: &str = "var/lib/apk/installed";
/// Concatenated package scripts, binary
pub const SCRIPTS_FILE: &str = "var/lib/apk/scripts";
/// Configured repositories, one URL per line
pub const REPOSITORIES_FILE: &str = "etc/apk/repositories";
/// Index file served at the top of every repository
pub const INDEX_FILE: &str = "APK_INDEX.gz";
/// Repository slots available per database; also the width of `Package::repos`
pub const MAX_REPOS: usize = 32;
/// Default protected path rules, `:`-separated, `-` clears
pub const DEFAULT_PROTECTED_PATHS: &str = "etc:-etc/init.d";
/// Dependencies seeded into a freshly created world
pub const BASE_WORLD: &str = "busybox";
/// The base layout owner allowed to lose files to other packages
pub const BASE_OWNER: &str = "busybox";
/// Buffer size used when reading a file, 16KiB
pub const FILE_READ_BUFFER_SIZE: usize = 16 * 1024;
