// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::fmt;

use crate::environment;

/// A configured package source. The slot a repository occupies in the
/// database doubles as its bit position in [`Package::repos`](crate::Package).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub url: String,
}

impl Repository {
    pub fn new(url: impl Into<String>) -> Self {
        let mut url: String = url.into();
        while url.ends_with('/') {
            url.pop();
        }
        Self { url }
    }

    /// Location of the index file
    pub fn index_url(&self) -> String {
        format!("{}/{}", self.url, environment::INDEX_FILE)
    }

    /// Location of a package archive within this repository
    pub fn package_url(&self, archive_name: &str) -> String {
        format!("{}/{archive_name}", self.url)
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn urls() {
        let repo = Repository::new("https://mirror.example.org/main/");
        assert_eq!(
            repo.index_url(),
            "https://mirror.example.org/main/APK_INDEX.gz"
        );
        assert_eq!(
            repo.package_url("busybox-1.36.1-r0.apk"),
            "https://mirror.example.org/main/busybox-1.36.1-r0.apk"
        );
    }
}
