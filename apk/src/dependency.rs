// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::package::version;

/// Version comparison operator of a constrained [`Dependency`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Equal,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
}

impl Op {
    fn as_str(&self) -> &'static str {
        match self {
            Op::Equal => "=",
            Op::Less => "<",
            Op::Greater => ">",
            Op::LessEqual => "<=",
            Op::GreaterEqual => ">=",
        }
    }
}

/// A dependency on a package name, optionally constrained to
/// a version range (`name`, `name>=1.2`, `name=1.2-r0`, ..)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub constraint: Option<(Op, String)>,
}

impl Dependency {
    pub fn unversioned(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: None,
        }
    }

    /// Whether a package at `version` satisfies this dependency
    pub fn satisfied_by(&self, version: &str) -> bool {
        use std::cmp::Ordering;

        let Some((op, wanted)) = &self.constraint else {
            return true;
        };
        let ordering = version::compare(version, wanted);
        match op {
            Op::Equal => ordering == Ordering::Equal,
            Op::Less => ordering == Ordering::Less,
            Op::Greater => ordering == Ordering::Greater,
            Op::LessEqual => ordering != Ordering::Greater,
            Op::GreaterEqual => ordering != Ordering::Less,
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            Some((op, version)) => write!(f, "{}{}{version}", self.name, op.as_str()),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for Dependency {
    type Err = ParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        // two-character operators first so `>=` doesn't parse as `>`
        const OPS: [(&str, Op); 5] = [
            (">=", Op::GreaterEqual),
            ("<=", Op::LessEqual),
            ("=", Op::Equal),
            (">", Op::Greater),
            ("<", Op::Less),
        ];

        for (token, op) in OPS {
            if let Some(at) = input.find(token) {
                let name = &input[..at];
                let version = &input[at + token.len()..];
                if name.is_empty() {
                    return Err(ParseError::EmptyName);
                }
                if version.is_empty() {
                    return Err(ParseError::Malformed(input.to_owned()));
                }
                return Ok(Self {
                    name: name.to_owned(),
                    constraint: Some((op, version.to_owned())),
                });
            }
        }

        if input.is_empty() {
            return Err(ParseError::EmptyName);
        }
        if input.chars().any(char::is_whitespace) {
            return Err(ParseError::Malformed(input.to_owned()));
        }
        Ok(Self::unversioned(input))
    }
}

/// Parse the whitespace-separated contents of a world file
pub fn parse_world(input: &str) -> Result<Vec<Dependency>, ParseError> {
    input.split_whitespace().map(str::parse).collect()
}

/// Serialize dependencies back into world file form
pub fn format_world(deps: &[Dependency]) -> String {
    let mut line = deps
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    line.push('\n');
    line
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("empty dependency name")]
    EmptyName,

    #[error("malformed dependency: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_unversioned() {
        let dep: Dependency = "busybox".parse().unwrap();
        assert_eq!(dep.name, "busybox");
        assert_eq!(dep.constraint, None);
    }

    #[test]
    fn parse_constraints() {
        let dep: Dependency = "openssl>=3.0".parse().unwrap();
        assert_eq!(dep.constraint, Some((Op::GreaterEqual, "3.0".to_owned())));

        let dep: Dependency = "zlib=1.3-r1".parse().unwrap();
        assert_eq!(dep.constraint, Some((Op::Equal, "1.3-r1".to_owned())));

        let dep: Dependency = "musl<2".parse().unwrap();
        assert_eq!(dep.constraint, Some((Op::Less, "2".to_owned())));
    }

    #[test]
    fn display_round_trip() {
        for input in ["busybox", "openssl>=3.0", "zlib=1.3-r1", "musl<2", "acl>2.2"] {
            let dep: Dependency = input.parse().unwrap();
            assert_eq!(dep.to_string(), input);
        }
    }

    #[test]
    fn rejects_malformed() {
        assert!("".parse::<Dependency>().is_err());
        assert!(">=1.0".parse::<Dependency>().is_err());
        assert!("foo>=".parse::<Dependency>().is_err());
        assert!("foo bar".parse::<Dependency>().is_err());
    }

    #[test]
    fn satisfied_by() {
        let dep: Dependency = "foo>=1.2".parse().unwrap();
        assert!(dep.satisfied_by("1.2"));
        assert!(dep.satisfied_by("1.10"));
        assert!(!dep.satisfied_by("1.1"));

        let dep: Dependency = "foo=1.2".parse().unwrap();
        assert!(dep.satisfied_by("1.2"));
        assert!(!dep.satisfied_by("1.2.1"));

        let dep = Dependency::unversioned("foo");
        assert!(dep.satisfied_by("0.0.1"));
    }

    #[test]
    fn world_round_trip() {
        let world = parse_world("busybox openssl>=3.0\n").unwrap();
        assert_eq!(world.len(), 2);
        assert_eq!(format_world(&world), "busybox openssl>=3.0\n");
    }
}
