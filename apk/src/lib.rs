// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

pub use self::checksum::Checksum;
pub use self::client::Client;
pub use self::db::Database;
pub use self::dependency::Dependency;
pub use self::installation::Installation;
pub use self::package::Package;
pub use self::repository::Repository;

pub mod archive;
pub mod checksum;
pub mod client;
pub mod db;
pub mod dependency;
pub mod environment;
pub mod installation;
pub mod package;
pub mod repository;
pub mod request;
pub mod script;
pub mod transaction;
