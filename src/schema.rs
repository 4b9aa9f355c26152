// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Collection catalogue and schema evolution.
//!
//! The schema is a set of collection names plus a version number that only
//! ever grows. Structural changes are expressed as an ordered list of
//! [`Migration`] steps. Applying a step twice is harmless: it only creates
//! collections that are still missing and never lowers the version.
//!
//! Collections owned by external collaborators (investments, reminders) are
//! not part of the migration list. They are created lazily through
//! [`Store::ensure_collection`](crate::Store::ensure_collection), which bumps
//! the version by one per collection.

use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Named collection of records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Movements,
    Categories,
    Banks,
    Rules,
    InitialBalance,
    Investments,
    Reminders,
}

/// How a collection assigns primary keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPolicy {
    /// Store assigns increasing [`RecordId`](crate::RecordId)s on insert.
    AutoIncrement,
    /// Key is the record's unique `name`.
    Name,
    /// Single row under a constant key.
    Fixed,
}

impl Collection {
    pub const ALL: [Collection; 7] = [
        Collection::Movements,
        Collection::Categories,
        Collection::Banks,
        Collection::Rules,
        Collection::InitialBalance,
        Collection::Investments,
        Collection::Reminders,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Movements => "movements",
            Self::Categories => "categories",
            Self::Banks => "banks",
            Self::Rules => "rules",
            Self::InitialBalance => "initial_balance",
            Self::Investments => "investments",
            Self::Reminders => "reminders",
        }
    }

    pub fn key_policy(self) -> KeyPolicy {
        match self {
            Self::Categories | Self::Banks => KeyPolicy::Name,
            Self::InitialBalance => KeyPolicy::Fixed,
            Self::Movements | Self::Rules | Self::Investments | Self::Reminders => {
                KeyPolicy::AutoIncrement
            }
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Collection {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|collection| collection.name() == s)
            .ok_or_else(|| LedgerError::validation(format!("unknown collection \"{s}\"")))
    }
}

/// One ordered schema evolution step.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub creates: &'static [Collection],
}

/// Migration steps applied, in order, every time a store is opened.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "ledger collections",
        creates: &[
            Collection::Movements,
            Collection::Categories,
            Collection::Banks,
        ],
    },
    Migration {
        version: 2,
        description: "classification rules and legacy initial balance",
        creates: &[Collection::Rules, Collection::InitialBalance],
    },
];

/// Process-wide collection metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct Schema {
    version: u32,
    collections: BTreeSet<Collection>,
}

impl Schema {
    /// Schema of a store that has never been opened.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn contains(&self, collection: Collection) -> bool {
        self.collections.contains(&collection)
    }

    pub fn collections(&self) -> impl Iterator<Item = Collection> + '_ {
        self.collections.iter().copied()
    }

    /// Applies one migration step.
    ///
    /// Returns the collections the step actually created. Replaying a step
    /// that was already applied creates nothing and leaves the version as is.
    pub fn apply(&mut self, migration: &Migration) -> Vec<Collection> {
        let created: Vec<Collection> = migration
            .creates
            .iter()
            .copied()
            .filter(|collection| self.collections.insert(*collection))
            .collect();
        self.version = self.version.max(migration.version);
        created
    }

    /// Applies every step of [`MIGRATIONS`] in order.
    pub fn migrate(&mut self) -> Vec<Collection> {
        MIGRATIONS
            .iter()
            .flat_map(|migration| self.apply(migration))
            .collect()
    }

    /// Adds a single collection as its own upgrade, bumping the version by one.
    ///
    /// # Errors
    ///
    /// [`LedgerError::SchemaUpgrade`] if the collection already exists or the
    /// version counter would overflow.
    pub fn add_collection(&mut self, collection: Collection) -> Result<u32> {
        if self.contains(collection) {
            return Err(LedgerError::SchemaUpgrade(format!(
                "collection {collection} already exists at version {}",
                self.version
            )));
        }
        let next = self.version.checked_add(1).ok_or_else(|| {
            LedgerError::SchemaUpgrade("schema version counter exhausted".into())
        })?;
        self.collections.insert(collection);
        self.version = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_creates_core_collections() {
        let mut schema = Schema::empty();
        let created = schema.migrate();

        assert_eq!(schema.version(), 2);
        assert_eq!(created.len(), 5);
        assert!(schema.contains(Collection::Movements));
        assert!(schema.contains(Collection::InitialBalance));
        assert!(!schema.contains(Collection::Investments));
    }

    #[test]
    fn migrations_are_replay_safe() {
        let mut schema = Schema::empty();
        schema.migrate();
        let before = schema.clone();

        assert!(schema.migrate().is_empty());
        assert_eq!(schema, before);
    }

    #[test]
    fn migration_never_lowers_version() {
        let mut schema = Schema::empty();
        schema.migrate();
        schema.add_collection(Collection::Investments).unwrap();
        schema.add_collection(Collection::Reminders).unwrap();
        assert_eq!(schema.version(), 4);

        schema.apply(&MIGRATIONS[0]);
        assert_eq!(schema.version(), 4);
    }

    #[test]
    fn add_existing_collection_is_rejected() {
        let mut schema = Schema::empty();
        schema.migrate();
        let result = schema.add_collection(Collection::Banks);
        assert!(matches!(result, Err(LedgerError::SchemaUpgrade(_))));
        assert_eq!(schema.version(), 2);
    }

    #[test]
    fn collection_names_round_trip() {
        for collection in Collection::ALL {
            assert_eq!(collection.name().parse::<Collection>().unwrap(), collection);
        }
        assert!("ledger".parse::<Collection>().is_err());
    }

    #[test]
    fn key_policies() {
        assert_eq!(Collection::Movements.key_policy(), KeyPolicy::AutoIncrement);
        assert_eq!(Collection::Banks.key_policy(), KeyPolicy::Name);
        assert_eq!(Collection::InitialBalance.key_policy(), KeyPolicy::Fixed);
    }
}
