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

//! Core identifier types, record keys and reference sentinels.

use crate::schema::Collection;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category assigned to movements whose category was removed or never set.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Bank assigned to movements whose bank was removed or never set.
pub const NO_BANK: &str = "(No bank)";

/// Fixed key of the single-row `initial_balance` collection.
pub const INITIAL_BALANCE_KEY: &str = "balance";

/// Surrogate key assigned by the store to auto-keyed collections.
///
/// Identifiers are never reused within a collection, even after deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Primary key of a stored record.
///
/// Auto-keyed collections use [`RecordKey::Id`]; name-keyed and fixed-key
/// collections use [`RecordKey::Name`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RecordKey {
    Id(RecordId),
    Name(String),
}

impl RecordKey {
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    pub fn id(&self) -> Option<RecordId> {
        match self {
            Self::Id(id) => Some(*id),
            Self::Name(_) => None,
        }
    }
}

impl From<RecordId> for RecordKey {
    fn from(id: RecordId) -> Self {
        Self::Id(id)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "#{id}"),
            Self::Name(name) => write!(f, "\"{name}\""),
        }
    }
}

/// The two kinds of named entity that movements reference by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NameKind {
    Category,
    Bank,
}

impl NameKind {
    /// Placeholder written into movements that lose their reference.
    pub fn sentinel(self) -> &'static str {
        match self {
            Self::Category => UNCATEGORIZED,
            Self::Bank => NO_BANK,
        }
    }

    /// Collection holding the named records of this kind.
    pub fn collection(self) -> Collection {
        match self {
            Self::Category => Collection::Categories,
            Self::Bank => Collection::Banks,
        }
    }

    pub(crate) fn for_collection(collection: Collection) -> Option<Self> {
        match collection {
            Collection::Categories => Some(Self::Category),
            Collection::Banks => Some(Self::Bank),
            _ => None,
        }
    }
}

impl fmt::Display for NameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Category => f.write_str("category"),
            Self::Bank => f.write_str("bank"),
        }
    }
}
