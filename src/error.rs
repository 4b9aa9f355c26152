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

//! Error types for store, cascade and aggregation operations.

use crate::base::{NameKind, RecordKey};
use crate::schema::Collection;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Ledger errors.
///
/// Every error carries an identifiable [`ErrorKind`] so callers can decide
/// how to present it. The core never retries on its own.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Malformed input: non-positive amount, missing field, bad name.
    #[error("invalid record: {0}")]
    Validation(String),

    /// A category or bank with this name already exists
    #[error("{kind} \"{name}\" already exists")]
    DuplicateName { kind: NameKind, name: String },

    /// Referenced key does not exist
    #[error("{collection} has no record {key}")]
    NotFound {
        collection: Collection,
        key: RecordKey,
    },

    /// Store is closed, being upgraded, or its snapshot cannot be written
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Schema upgrade failed or a backup carries an unsupported version
    #[error("schema upgrade failed: {0}")]
    SchemaUpgrade(String),

    /// A rename/delete cascade could not be applied as a unit
    #[error("cascade failed: {0}")]
    CascadeFailure(String),
}

/// Discriminant of [`LedgerError`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    DuplicateName,
    NotFound,
    StorageUnavailable,
    SchemaUpgrade,
    CascadeFailure,
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::DuplicateName { .. } => ErrorKind::DuplicateName,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            Self::SchemaUpgrade(_) => ErrorKind::SchemaUpgrade,
            Self::CascadeFailure(_) => ErrorKind::CascadeFailure,
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn not_found(collection: Collection, key: impl Into<RecordKey>) -> Self {
        Self::NotFound {
            collection,
            key: key.into(),
        }
    }

    /// Reports infrastructure failures inside a cascade as [`LedgerError::CascadeFailure`].
    ///
    /// Caller-facing rejections (validation, duplicates, missing keys) keep their kind.
    pub(crate) fn into_cascade_failure(self) -> Self {
        match self {
            Self::StorageUnavailable(reason) | Self::SchemaUpgrade(reason) => {
                Self::CascadeFailure(reason)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::RecordId;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            LedgerError::Validation("amount must be positive".into()).to_string(),
            "invalid record: amount must be positive"
        );
        assert_eq!(
            LedgerError::DuplicateName {
                kind: NameKind::Category,
                name: "Transport".into()
            }
            .to_string(),
            "category \"Transport\" already exists"
        );
        assert_eq!(
            LedgerError::not_found(Collection::Movements, RecordId(7)).to_string(),
            "movements has no record #7"
        );
        assert_eq!(
            LedgerError::not_found(Collection::Banks, RecordKey::name("BankX")).to_string(),
            "banks has no record \"BankX\""
        );
        assert_eq!(
            LedgerError::StorageUnavailable("store is closed".into()).to_string(),
            "storage unavailable: store is closed"
        );
        assert_eq!(
            LedgerError::SchemaUpgrade("unsupported backup version 2.0".into()).to_string(),
            "schema upgrade failed: unsupported backup version 2.0"
        );
        assert_eq!(
            LedgerError::CascadeFailure("snapshot write failed".into()).to_string(),
            "cascade failed: snapshot write failed"
        );
    }

    #[test]
    fn infrastructure_errors_become_cascade_failures() {
        let error = LedgerError::StorageUnavailable("disk full".into());
        assert_eq!(
            error.into_cascade_failure(),
            LedgerError::CascadeFailure("disk full".into())
        );

        let duplicate = LedgerError::DuplicateName {
            kind: NameKind::Bank,
            name: "A".into(),
        };
        assert_eq!(duplicate.clone().into_cascade_failure(), duplicate);
    }

    #[test]
    fn kinds_match_variants() {
        assert_eq!(
            LedgerError::validation("x").kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            LedgerError::CascadeFailure("x".into()).kind(),
            ErrorKind::CascadeFailure
        );
    }
}
