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

//! Backup export and import.
//!
//! A backup is one JSON document holding every collection and the full
//! settings map:
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "exportedAt": "2025-06-01T09:30:00",
//!   "movements": [...],
//!   "categories": [...],
//!   "banks": [...],
//!   "rules": [...],
//!   "initialBalance": { "amount": "1500" },
//!   "investments": [...],
//!   "reminders": [...],
//!   "settings": { "exchangeRate": "36.5", "theme": "dark" }
//! }
//! ```
//!
//! Import checks the version before anything else, validates every record,
//! then replaces all collections in a single transaction. A key that appears
//! twice rejects the whole import. Category and bank names that movements
//! reference but the backup does not list are registered in the same
//! transaction. Settings are replaced only once the store has committed.

use crate::base::NameKind;
use crate::error::{LedgerError, Result};
use crate::integrity::IntegrityManager;
use crate::movement::MovementRecord;
use crate::record::{Bank, Category, Entry, InitialBalance, Investment, Reminder, Rule};
use crate::schema::Collection;
use crate::settings::Settings;
use crate::store::Store;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// The only backup format this crate reads and writes.
pub const BACKUP_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupDocument {
    pub version: String,
    pub exported_at: NaiveDateTime,
    #[serde(default)]
    pub movements: Vec<MovementRecord>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub banks: Vec<Bank>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_balance: Option<InitialBalance>,
    #[serde(default)]
    pub investments: Vec<Investment>,
    #[serde(default)]
    pub reminders: Vec<Reminder>,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

/// Records written by an import, per collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ImportSummary {
    pub movements: usize,
    pub categories: usize,
    pub banks: usize,
    pub rules: usize,
    pub investments: usize,
    pub reminders: usize,
    pub settings: usize,
    /// Category and bank names registered because movements referenced them.
    pub registered: usize,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: Option<String>,
}

fn check_version(version: Option<&str>) -> Result<()> {
    match version {
        Some(BACKUP_VERSION) => Ok(()),
        Some(other) => Err(LedgerError::SchemaUpgrade(format!(
            "unsupported backup version {other}, expected {BACKUP_VERSION}"
        ))),
        None => Err(LedgerError::SchemaUpgrade(
            "backup carries no version".into(),
        )),
    }
}

impl BackupDocument {
    /// Parses a backup, checking its version first.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::SchemaUpgrade`] if the version is missing or unsupported.
    /// - [`LedgerError::Validation`] if the document is malformed.
    pub fn from_json(text: &str) -> Result<Self> {
        let probe: VersionProbe = serde_json::from_str(text)
            .map_err(|e| LedgerError::validation(format!("backup is not valid JSON: {e}")))?;
        check_version(probe.version.as_deref())?;
        serde_json::from_str(text)
            .map_err(|e| LedgerError::validation(format!("malformed backup: {e}")))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            LedgerError::StorageUnavailable(format!("failed to encode backup: {e}"))
        })
    }

    fn entries(&self) -> impl Iterator<Item = Entry> + '_ {
        let movements = self.movements.iter().cloned().map(Entry::from);
        let categories = self.categories.iter().cloned().map(Entry::from);
        let banks = self.banks.iter().cloned().map(Entry::from);
        let rules = self.rules.iter().cloned().map(Entry::from);
        let balance = self.initial_balance.iter().cloned().map(Entry::from);
        let investments = self.investments.iter().cloned().map(Entry::from);
        let reminders = self.reminders.iter().cloned().map(Entry::from);
        movements
            .chain(categories)
            .chain(banks)
            .chain(rules)
            .chain(balance)
            .chain(investments)
            .chain(reminders)
    }

    /// Checks the version, then every record.
    pub fn validate(&self) -> Result<()> {
        check_version(Some(&self.version))?;
        self.entries().try_for_each(|entry| entry.validate())
    }
}

/// Captures every collection and setting in one consistent read.
pub fn export(store: &Store, settings: &Settings, exported_at: NaiveDateTime) -> Result<BackupDocument> {
    let scope: Vec<Collection> = store.schema()?.collections().collect();
    let has = |collection| scope.contains(&collection);

    let mut document = store.transaction(&scope, |tx| {
        Ok(BackupDocument {
            version: BACKUP_VERSION.to_string(),
            exported_at,
            movements: tx.all()?,
            categories: tx.all()?,
            banks: tx.all()?,
            rules: tx.all()?,
            initial_balance: tx.all::<InitialBalance>()?.into_iter().next(),
            investments: if has(Collection::Investments) { tx.all()? } else { Vec::new() },
            reminders: if has(Collection::Reminders) { tx.all()? } else { Vec::new() },
            settings: BTreeMap::new(),
        })
    })?;
    document.settings = settings.snapshot();

    info!(
        movements = document.movements.len(),
        settings = document.settings.len(),
        "backup exported"
    );
    Ok(document)
}

/// Replaces every collection and setting with the contents of `document`.
///
/// Collections the backup needs but the schema lacks are created first.
///
/// # Errors
///
/// - [`LedgerError::SchemaUpgrade`] for an unsupported version. Nothing is
///   changed.
/// - [`LedgerError::Validation`] for an invalid record or a key that appears
///   more than once. Nothing is changed.
/// - Any store error; the store is left as it was and settings untouched.
pub fn import(store: &Store, settings: &Settings, document: BackupDocument) -> Result<ImportSummary> {
    document.validate()?;

    if !document.investments.is_empty() {
        store.ensure_collection(Collection::Investments)?;
    }
    if !document.reminders.is_empty() {
        store.ensure_collection(Collection::Reminders)?;
    }

    let scope: Vec<Collection> = store.schema()?.collections().collect();
    let BackupDocument {
        movements,
        categories,
        banks,
        rules,
        initial_balance,
        investments,
        reminders,
        settings: values,
        ..
    } = document;

    let mut summary = ImportSummary {
        movements: movements.len(),
        categories: categories.len(),
        banks: banks.len(),
        rules: rules.len(),
        investments: investments.len(),
        reminders: reminders.len(),
        settings: values.len(),
        registered: 0,
    };
    let referenced: Vec<(NameKind, String)> = movements
        .iter()
        .flat_map(|movement| {
            [
                (NameKind::Category, movement.category.clone()),
                (NameKind::Bank, movement.bank.clone()),
            ]
        })
        .collect();

    summary.registered = store.transaction(&scope, |tx| {
        for collection in &scope {
            tx.clear(*collection)?;
        }
        let entries = movements
            .into_iter()
            .map(Entry::from)
            .chain(categories.into_iter().map(Entry::from))
            .chain(banks.into_iter().map(Entry::from))
            .chain(rules.into_iter().map(Entry::from))
            .chain(initial_balance.into_iter().map(Entry::from))
            .chain(investments.into_iter().map(Entry::from))
            .chain(reminders.into_iter().map(Entry::from));
        for entry in entries {
            if let Some(key) = entry.key() {
                if tx.contains(entry.collection(), &key)? {
                    return Err(LedgerError::validation(format!(
                        "backup holds {} record {key} more than once",
                        entry.collection()
                    )));
                }
            }
            tx.upsert(entry)?;
        }

        let mut registered = 0;
        for (kind, name) in &referenced {
            if IntegrityManager::register_in(tx, *kind, name)? {
                registered += 1;
            }
        }
        Ok(registered)
    })?;

    settings.replace_all(values);

    info!(?summary, "backup imported");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_version_is_a_schema_error() {
        let error = BackupDocument::from_json(
            r#"{"version":"2.0","exportedAt":"2025-01-01T00:00:00"}"#,
        )
        .unwrap_err();
        assert!(matches!(error, LedgerError::SchemaUpgrade(_)));
    }

    #[test]
    fn missing_version_is_a_schema_error() {
        let error = BackupDocument::from_json(r#"{"movements":[]}"#).unwrap_err();
        assert!(matches!(error, LedgerError::SchemaUpgrade(_)));
    }

    #[test]
    fn minimal_document_parses() {
        let document = BackupDocument::from_json(
            r#"{"version":"1.0","exportedAt":"2025-01-01T00:00:00","settings":{"theme":"dark"}}"#,
        )
        .unwrap();
        assert!(document.movements.is_empty());
        assert_eq!(document.settings["theme"], "dark");
        assert!(document.validate().is_ok());
    }
}
