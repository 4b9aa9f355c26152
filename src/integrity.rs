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

//! Referential integrity for category and bank names.
//!
//! Movements and rules refer to categories and banks by name, so renaming or
//! deleting one has to rewrite every reference. Each cascade runs as a single
//! store transaction over the name collection, movements and rules: either
//! every reference moves or nothing does.
//!
//! Cascades scan the whole movement collection; there is no name index.

use crate::base::{NameKind, RecordKey};
use crate::error::{LedgerError, Result};
use crate::movement::MovementRecord;
use crate::record::{self, Bank, Category, Entry, Rule};
use crate::schema::Collection;
use crate::store::{Store, Transaction};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// What a rename or delete rewrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CascadeReport {
    pub kind: NameKind,
    pub from: String,
    pub to: String,
    /// Movements whose field was rewritten.
    pub movements: usize,
    /// Rules whose reference was rewritten.
    pub rules: usize,
}

impl CascadeReport {
    fn unchanged(kind: NameKind, name: &str) -> Self {
        Self {
            kind,
            from: name.to_string(),
            to: name.to_string(),
            movements: 0,
            rules: 0,
        }
    }
}

fn named_entry(kind: NameKind, name: &str) -> Entry {
    match kind {
        NameKind::Category => Category {
            name: name.to_string(),
        }
        .into(),
        NameKind::Bank => Bank {
            name: name.to_string(),
        }
        .into(),
    }
}

fn movement_name(kind: NameKind, movement: &MovementRecord) -> &str {
    match kind {
        NameKind::Category => &movement.category,
        NameKind::Bank => &movement.bank,
    }
}

fn movement_field(kind: NameKind, movement: &mut MovementRecord) -> &mut String {
    match kind {
        NameKind::Category => &mut movement.category,
        NameKind::Bank => &mut movement.bank,
    }
}

/// Points `rule` at `to` if it references `from`. Returns whether it changed.
fn retarget_rule(kind: NameKind, rule: &mut Rule, from: &str, to: &str) -> bool {
    match kind {
        NameKind::Category if rule.category == from => {
            rule.category = to.to_string();
            true
        }
        NameKind::Bank if rule.bank.as_deref() == Some(from) => {
            rule.bank = Some(to.to_string());
            true
        }
        _ => false,
    }
}

/// Rewrites every movement and rule reference from `from` to `to`.
fn cascade(tx: &mut Transaction<'_>, kind: NameKind, from: &str, to: &str) -> Result<(usize, usize)> {
    let mut movements = 0;
    for mut movement in tx.all::<MovementRecord>()? {
        let field = movement_field(kind, &mut movement);
        if field.as_str() == from {
            *field = to.to_string();
            tx.upsert(movement)?;
            movements += 1;
        }
    }

    let mut rules = 0;
    for mut rule in tx.all::<Rule>()? {
        if retarget_rule(kind, &mut rule, from, to) {
            tx.upsert(rule)?;
            rules += 1;
        }
    }

    Ok((movements, rules))
}

/// Keeps category and bank references consistent across collections.
#[derive(Debug, Clone)]
pub struct IntegrityManager {
    store: Arc<Store>,
}

impl IntegrityManager {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Registers a new category or bank.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Validation`] for a blank, padded or sentinel name.
    /// - [`LedgerError::DuplicateName`] if the name is taken.
    pub fn add(&self, kind: NameKind, name: &str) -> Result<()> {
        record::validate_name(name)?;
        self.store.create(named_entry(kind, name))?;
        info!(%kind, name, "registered");
        Ok(())
    }

    /// Registers `name` unless it exists already or is the sentinel.
    /// Returns whether a record was created.
    pub(crate) fn register_in(tx: &mut Transaction<'_>, kind: NameKind, name: &str) -> Result<bool> {
        if name == kind.sentinel() || tx.contains(kind.collection(), &RecordKey::name(name))? {
            return Ok(false);
        }
        tx.create(named_entry(kind, name))?;
        Ok(true)
    }

    /// Registered names in order.
    pub fn names(&self, kind: NameKind) -> Result<Vec<String>> {
        Ok(match kind {
            NameKind::Category => self
                .store
                .all::<Category>()?
                .into_iter()
                .map(|category| category.name)
                .collect(),
            NameKind::Bank => self
                .store
                .all::<Bank>()?
                .into_iter()
                .map(|bank| bank.name)
                .collect(),
        })
    }

    /// Number of movements referencing `name`.
    pub fn references(&self, kind: NameKind, name: &str) -> Result<usize> {
        Ok(self
            .store
            .all::<MovementRecord>()?
            .iter()
            .filter(|movement| movement_name(kind, movement) == name)
            .count())
    }

    /// Renames `old` to `new` and rewrites every movement and rule that
    /// references `old`.
    ///
    /// Renaming to the same name is a no-op.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Validation`] if `new` is blank, padded or a sentinel.
    /// - [`LedgerError::NotFound`] if `old` is not registered.
    /// - [`LedgerError::DuplicateName`] if `new` is already registered.
    /// - [`LedgerError::CascadeFailure`] if the store fails mid-cascade.
    ///   Nothing is applied in that case.
    pub fn rename(&self, kind: NameKind, old: &str, new: &str) -> Result<CascadeReport> {
        record::validate_name(new)?;
        if old == new {
            return Ok(CascadeReport::unchanged(kind, old));
        }

        let collection = kind.collection();
        let (movements, rules) = self
            .store
            .transaction(
                &[collection, Collection::Movements, Collection::Rules],
                |tx| {
                    let old_key = RecordKey::name(old);
                    if !tx.contains(collection, &old_key)? {
                        return Err(LedgerError::not_found(collection, old_key));
                    }
                    if tx.contains(collection, &RecordKey::name(new))? {
                        return Err(LedgerError::DuplicateName {
                            kind,
                            name: new.to_string(),
                        });
                    }

                    tx.delete(collection, &old_key)?;
                    tx.create(named_entry(kind, new))?;
                    cascade(tx, kind, old, new)
                },
            )
            .map_err(LedgerError::into_cascade_failure)?;

        info!(%kind, from = old, to = new, movements, rules, "renamed");
        Ok(CascadeReport {
            kind,
            from: old.to_string(),
            to: new.to_string(),
            movements,
            rules,
        })
    }

    /// Deletes `name` and reassigns every movement and rule that referenced
    /// it to the sentinel for `kind`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] if `name` is not registered.
    /// - [`LedgerError::CascadeFailure`] if the store fails mid-cascade.
    pub fn delete(&self, kind: NameKind, name: &str) -> Result<CascadeReport> {
        let collection = kind.collection();
        let sentinel = kind.sentinel();
        let (movements, rules) = self
            .store
            .transaction(
                &[collection, Collection::Movements, Collection::Rules],
                |tx| {
                    let key = RecordKey::name(name);
                    if tx.delete(collection, &key)?.is_none() {
                        return Err(LedgerError::not_found(collection, key));
                    }
                    cascade(tx, kind, name, sentinel)
                },
            )
            .map_err(LedgerError::into_cascade_failure)?;

        info!(%kind, name, movements, rules, to = sentinel, "deleted");
        Ok(CascadeReport {
            kind,
            from: name.to_string(),
            to: sentinel.to_string(),
            movements,
            rules,
        })
    }
}
