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

//! Typed records for every collection.
//!
//! The store keeps [`Entry`] values, a tagged union with one variant per
//! collection. Callers work with the concrete record types through the
//! [`Record`] trait, which converts to and from the tagged form.

use crate::base::{INITIAL_BALANCE_KEY, NO_BANK, RecordId, RecordKey, UNCATEGORIZED};
use crate::error::{LedgerError, Result};
use crate::movement::MovementRecord;
use crate::schema::Collection;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Expense/income category, keyed by its unique name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Category {
    pub name: String,
}

/// Bank account, keyed by its unique name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Bank {
    pub name: String,
}

/// Keyword classification rule. Interpreted by external classification logic.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Rule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub keyword: String,
    pub category: String,
    /// `None` applies the rule to any bank.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank: Option<String>,
}

/// Legacy single-row opening balance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InitialBalance {
    pub amount: Decimal,
}

/// Investment position owned by the price simulator.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Investment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub name: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Reminder owned by the notification scheduler.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Reminder {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<NaiveDate>,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// A record of any collection, tagged with the collection it belongs to.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", content = "record", rename_all = "snake_case")]
pub enum Entry {
    Movement(MovementRecord),
    Category(Category),
    Bank(Bank),
    Rule(Rule),
    InitialBalance(InitialBalance),
    Investment(Investment),
    Reminder(Reminder),
}

impl Entry {
    pub fn collection(&self) -> Collection {
        match self {
            Self::Movement(_) => Collection::Movements,
            Self::Category(_) => Collection::Categories,
            Self::Bank(_) => Collection::Banks,
            Self::Rule(_) => Collection::Rules,
            Self::InitialBalance(_) => Collection::InitialBalance,
            Self::Investment(_) => Collection::Investments,
            Self::Reminder(_) => Collection::Reminders,
        }
    }

    /// Primary key, or `None` for an auto-keyed record not yet inserted.
    pub fn key(&self) -> Option<RecordKey> {
        match self {
            Self::Movement(record) => record.id.map(RecordKey::Id),
            Self::Category(category) => Some(RecordKey::name(&category.name)),
            Self::Bank(bank) => Some(RecordKey::name(&bank.name)),
            Self::Rule(rule) => rule.id.map(RecordKey::Id),
            Self::InitialBalance(_) => Some(RecordKey::name(INITIAL_BALANCE_KEY)),
            Self::Investment(investment) => investment.id.map(RecordKey::Id),
            Self::Reminder(reminder) => reminder.id.map(RecordKey::Id),
        }
    }

    /// Stamps a store-assigned id on an auto-keyed record.
    pub(crate) fn assign_id(&mut self, id: RecordId) {
        match self {
            Self::Movement(record) => record.id = Some(id),
            Self::Rule(rule) => rule.id = Some(id),
            Self::Investment(investment) => investment.id = Some(id),
            Self::Reminder(reminder) => reminder.id = Some(id),
            Self::Category(_) | Self::Bank(_) | Self::InitialBalance(_) => {}
        }
    }

    /// Checks the record before it is written.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Validation`] describing the first broken rule.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Movement(record) => record.validate(),
            Self::Category(category) => validate_name(&category.name),
            Self::Bank(bank) => validate_name(&bank.name),
            Self::Rule(rule) => {
                if rule.keyword.trim().is_empty() {
                    return Err(LedgerError::validation("rule keyword is required"));
                }
                if rule.category.trim().is_empty() {
                    return Err(LedgerError::validation("rule category is required"));
                }
                Ok(())
            }
            Self::InitialBalance(balance) if balance.amount <= Decimal::ZERO => Err(
                LedgerError::validation("initial balance must be greater than zero"),
            ),
            Self::InitialBalance(_) => Ok(()),
            Self::Investment(investment) if investment.name.trim().is_empty() => {
                Err(LedgerError::validation("investment name is required"))
            }
            Self::Reminder(reminder) if reminder.title.trim().is_empty() => {
                Err(LedgerError::validation("reminder title is required"))
            }
            Self::Investment(_) | Self::Reminder(_) => Ok(()),
        }
    }
}

/// Rejects blank, padded and sentinel names.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(LedgerError::validation("name is required"));
    }
    if name.trim() != name {
        return Err(LedgerError::validation(format!(
            "name \"{name}\" has surrounding whitespace"
        )));
    }
    if name == UNCATEGORIZED || name == NO_BANK {
        return Err(LedgerError::validation(format!("\"{name}\" is reserved")));
    }
    Ok(())
}

/// Conversion between a concrete record type and [`Entry`].
pub trait Record: Sized {
    const COLLECTION: Collection;

    fn into_entry(self) -> Entry;

    fn from_entry(entry: Entry) -> Option<Self>;
}

macro_rules! impl_record {
    ($record:ty, $variant:ident, $collection:expr) => {
        impl Record for $record {
            const COLLECTION: Collection = $collection;

            fn into_entry(self) -> Entry {
                Entry::$variant(self)
            }

            fn from_entry(entry: Entry) -> Option<Self> {
                match entry {
                    Entry::$variant(record) => Some(record),
                    _ => None,
                }
            }
        }

        impl From<$record> for Entry {
            fn from(record: $record) -> Self {
                Entry::$variant(record)
            }
        }
    };
}

impl_record!(MovementRecord, Movement, Collection::Movements);
impl_record!(Category, Category, Collection::Categories);
impl_record!(Bank, Bank, Collection::Banks);
impl_record!(Rule, Rule, Collection::Rules);
impl_record!(InitialBalance, InitialBalance, Collection::InitialBalance);
impl_record!(Investment, Investment, Collection::Investments);
impl_record!(Reminder, Reminder, Collection::Reminders);
