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

//! Ledger movements.
//!
//! A movement is a single income or expense entry against a bank and a
//! category. Initial bank balances are stored as income whose concept carries
//! the [`INITIAL_BALANCE_MARKER`].
//!
//! # Example
//!
//! ```
//! use chrono::NaiveDate;
//! use ledger_store_rs::{EntryKind, NewMovement};
//! use rust_decimal_macros::dec;
//!
//! let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
//! let record = NewMovement::new("Rent", dec!(1000), EntryKind::Expense, date)
//!     .bank("BankA")
//!     .into_record()
//!     .unwrap();
//! assert_eq!(record.commission, dec!(3.00));
//! assert_eq!(record.category, "Uncategorized");
//! ```

use crate::base::{NO_BANK, RecordId, UNCATEGORIZED};
use crate::error::{LedgerError, Result};
use crate::numeral::{self, NumberEntryMode};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Commission charged on every expense, captured at write time.
pub const COMMISSION_RATE: Decimal = dec!(0.003);

/// Largest amount a single movement may carry. Keeps ledger-wide sums far
/// below [`Decimal::MAX`].
pub const MAX_AMOUNT: Decimal = dec!(1000000000000000);

/// Concept marker identifying initial-balance movements.
pub const INITIAL_BALANCE_MARKER: &str = "(Initial balance:";

/// Direction of a stored movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementKind {
    Income,
    Expense,
}

impl fmt::Display for MovementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Income => f.write_str("income"),
            Self::Expense => f.write_str("expense"),
        }
    }
}

/// Kind of entry as chosen by the user, before it is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Income,
    Expense,
    InitialBalance,
}

impl std::str::FromStr for EntryKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "income" => Ok(Self::Income),
            "expense" => Ok(Self::Expense),
            "initial_balance" | "initial" => Ok(Self::InitialBalance),
            other => Err(LedgerError::validation(format!(
                "unknown movement kind \"{other}\""
            ))),
        }
    }
}

/// A stored ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MovementRecord {
    /// Assigned by the store on insert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub concept: String,
    pub amount: Decimal,
    pub kind: MovementKind,
    pub category: String,
    pub bank: String,
    pub date: NaiveDateTime,
    pub commission: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_amount_text: Option<String>,
}

impl MovementRecord {
    /// Commission owed for a movement of this kind and amount.
    pub fn commission_for(kind: MovementKind, amount: Decimal) -> Decimal {
        match kind {
            MovementKind::Expense => amount * COMMISSION_RATE,
            MovementKind::Income => Decimal::ZERO,
        }
    }

    /// Noon of `date`, the wall-clock time every movement is pinned to.
    pub fn noon(date: NaiveDate) -> NaiveDateTime {
        date.and_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN))
    }

    pub fn is_initial_balance(&self) -> bool {
        self.kind == MovementKind::Income && self.concept.contains(INITIAL_BALANCE_MARKER)
    }

    pub fn is_expense(&self) -> bool {
        self.kind == MovementKind::Expense
    }

    /// Checks the per-record invariants.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Validation`] if the amount is not positive or above
    /// [`MAX_AMOUNT`], a text field is blank, or the stored commission
    /// disagrees with the kind or the amount.
    pub fn validate(&self) -> Result<()> {
        if self.amount <= Decimal::ZERO {
            return Err(LedgerError::validation("amount must be greater than zero"));
        }
        if self.amount > MAX_AMOUNT {
            return Err(LedgerError::validation(format!(
                "amount must not exceed {MAX_AMOUNT}"
            )));
        }
        if self.concept.trim().is_empty() {
            return Err(LedgerError::validation("concept is required"));
        }
        if self.category.trim().is_empty() {
            return Err(LedgerError::validation("category is required"));
        }
        if self.bank.trim().is_empty() {
            return Err(LedgerError::validation("bank is required"));
        }
        if self.commission < Decimal::ZERO {
            return Err(LedgerError::validation("commission cannot be negative"));
        }
        if self.commission > self.amount {
            return Err(LedgerError::validation("commission cannot exceed the amount"));
        }
        if self.kind == MovementKind::Income && !self.commission.is_zero() {
            return Err(LedgerError::validation("income carries no commission"));
        }
        Ok(())
    }
}

/// Input for creating or replacing a movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMovement {
    pub concept: String,
    pub amount: Decimal,
    pub kind: EntryKind,
    pub category: Option<String>,
    pub bank: Option<String>,
    pub date: NaiveDate,
    pub raw_amount_text: Option<String>,
}

impl NewMovement {
    pub fn new(concept: impl Into<String>, amount: Decimal, kind: EntryKind, date: NaiveDate) -> Self {
        Self {
            concept: concept.into(),
            amount,
            kind,
            category: None,
            bank: None,
            date,
            raw_amount_text: None,
        }
    }

    /// Builds the input from amount text typed by the user.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Validation`] if the text does not parse in `mode`.
    pub fn from_text(
        concept: impl Into<String>,
        amount_text: &str,
        mode: NumberEntryMode,
        kind: EntryKind,
        date: NaiveDate,
    ) -> Result<Self> {
        let parsed = numeral::parse_amount(amount_text, mode)?;
        let mut movement = Self::new(concept, parsed.amount, kind, date);
        movement.raw_amount_text = parsed.raw_text;
        Ok(movement)
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn bank(mut self, bank: impl Into<String>) -> Self {
        self.bank = Some(bank.into());
        self
    }

    /// Resolved category, falling back to the sentinel.
    pub fn category_name(&self) -> String {
        non_blank(self.category.as_deref()).unwrap_or(UNCATEGORIZED).to_string()
    }

    /// Resolved bank, falling back to the sentinel.
    pub fn bank_name(&self) -> String {
        non_blank(self.bank.as_deref()).unwrap_or(NO_BANK).to_string()
    }

    /// Converts the input into a validated record without an id.
    ///
    /// The commission is computed here, once.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Validation`] if the record breaks an invariant.
    pub fn into_record(self) -> Result<MovementRecord> {
        let concept = self.concept.trim().to_string();
        if concept.is_empty() {
            return Err(LedgerError::validation("concept is required"));
        }

        let category = self.category_name();
        let bank = self.bank_name();
        let (kind, concept) = match self.kind {
            EntryKind::Income => (MovementKind::Income, concept),
            EntryKind::Expense => (MovementKind::Expense, concept),
            EntryKind::InitialBalance => (
                MovementKind::Income,
                format!("{concept} {INITIAL_BALANCE_MARKER} {bank})"),
            ),
        };

        let record = MovementRecord {
            id: None,
            concept,
            amount: self.amount,
            kind,
            category,
            bank,
            date: MovementRecord::noon(self.date),
            commission: MovementRecord::commission_for(kind, self.amount),
            raw_amount_text: self.raw_amount_text,
        };
        record.validate()?;
        Ok(record)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
