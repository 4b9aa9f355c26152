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

//! Configuration key/value pairs.
//!
//! The core reads three keys: [`EXCHANGE_RATE`], [`NUMBER_ENTRY_MODE`] and
//! [`BUDGET_GOAL`]. Every other key (theme, lock PIN, reminder options)
//! belongs to external collaborators and is only stored and carried through
//! backups.

use crate::error::{LedgerError, Result};
use crate::numeral::{self, NumberEntryMode};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::warn;

pub const EXCHANGE_RATE: &str = "exchangeRate";
pub const NUMBER_ENTRY_MODE: &str = "numberEntryMode";
pub const BUDGET_GOAL: &str = "budgetGoal";

/// Thread-safe settings map.
#[derive(Debug, Default)]
pub struct Settings {
    values: DashMap<String, String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: BTreeMap<String, String>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }

    /// Loads settings from a JSON object file. A missing file yields empty settings.
    ///
    /// # Errors
    ///
    /// [`LedgerError::StorageUnavailable`] if the file exists but cannot be
    /// read or decoded.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let text = fs::read_to_string(path).map_err(|e| {
            LedgerError::StorageUnavailable(format!("failed to read {}: {e}", path.display()))
        })?;
        let values: BTreeMap<String, String> = serde_json::from_str(&text).map_err(|e| {
            LedgerError::StorageUnavailable(format!("failed to decode {}: {e}", path.display()))
        })?;
        Ok(Self::from_map(values))
    }

    /// # Errors
    ///
    /// [`LedgerError::StorageUnavailable`] if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.snapshot()).map_err(|e| {
            LedgerError::StorageUnavailable(format!("failed to encode settings: {e}"))
        })?;
        fs::write(path, text).map_err(|e| {
            LedgerError::StorageUnavailable(format!("failed to write {}: {e}", path.display()))
        })
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|value| value.value().clone())
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.values.remove(key).map(|(_, value)| value)
    }

    /// Sorted copy of every pair.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .map(|pair| (pair.key().clone(), pair.value().clone()))
            .collect()
    }

    /// Replaces every pair at once.
    pub fn replace_all(&self, values: BTreeMap<String, String>) {
        self.values.clear();
        for (key, value) in values {
            self.values.insert(key, value);
        }
    }

    /// Raw exchange rate text, as the user entered it.
    pub fn exchange_rate(&self) -> Option<String> {
        self.get(EXCHANGE_RATE)
    }

    /// Configured entry mode. Unknown values fall back to automatic.
    pub fn number_entry_mode(&self) -> NumberEntryMode {
        match self.get(NUMBER_ENTRY_MODE) {
            None => NumberEntryMode::default(),
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(value = %raw, "unknown number entry mode, using automatic");
                NumberEntryMode::default()
            }),
        }
    }

    pub fn set_number_entry_mode(&self, mode: NumberEntryMode) {
        self.set(NUMBER_ENTRY_MODE, mode.to_string());
    }

    /// Budget goal for the trailing 30-day window. Unparseable goals read as unset.
    pub fn budget_goal(&self) -> Option<Decimal> {
        self.get(BUDGET_GOAL)
            .and_then(|raw| numeral::parse_decimal(&raw))
    }

    /// # Errors
    ///
    /// [`LedgerError::Validation`] if the goal is negative.
    pub fn set_budget_goal(&self, goal: Decimal) -> Result<()> {
        if goal < Decimal::ZERO {
            return Err(LedgerError::validation("budget goal cannot be negative"));
        }
        self.set(BUDGET_GOAL, goal.to_string());
        Ok(())
    }
}
