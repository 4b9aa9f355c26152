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

//! # Ledger Store
//!
//! Core of a personal bookkeeping application: a transactional store of
//! movements, categories and banks, the cascades that keep names consistent
//! across them, and the balance views derived from the movement set.
//!
//! ## Core Components
//!
//! - [`Store`]: durable, transactional collections with ordered schema migrations
//! - [`IntegrityManager`]: rename/delete cascades for category and bank names
//! - [`Aggregator`]: per-bank, global, budget and currency views
//! - [`ConsistencyMonitor`]: refreshes views when the global or available balance collapses to zero
//! - [`Engine`]: command facade tying the pieces together
//! - [`LedgerError`]: error types for every operation
//!
//! ## Example
//!
//! ```
//! use chrono::NaiveDate;
//! use ledger_store_rs::{Engine, EntryKind, NewMovement};
//! use rust_decimal_macros::dec;
//!
//! let engine = Engine::in_memory();
//! let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
//!
//! engine
//!     .add_movement(NewMovement::new("Salary", dec!(5000), EntryKind::Income, date).bank("BankA"))
//!     .unwrap();
//! let outcome = engine
//!     .add_movement(NewMovement::new("Rent", dec!(1000), EntryKind::Expense, date).bank("BankA"))
//!     .unwrap();
//!
//! let views = outcome.views().unwrap();
//! assert_eq!(views.global_balance, dec!(4000));
//! assert_eq!(views.total_commission(), dec!(3.00));
//! assert_eq!(views.available_balance, dec!(3997.00));
//! ```
//!
//! ## Thread Safety
//!
//! Components share the store as `Arc<Store>`. Reads run concurrently; writes,
//! cascades and schema upgrades are serialized by the store lock.

pub mod aggregation;
pub mod backup;
mod base;
mod engine;
pub mod error;
pub mod integrity;
pub mod journal;
pub mod monitor;
pub mod movement;
pub mod numeral;
pub mod record;
pub mod schema;
pub mod settings;
pub mod store;

pub use aggregation::{
    Aggregator, BankSummary, BudgetLevel, CurrencyEquivalent, LedgerViews, Report, ReportFilter,
    ViewParams,
};
pub use backup::{BACKUP_VERSION, BackupDocument, ImportSummary};
pub use base::{INITIAL_BALANCE_KEY, NO_BANK, NameKind, RecordId, RecordKey, UNCATEGORIZED};
pub use engine::{CommandOutcome, Engine, Refreshed};
pub use error::{ErrorKind, LedgerError, Result};
pub use integrity::{CascadeReport, IntegrityManager};
pub use journal::{Journal, Mutation, Operation};
pub use monitor::{ConsistencyMonitor, MonitorReport, MonitorState, NoopSink, RefreshSink};
pub use movement::{EntryKind, MAX_AMOUNT, MovementKind, MovementRecord, NewMovement};
pub use numeral::NumberEntryMode;
pub use record::{Bank, Category, Entry, InitialBalance, Investment, Record, Reminder, Rule};
pub use schema::{Collection, Schema};
pub use settings::Settings;
pub use store::{Store, StoreOptions, Transaction};
