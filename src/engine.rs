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

//! Command facade.
//!
//! The [`Engine`] is what a front end talks to. It owns the shared store,
//! the settings map and the three services built on the store, and runs
//! every command the same way:
//!
//! 1. apply the change in one store transaction,
//! 2. recompute every derived view,
//! 3. hand the views to the [`ConsistencyMonitor`].
//!
//! Mutating commands return a [`CommandOutcome`] carrying the fresh views,
//! so callers never render stale balances. Once step 1 has committed the
//! command succeeds; a failure in steps 2 or 3 is reported inside the
//! outcome, never as the command's error.
//!
//! # Thread Safety
//!
//! `Engine` is `Send + Sync`. Commands issued from several threads are
//! serialized by the store lock.

use crate::aggregation::{Aggregator, LedgerViews, Report, ReportFilter, ViewParams};
use crate::backup::{self, BackupDocument, ImportSummary};
use crate::base::{INITIAL_BALANCE_KEY, NameKind, RecordId, RecordKey};
use crate::error::{LedgerError, Result};
use crate::integrity::{CascadeReport, IntegrityManager};
use crate::monitor::{ConsistencyMonitor, MonitorReport, NoopSink, RefreshSink};
use crate::movement::{MovementRecord, NewMovement};
use crate::record::{InitialBalance, Investment, Record, Reminder, Rule};
use crate::schema::Collection;
use crate::settings::Settings;
use crate::store::Store;
use chrono::{Local, NaiveDateTime};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Views recomputed after a command, with the monitor's verdict on them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refreshed {
    pub views: LedgerViews,
    pub monitor: MonitorReport,
}

/// Result of a committed mutating command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome<T> {
    /// What the command wrote. Always durable.
    pub value: T,
    /// Recomputation after the commit. An error here leaves `value` committed.
    pub refreshed: Result<Refreshed>,
}

impl<T> CommandOutcome<T> {
    /// The fresh views, or the error that prevented computing them.
    pub fn views(&self) -> Result<&LedgerViews> {
        self.refreshed
            .as_ref()
            .map(|refreshed| &refreshed.views)
            .map_err(Clone::clone)
    }

    pub fn monitor(&self) -> Option<&MonitorReport> {
        self.refreshed.as_ref().ok().map(|refreshed| &refreshed.monitor)
    }
}

/// Bookkeeping command facade over a shared [`Store`].
pub struct Engine {
    store: Arc<Store>,
    settings: Arc<Settings>,
    integrity: IntegrityManager,
    aggregator: Aggregator,
    monitor: ConsistencyMonitor,
    sink: Arc<dyn RefreshSink>,
    clock: Clock,
}

impl Engine {
    pub fn new(store: Arc<Store>, settings: Arc<Settings>) -> Self {
        Engine {
            integrity: IntegrityManager::new(Arc::clone(&store)),
            aggregator: Aggregator::new(Arc::clone(&store)),
            store,
            settings,
            monitor: ConsistencyMonitor::new(),
            sink: Arc::new(NoopSink),
            clock: Arc::new(|| Local::now().naive_local()),
        }
    }

    /// An engine over a fresh in-memory store with empty settings.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(Store::in_memory()), Arc::new(Settings::new()))
    }

    /// Sends monitor refreshes to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn RefreshSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Replaces the wall clock used for the budget window.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> NaiveDateTime + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn integrity(&self) -> &IntegrityManager {
        &self.integrity
    }

    pub fn now(&self) -> NaiveDateTime {
        (self.clock)()
    }

    pub fn view_params(&self) -> ViewParams {
        ViewParams {
            now: self.now(),
            exchange_rate: self.settings.exchange_rate(),
            budget_goal: self.settings.budget_goal(),
        }
    }

    /// Every derived view, computed from the store right now.
    pub fn views(&self) -> Result<LedgerViews> {
        self.aggregator.views(&self.view_params())
    }

    /// Recomputes the views and runs the consistency monitor over them.
    pub fn refresh(&self) -> Result<(LedgerViews, MonitorReport)> {
        let views = self.views()?;
        let report = self
            .monitor
            .inspect(&views, || self.views(), self.sink.as_ref())?;
        Ok((views, report))
    }

    fn finish<T>(&self, value: T) -> CommandOutcome<T> {
        let refreshed = self
            .refresh()
            .map(|(views, monitor)| Refreshed { views, monitor })
            .inspect_err(|error| warn!(%error, "command committed but views were not refreshed"));
        CommandOutcome { value, refreshed }
    }

    /// Records a movement, registering its category and bank if they are new.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Validation`] if the movement is malformed.
    /// - [`LedgerError::StorageUnavailable`] if the store is closed or busy.
    pub fn add_movement(&self, movement: NewMovement) -> Result<CommandOutcome<RecordId>> {
        let record = movement.into_record()?;
        let key = self.store.transaction(
            &[Collection::Movements, Collection::Categories, Collection::Banks],
            |tx| {
                IntegrityManager::register_in(tx, NameKind::Category, &record.category)?;
                IntegrityManager::register_in(tx, NameKind::Bank, &record.bank)?;
                tx.create(record)
            },
        )?;
        let id = key
            .id()
            .ok_or_else(|| LedgerError::StorageUnavailable(format!("movement stored at {key}")))?;

        info!(%id, "movement added");
        Ok(self.finish(id))
    }

    /// Replaces movement `id`. The commission is recomputed from the new amount.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if no movement has this id.
    pub fn update_movement(&self, id: RecordId, movement: NewMovement) -> Result<CommandOutcome<()>> {
        let mut record = movement.into_record()?;
        record.id = Some(id);
        self.store.transaction(
            &[Collection::Movements, Collection::Categories, Collection::Banks],
            |tx| {
                if !tx.contains(Collection::Movements, &RecordKey::Id(id))? {
                    return Err(LedgerError::not_found(Collection::Movements, id));
                }
                IntegrityManager::register_in(tx, NameKind::Category, &record.category)?;
                IntegrityManager::register_in(tx, NameKind::Bank, &record.bank)?;
                tx.upsert(record)
            },
        )?;

        info!(%id, "movement updated");
        Ok(self.finish(()))
    }

    /// Deletes movement `id`. Deleting a missing movement is a no-op.
    pub fn delete_movement(&self, id: RecordId) -> Result<CommandOutcome<bool>> {
        let removed = self.store.delete(Collection::Movements, &RecordKey::Id(id))?;
        if removed {
            info!(%id, "movement deleted");
        }
        Ok(self.finish(removed))
    }

    pub fn movement(&self, id: RecordId) -> Result<MovementRecord> {
        self.store.get(&RecordKey::Id(id))
    }

    /// Every movement, oldest first.
    pub fn movements(&self) -> Result<Vec<MovementRecord>> {
        self.aggregator.movements()
    }

    pub fn add_category(&self, name: &str) -> Result<()> {
        self.integrity.add(NameKind::Category, name)
    }

    pub fn add_bank(&self, name: &str) -> Result<()> {
        self.integrity.add(NameKind::Bank, name)
    }

    pub fn categories(&self) -> Result<Vec<String>> {
        self.integrity.names(NameKind::Category)
    }

    pub fn banks(&self) -> Result<Vec<String>> {
        self.integrity.names(NameKind::Bank)
    }

    /// Renames a category or bank everywhere. See [`IntegrityManager::rename`].
    pub fn rename(&self, kind: NameKind, old: &str, new: &str) -> Result<CommandOutcome<CascadeReport>> {
        let report = self.integrity.rename(kind, old, new)?;
        Ok(self.finish(report))
    }

    /// Removes a category or bank. See [`IntegrityManager::delete`].
    pub fn remove(&self, kind: NameKind, name: &str) -> Result<CommandOutcome<CascadeReport>> {
        let report = self.integrity.delete(kind, name)?;
        Ok(self.finish(report))
    }

    pub fn add_rule(&self, rule: Rule) -> Result<RecordId> {
        let key = self.store.create(rule)?;
        key.id()
            .ok_or_else(|| LedgerError::StorageUnavailable(format!("rule stored at {key}")))
    }

    pub fn rules(&self) -> Result<Vec<Rule>> {
        self.store.all()
    }

    pub fn delete_rule(&self, id: RecordId) -> Result<bool> {
        self.store.delete(Collection::Rules, &RecordKey::Id(id))
    }

    /// Sets the legacy single-row opening balance.
    pub fn set_initial_balance(&self, amount: Decimal) -> Result<()> {
        self.store.upsert(InitialBalance { amount })?;
        Ok(())
    }

    pub fn initial_balance(&self) -> Result<Option<Decimal>> {
        match self
            .store
            .get::<InitialBalance>(&RecordKey::name(INITIAL_BALANCE_KEY))
        {
            Ok(balance) => Ok(Some(balance.amount)),
            Err(LedgerError::NotFound { .. }) => Ok(None),
            Err(error) => Err(error),
        }
    }

    pub fn clear_initial_balance(&self) -> Result<bool> {
        self.store
            .delete(Collection::InitialBalance, &RecordKey::name(INITIAL_BALANCE_KEY))
    }

    fn lazy_all<T: Record>(&self) -> Result<Vec<T>> {
        if self.store.schema()?.contains(T::COLLECTION) {
            self.store.all()
        } else {
            Ok(Vec::new())
        }
    }

    /// Stores an investment, creating the collection on first use.
    pub fn add_investment(&self, investment: Investment) -> Result<RecordId> {
        self.store.ensure_collection(Collection::Investments)?;
        let key = self.store.create(investment)?;
        key.id()
            .ok_or_else(|| LedgerError::StorageUnavailable(format!("investment stored at {key}")))
    }

    pub fn investments(&self) -> Result<Vec<Investment>> {
        self.lazy_all()
    }

    /// Stores a reminder, creating the collection on first use.
    pub fn add_reminder(&self, reminder: Reminder) -> Result<RecordId> {
        self.store.ensure_collection(Collection::Reminders)?;
        let key = self.store.create(reminder)?;
        key.id()
            .ok_or_else(|| LedgerError::StorageUnavailable(format!("reminder stored at {key}")))
    }

    pub fn reminders(&self) -> Result<Vec<Reminder>> {
        self.lazy_all()
    }

    pub fn report(&self, filter: &ReportFilter) -> Result<Report> {
        self.aggregator.report(filter)
    }

    pub fn export_backup(&self) -> Result<BackupDocument> {
        backup::export(&self.store, &self.settings, self.now())
    }

    /// Replaces the whole ledger with `document`.
    pub fn import_backup(&self, document: BackupDocument) -> Result<CommandOutcome<ImportSummary>> {
        let summary = backup::import(&self.store, &self.settings, document)?;
        Ok(self.finish(summary))
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::in_memory()
    }
}
