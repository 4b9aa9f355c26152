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

//! Store engine.
//!
//! A [`Store`] holds named collections of [`Entry`] records. Every write runs
//! inside a [`Transaction`] that spans an explicit set of collections under
//! the store's exclusive lock. A transaction keeps an undo log; if its body
//! fails, or the snapshot cannot be written afterwards, every change is
//! rolled back before the lock is released, so partial writes are never
//! observable.
//!
//! # Durability
//!
//! A store opened with a path writes a JSON snapshot of its schema and
//! collections after each committed write (temporary file, then rename).
//! Reopening restores the snapshot and applies pending migrations.
//!
//! # Locking
//!
//! Reads share a [`RwLock`], writes and schema upgrades take it exclusively.
//! Acquisition is bounded by [`StoreOptions::lock_timeout`]; on timeout the
//! operation fails with [`LedgerError::StorageUnavailable`] and may be
//! retried by the caller.

use crate::base::{NameKind, RecordId, RecordKey};
use crate::error::{LedgerError, Result};
use crate::journal::{DEFAULT_JOURNAL_CAPACITY, Journal, Operation, PendingMutation};
use crate::record::{Entry, Record};
use crate::schema::{Collection, KeyPolicy, Schema};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default bound on waiting for the store lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// How a [`Store`] is opened.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Snapshot file. `None` keeps the store in memory only.
    pub path: Option<PathBuf>,
    /// Longest wait for the store lock before giving up.
    pub lock_timeout: Duration,
    /// Most recent mutations kept in the [`Journal`].
    pub journal_capacity: usize,
}

impl StoreOptions {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            journal_capacity: DEFAULT_JOURNAL_CAPACITY,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::in_memory()
        }
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn journal_capacity(mut self, capacity: usize) -> Self {
        self.journal_capacity = capacity;
        self
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[derive(Debug, Clone, Default)]
struct Table {
    /// Highest id ever assigned. Ids are not reused after deletes.
    last_id: u64,
    rows: BTreeMap<RecordKey, Entry>,
}

#[derive(Debug)]
struct StoreState {
    open: bool,
    upgrading: bool,
    schema: Schema,
    tables: BTreeMap<Collection, Table>,
}

impl StoreState {
    fn ensure_open(&self) -> Result<()> {
        if self.upgrading {
            return Err(LedgerError::StorageUnavailable(
                "schema upgrade in progress".into(),
            ));
        }
        if !self.open {
            return Err(LedgerError::StorageUnavailable("store is closed".into()));
        }
        Ok(())
    }

    fn table(&self, collection: Collection) -> Result<&Table> {
        self.tables
            .get(&collection)
            .ok_or_else(|| missing_collection(collection, &self.schema))
    }
}

fn missing_collection(collection: Collection, schema: &Schema) -> LedgerError {
    LedgerError::SchemaUpgrade(format!(
        "collection {collection} does not exist at schema version {}",
        schema.version()
    ))
}

/// Reverts one change made inside a transaction.
#[derive(Debug)]
enum Undo {
    Row {
        collection: Collection,
        key: RecordKey,
        previous: Option<Entry>,
    },
    LastId {
        collection: Collection,
        previous: u64,
    },
}

fn rollback(state: &mut StoreState, undo: Vec<Undo>) {
    for step in undo.into_iter().rev() {
        match step {
            Undo::Row {
                collection,
                key,
                previous,
            } => {
                if let Some(table) = state.tables.get_mut(&collection) {
                    match previous {
                        Some(entry) => {
                            table.rows.insert(key, entry);
                        }
                        None => {
                            table.rows.remove(&key);
                        }
                    }
                }
            }
            Undo::LastId {
                collection,
                previous,
            } => {
                if let Some(table) = state.tables.get_mut(&collection) {
                    table.last_id = previous;
                }
            }
        }
    }
}

/// Exclusive, all-or-nothing unit of work over a fixed set of collections.
///
/// Obtained through [`Store::transaction`]. Touching a collection outside the
/// declared scope fails with [`LedgerError::StorageUnavailable`].
pub struct Transaction<'s> {
    state: &'s mut StoreState,
    scope: Vec<Collection>,
    undo: Vec<Undo>,
    pending: Vec<PendingMutation>,
}

impl<'s> Transaction<'s> {
    fn new(state: &'s mut StoreState, scope: &[Collection]) -> Self {
        Self {
            state,
            scope: scope.to_vec(),
            undo: Vec::new(),
            pending: Vec::new(),
        }
    }

    fn finish(self) -> (Vec<Undo>, Vec<PendingMutation>) {
        (self.undo, self.pending)
    }

    fn check_scope(&self, collection: Collection) -> Result<()> {
        if self.scope.contains(&collection) {
            Ok(())
        } else {
            Err(LedgerError::StorageUnavailable(format!(
                "collection {collection} is outside this transaction"
            )))
        }
    }

    fn table(&self, collection: Collection) -> Result<&Table> {
        self.check_scope(collection)?;
        self.state.table(collection)
    }

    fn table_mut(&mut self, collection: Collection) -> Result<&mut Table> {
        self.check_scope(collection)?;
        let schema = &self.state.schema;
        self.state
            .tables
            .get_mut(&collection)
            .ok_or_else(|| missing_collection(collection, schema))
    }

    fn put_row(&mut self, collection: Collection, key: RecordKey, entry: Entry) -> Result<()> {
        let previous = self.table_mut(collection)?.rows.insert(key.clone(), entry);
        let operation = if previous.is_some() {
            Operation::Replace
        } else {
            Operation::Insert
        };
        self.undo.push(Undo::Row {
            collection,
            key: key.clone(),
            previous,
        });
        self.pending.push(PendingMutation {
            collection,
            key: Some(key),
            operation,
        });
        Ok(())
    }

    fn next_id(&mut self, collection: Collection) -> Result<RecordId> {
        let table = self.table_mut(collection)?;
        let previous = table.last_id;
        table.last_id += 1;
        let id = RecordId(table.last_id);
        self.undo.push(Undo::LastId {
            collection,
            previous,
        });
        Ok(id)
    }

    fn observe_id(&mut self, collection: Collection, id: RecordId) -> Result<()> {
        let table = self.table_mut(collection)?;
        let previous = table.last_id;
        if id.0 > previous {
            table.last_id = id.0;
            self.undo.push(Undo::LastId {
                collection,
                previous,
            });
        }
        Ok(())
    }

    /// Inserts a new record and returns its key.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Validation`] if the record is malformed, or an
    ///   auto-keyed record already carries an id.
    /// - [`LedgerError::DuplicateName`] if a category/bank name is taken.
    pub fn create(&mut self, entry: impl Into<Entry>) -> Result<RecordKey> {
        let mut entry = entry.into();
        let collection = entry.collection();
        entry.validate()?;

        let key = match collection.key_policy() {
            KeyPolicy::AutoIncrement => {
                if entry.key().is_some() {
                    return Err(LedgerError::validation(format!(
                        "{collection} records receive their id from the store"
                    )));
                }
                let id = self.next_id(collection)?;
                entry.assign_id(id);
                RecordKey::Id(id)
            }
            policy @ (KeyPolicy::Name | KeyPolicy::Fixed) => {
                let key = entry
                    .key()
                    .ok_or_else(|| LedgerError::validation("record key is missing"))?;
                if self.table(collection)?.rows.contains_key(&key) {
                    return Err(match (policy, NameKind::for_collection(collection), &key) {
                        (KeyPolicy::Name, Some(kind), RecordKey::Name(name)) => {
                            LedgerError::DuplicateName {
                                kind,
                                name: name.clone(),
                            }
                        }
                        _ => LedgerError::validation(format!(
                            "{collection} already holds a record at {key}"
                        )),
                    });
                }
                key
            }
        };

        self.put_row(collection, key.clone(), entry)?;
        Ok(key)
    }

    /// Inserts or replaces the record at its key.
    ///
    /// An auto-keyed record without an id is inserted with a fresh one.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Validation`] if the record is malformed.
    pub fn upsert(&mut self, entry: impl Into<Entry>) -> Result<RecordKey> {
        let mut entry = entry.into();
        let collection = entry.collection();
        entry.validate()?;

        let key = match entry.key() {
            Some(key) => {
                if let RecordKey::Id(id) = key {
                    self.observe_id(collection, id)?;
                }
                key
            }
            None => {
                let id = self.next_id(collection)?;
                entry.assign_id(id);
                RecordKey::Id(id)
            }
        };

        self.put_row(collection, key.clone(), entry)?;
        Ok(key)
    }

    /// Removes the record at `key`, returning it if it existed.
    pub fn delete(&mut self, collection: Collection, key: &RecordKey) -> Result<Option<Entry>> {
        let removed = self.table_mut(collection)?.rows.remove(key);
        if let Some(previous) = &removed {
            self.undo.push(Undo::Row {
                collection,
                key: key.clone(),
                previous: Some(previous.clone()),
            });
            self.pending.push(PendingMutation {
                collection,
                key: Some(key.clone()),
                operation: Operation::Delete,
            });
        }
        Ok(removed)
    }

    /// Removes every record of a collection. Ids keep counting from where they were.
    pub fn clear(&mut self, collection: Collection) -> Result<usize> {
        let rows = std::mem::take(&mut self.table_mut(collection)?.rows);
        let count = rows.len();
        for (key, entry) in rows {
            self.undo.push(Undo::Row {
                collection,
                key,
                previous: Some(entry),
            });
        }
        self.pending.push(PendingMutation {
            collection,
            key: None,
            operation: Operation::Clear,
        });
        Ok(count)
    }

    pub fn read_all(&self, collection: Collection) -> Result<Vec<Entry>> {
        Ok(self.table(collection)?.rows.values().cloned().collect())
    }

    pub fn read_one(&self, collection: Collection, key: &RecordKey) -> Result<Entry> {
        self.table(collection)?
            .rows
            .get(key)
            .cloned()
            .ok_or_else(|| LedgerError::not_found(collection, key.clone()))
    }

    pub fn contains(&self, collection: Collection, key: &RecordKey) -> Result<bool> {
        Ok(self.table(collection)?.rows.contains_key(key))
    }

    /// Every record of `T`'s collection.
    pub fn all<T: Record>(&self) -> Result<Vec<T>> {
        Ok(self
            .read_all(T::COLLECTION)?
            .into_iter()
            .filter_map(T::from_entry)
            .collect())
    }

    pub fn get<T: Record>(&self, key: &RecordKey) -> Result<T> {
        T::from_entry(self.read_one(T::COLLECTION, key)?)
            .ok_or_else(|| LedgerError::not_found(T::COLLECTION, key.clone()))
    }
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    schema: &'a Schema,
    tables: BTreeMap<Collection, TableRef<'a>>,
}

#[derive(Serialize)]
struct TableRef<'a> {
    last_id: u64,
    rows: Vec<&'a Entry>,
}

#[derive(Deserialize)]
struct Snapshot {
    schema: Schema,
    tables: BTreeMap<Collection, TableSnapshot>,
}

#[derive(Deserialize)]
struct TableSnapshot {
    last_id: u64,
    rows: Vec<Entry>,
}

fn write_snapshot(path: &Path, state: &StoreState) -> Result<()> {
    let snapshot = SnapshotRef {
        schema: &state.schema,
        tables: state
            .tables
            .iter()
            .map(|(collection, table)| {
                (
                    *collection,
                    TableRef {
                        last_id: table.last_id,
                        rows: table.rows.values().collect(),
                    },
                )
            })
            .collect(),
    };
    let bytes = serde_json::to_vec_pretty(&snapshot).map_err(|e| {
        LedgerError::StorageUnavailable(format!("failed to encode snapshot: {e}"))
    })?;

    let staging = path.with_extension("tmp");
    fs::write(&staging, bytes).map_err(|e| {
        LedgerError::StorageUnavailable(format!("failed to write {}: {e}", staging.display()))
    })?;
    fs::rename(&staging, path).map_err(|e| {
        LedgerError::StorageUnavailable(format!("failed to replace {}: {e}", path.display()))
    })?;
    debug!(path = %path.display(), "snapshot written");
    Ok(())
}

fn load_snapshot(path: &Path) -> Result<(Schema, BTreeMap<Collection, Table>)> {
    let text = fs::read_to_string(path).map_err(|e| {
        LedgerError::StorageUnavailable(format!("failed to read {}: {e}", path.display()))
    })?;
    let snapshot: Snapshot = serde_json::from_str(&text).map_err(|e| {
        LedgerError::SchemaUpgrade(format!("snapshot {} is unreadable: {e}", path.display()))
    })?;

    let mut tables = BTreeMap::new();
    for (collection, stored) in snapshot.tables {
        if !snapshot.schema.contains(collection) {
            return Err(LedgerError::SchemaUpgrade(format!(
                "snapshot holds {collection}, which schema version {} does not declare",
                snapshot.schema.version()
            )));
        }
        let mut table = Table {
            last_id: stored.last_id,
            rows: BTreeMap::new(),
        };
        for entry in stored.rows {
            if entry.collection() != collection {
                return Err(LedgerError::SchemaUpgrade(format!(
                    "snapshot table {collection} holds a {} record",
                    entry.collection()
                )));
            }
            entry.validate().map_err(|e| {
                LedgerError::SchemaUpgrade(format!(
                    "snapshot table {collection} holds an invalid record: {e}"
                ))
            })?;
            let key = entry.key().ok_or_else(|| {
                LedgerError::SchemaUpgrade(format!("snapshot table {collection} has a keyless row"))
            })?;
            if let RecordKey::Id(id) = key {
                table.last_id = table.last_id.max(id.0);
            }
            table.rows.insert(key, entry);
        }
        tables.insert(collection, table);
    }
    Ok((snapshot.schema, tables))
}

/// Durable, transactional store of named collections.
///
/// Share it between components as `Arc<Store>`.
#[derive(Debug)]
pub struct Store {
    state: RwLock<StoreState>,
    options: StoreOptions,
    journal: Journal,
}

impl Store {
    /// Opens a store, restoring its snapshot if one exists and applying
    /// pending migrations.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::StorageUnavailable`] if the snapshot cannot be read
    ///   or the migrated snapshot cannot be written.
    /// - [`LedgerError::SchemaUpgrade`] if the snapshot is corrupt.
    pub fn open(options: StoreOptions) -> Result<Self> {
        let (mut schema, mut tables) = match &options.path {
            Some(path) if path.exists() => load_snapshot(path)?,
            _ => (Schema::empty(), BTreeMap::new()),
        };

        let from = schema.version();
        let created = schema.migrate();
        for collection in schema.collections() {
            tables.entry(collection).or_default();
        }

        let state = StoreState {
            open: true,
            upgrading: false,
            schema,
            tables,
        };

        if !created.is_empty() {
            info!(
                from,
                to = state.schema.version(),
                ?created,
                "applied schema migrations"
            );
            if let Some(path) = &options.path {
                write_snapshot(path, &state)?;
            }
        }

        Ok(Self {
            state: RwLock::new(state),
            journal: Journal::with_capacity(options.journal_capacity),
            options,
        })
    }

    /// A fresh store that lives only in memory.
    pub fn in_memory() -> Self {
        let mut schema = Schema::empty();
        schema.migrate();
        let tables = schema
            .collections()
            .map(|collection| (collection, Table::default()))
            .collect();
        Self {
            state: RwLock::new(StoreState {
                open: true,
                upgrading: false,
                schema,
                tables,
            }),
            options: StoreOptions::in_memory(),
            journal: Journal::new(),
        }
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Log of committed mutations.
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    fn busy(&self) -> LedgerError {
        LedgerError::StorageUnavailable(format!(
            "store lock not acquired within {:?}",
            self.options.lock_timeout
        ))
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, StoreState>> {
        let state = self
            .state
            .try_read_for(self.options.lock_timeout)
            .ok_or_else(|| self.busy())?;
        state.ensure_open()?;
        Ok(state)
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, StoreState>> {
        let state = self
            .state
            .try_write_for(self.options.lock_timeout)
            .ok_or_else(|| self.busy())?;
        state.ensure_open()?;
        Ok(state)
    }

    fn persist(&self, state: &StoreState) -> Result<()> {
        match &self.options.path {
            Some(path) => write_snapshot(path, state),
            None => Ok(()),
        }
    }

    /// Runs `body` as one exclusive, all-or-nothing transaction over `scope`.
    ///
    /// If `body` returns an error, or the snapshot cannot be written after
    /// it succeeds, every change it made is rolled back.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::StorageUnavailable`] if the store is closed, busy
    ///   past the lock timeout, or the snapshot write fails.
    /// - [`LedgerError::SchemaUpgrade`] if a scoped collection does not exist.
    /// - Any error returned by `body`.
    pub fn transaction<T, F>(&self, scope: &[Collection], body: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let mut state = self.write_state()?;
        if let Some(missing) = scope.iter().find(|c| !state.schema.contains(**c)) {
            return Err(missing_collection(*missing, &state.schema));
        }

        let mut tx = Transaction::new(&mut state, scope);
        let outcome = body(&mut tx);
        let (undo, pending) = tx.finish();

        let value = match outcome {
            Ok(value) => value,
            Err(error) => {
                debug!(?scope, %error, "transaction rolled back");
                rollback(&mut state, undo);
                return Err(error);
            }
        };

        if pending.is_empty() {
            return Ok(value);
        }
        if let Err(error) = self.persist(&state) {
            warn!(?scope, %error, "commit failed, rolling back");
            rollback(&mut state, undo);
            return Err(error);
        }
        self.journal.record(pending);
        Ok(value)
    }

    /// Inserts a record. See [`Transaction::create`].
    pub fn create(&self, entry: impl Into<Entry>) -> Result<RecordKey> {
        let entry = entry.into();
        self.transaction(&[entry.collection()], |tx| tx.create(entry))
    }

    /// Inserts or replaces a record. See [`Transaction::upsert`].
    pub fn upsert(&self, entry: impl Into<Entry>) -> Result<RecordKey> {
        let entry = entry.into();
        self.transaction(&[entry.collection()], |tx| tx.upsert(entry))
    }

    /// Deletes the record at `key`. Returns whether anything was removed.
    pub fn delete(&self, collection: Collection, key: &RecordKey) -> Result<bool> {
        self.transaction(&[collection], |tx| Ok(tx.delete(collection, key)?.is_some()))
    }

    /// Every record of a collection, in key order.
    ///
    /// Callers that need a particular order (by date, say) sort explicitly.
    pub fn read_all(&self, collection: Collection) -> Result<Vec<Entry>> {
        let state = self.read_state()?;
        Ok(state.table(collection)?.rows.values().cloned().collect())
    }

    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if no record has this key.
    pub fn read_one(&self, collection: Collection, key: &RecordKey) -> Result<Entry> {
        let state = self.read_state()?;
        state
            .table(collection)?
            .rows
            .get(key)
            .cloned()
            .ok_or_else(|| LedgerError::not_found(collection, key.clone()))
    }

    pub fn count(&self, collection: Collection) -> Result<usize> {
        let state = self.read_state()?;
        Ok(state.table(collection)?.rows.len())
    }

    pub fn all<T: Record>(&self) -> Result<Vec<T>> {
        Ok(self
            .read_all(T::COLLECTION)?
            .into_iter()
            .filter_map(T::from_entry)
            .collect())
    }

    pub fn get<T: Record>(&self, key: &RecordKey) -> Result<T> {
        T::from_entry(self.read_one(T::COLLECTION, key)?)
            .ok_or_else(|| LedgerError::not_found(T::COLLECTION, key.clone()))
    }

    /// Creates `collection` if the schema lacks it.
    ///
    /// The upgrade closes the store, bumps the schema version by one, adds
    /// the collection with its key policy, persists and reopens, all while
    /// holding the exclusive lock. Concurrent callers for the same missing
    /// collection converge on a single upgrade; the others see it done and
    /// return `false`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::StorageUnavailable`] if the store is closed or busy.
    /// - [`LedgerError::SchemaUpgrade`] if the upgrade cannot be persisted;
    ///   the schema is left as it was.
    pub fn ensure_collection(&self, collection: Collection) -> Result<bool> {
        if self.read_state()?.schema.contains(collection) {
            return Ok(false);
        }

        let mut state = self.write_state()?;
        if state.schema.contains(collection) {
            return Ok(false);
        }

        let previous = state.schema.clone();
        state.open = false;
        state.upgrading = true;

        let upgraded = match state.schema.add_collection(collection) {
            Ok(version) => {
                state.tables.insert(collection, Table::default());
                match self.persist(&state) {
                    Ok(()) => Ok(version),
                    Err(error) => Err(LedgerError::SchemaUpgrade(error.to_string())),
                }
            }
            Err(error) => Err(error),
        };

        state.upgrading = false;
        state.open = true;
        match upgraded {
            Ok(version) => {
                info!(%collection, from = previous.version(), to = version, "schema upgraded");
                self.journal.record(vec![PendingMutation {
                    collection,
                    key: None,
                    operation: Operation::CreateCollection,
                }]);
                Ok(true)
            }
            Err(error) => {
                warn!(%collection, %error, "schema upgrade abandoned");
                state.schema = previous;
                state.tables.remove(&collection);
                Err(error)
            }
        }
    }

    /// Current schema.
    pub fn schema(&self) -> Result<Schema> {
        Ok(self.read_state()?.schema.clone())
    }

    pub fn version(&self) -> Result<u32> {
        Ok(self.read_state()?.schema.version())
    }

    /// Closes the store. Later operations fail with
    /// [`LedgerError::StorageUnavailable`] until [`Store::reopen`].
    pub fn close(&self) -> Result<()> {
        let mut state = self
            .state
            .try_write_for(self.options.lock_timeout)
            .ok_or_else(|| self.busy())?;
        state.open = false;
        info!("store closed");
        Ok(())
    }

    pub fn reopen(&self) -> Result<()> {
        let mut state = self
            .state
            .try_write_for(self.options.lock_timeout)
            .ok_or_else(|| self.busy())?;
        state.open = true;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.state
            .try_read_for(self.options.lock_timeout)
            .is_some_and(|state| state.ensure_open().is_ok())
    }
}
