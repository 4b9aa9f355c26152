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

//! Rename and delete cascade integration tests.

use chrono::NaiveDate;
use ledger_store_rs::{
    Collection, EntryKind, ErrorKind, IntegrityManager, LedgerError, MovementRecord, NO_BANK,
    NameKind, NewMovement, Rule, Store, StoreOptions, UNCATEGORIZED,
};
use rust_decimal_macros::dec;
use std::fs;
use std::sync::Arc;

fn add_expense(store: &Store, category: &str, bank: &str) {
    let record = NewMovement::new(
        "Purchase",
        dec!(20),
        EntryKind::Expense,
        NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
    )
    .category(category)
    .bank(bank)
    .into_record()
    .unwrap();
    store.create(record).unwrap();
}

fn add_rule(store: &Store, keyword: &str, category: &str, bank: Option<&str>) {
    store
        .create(Rule {
            id: None,
            keyword: keyword.into(),
            category: category.into(),
            bank: bank.map(str::to_string),
        })
        .unwrap();
}

fn setup() -> (Arc<Store>, IntegrityManager) {
    let store = Arc::new(Store::in_memory());
    let integrity = IntegrityManager::new(Arc::clone(&store));
    for name in ["Transport", "Food", "Mobility"] {
        integrity.add(NameKind::Category, name).unwrap();
    }
    for name in ["BankA", "BankB"] {
        integrity.add(NameKind::Bank, name).unwrap();
    }
    for _ in 0..3 {
        add_expense(&store, "Transport", "BankA");
    }
    add_expense(&store, "Food", "BankB");
    add_rule(&store, "uber", "Transport", Some("BankA"));
    add_rule(&store, "bakery", "Food", None);
    (store, integrity)
}

fn movements(store: &Store) -> Vec<MovementRecord> {
    store.all().unwrap()
}

#[test]
fn rename_rewrites_every_reference() {
    let (store, integrity) = setup();
    integrity.delete(NameKind::Category, "Mobility").unwrap();

    let report = integrity
        .rename(NameKind::Category, "Transport", "Mobility")
        .unwrap();

    assert_eq!(report.movements, 3);
    assert_eq!(report.rules, 1);
    assert_eq!(integrity.references(NameKind::Category, "Transport").unwrap(), 0);
    assert_eq!(integrity.references(NameKind::Category, "Mobility").unwrap(), 3);
    assert_eq!(
        integrity.names(NameKind::Category).unwrap(),
        vec!["Food".to_string(), "Mobility".to_string()]
    );
    let rules: Vec<Rule> = store.all().unwrap();
    assert_eq!(rules[0].category, "Mobility");
}

#[test]
fn rename_bank_rewrites_bank_rules() {
    let (store, integrity) = setup();
    let report = integrity.rename(NameKind::Bank, "BankA", "BankC").unwrap();
    assert_eq!(report.movements, 3);
    assert_eq!(report.rules, 1);

    let rules: Vec<Rule> = store.all().unwrap();
    assert_eq!(rules[0].bank.as_deref(), Some("BankC"));
    assert_eq!(rules[1].bank, None);
}

#[test]
fn rename_to_existing_name_changes_nothing() {
    let (store, integrity) = setup();
    let before = movements(&store);

    let error = integrity
        .rename(NameKind::Category, "Transport", "Food")
        .unwrap_err();

    assert_eq!(
        error,
        LedgerError::DuplicateName {
            kind: NameKind::Category,
            name: "Food".into()
        }
    );
    assert_eq!(movements(&store), before);
    assert_eq!(integrity.names(NameKind::Category).unwrap().len(), 3);
}

#[test]
fn rename_of_unknown_name_is_not_found() {
    let (_store, integrity) = setup();
    let error = integrity
        .rename(NameKind::Bank, "Ghost", "BankZ")
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::NotFound);
}

#[test]
fn rename_validates_new_name() {
    let (_store, integrity) = setup();
    for bad in ["", "   ", UNCATEGORIZED] {
        let error = integrity
            .rename(NameKind::Category, "Transport", bad)
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Validation, "{bad:?}");
    }
}

#[test]
fn delete_reassigns_to_sentinel() {
    let (store, integrity) = setup();
    let report = integrity.delete(NameKind::Category, "Transport").unwrap();

    assert_eq!(report.movements, 3);
    assert_eq!(report.rules, 1);
    assert_eq!(report.to, UNCATEGORIZED);
    assert_eq!(
        movements(&store)
            .iter()
            .filter(|m| m.category == UNCATEGORIZED)
            .count(),
        3
    );
    assert!(!integrity
        .names(NameKind::Category)
        .unwrap()
        .contains(&"Transport".to_string()));
}

#[test]
fn delete_bank_reassigns_to_no_bank() {
    let (store, integrity) = setup();
    let report = integrity.delete(NameKind::Bank, "BankB").unwrap();
    assert_eq!(report.movements, 1);
    assert_eq!(
        movements(&store)
            .iter()
            .filter(|m| m.bank == NO_BANK)
            .count(),
        1
    );
}

#[test]
fn delete_unknown_name_is_not_found() {
    let (store, integrity) = setup();
    let before = movements(&store);
    let error = integrity.delete(NameKind::Bank, "Ghost").unwrap_err();
    assert_eq!(error.kind(), ErrorKind::NotFound);
    assert_eq!(movements(&store), before);
}

#[test]
fn delete_then_reuse_name() {
    let (_store, integrity) = setup();
    integrity.delete(NameKind::Category, "Food").unwrap();
    integrity.add(NameKind::Category, "Food").unwrap();
    assert_eq!(integrity.references(NameKind::Category, "Food").unwrap(), 0);
}

#[test]
fn failed_cascade_leaves_store_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    fs::create_dir(&data).unwrap();
    let store = Arc::new(Store::open(StoreOptions::file(data.join("ledger.json"))).unwrap());
    let integrity = IntegrityManager::new(Arc::clone(&store));
    integrity.add(NameKind::Category, "Transport").unwrap();
    for _ in 0..4 {
        add_expense(&store, "Transport", "BankA");
    }
    let before = movements(&store);

    fs::remove_dir_all(&data).unwrap();

    let error = integrity
        .rename(NameKind::Category, "Transport", "Mobility")
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::CascadeFailure);
    assert_eq!(movements(&store), before);
    assert_eq!(
        integrity.names(NameKind::Category).unwrap(),
        vec!["Transport".to_string()]
    );

    let error = integrity.delete(NameKind::Category, "Transport").unwrap_err();
    assert_eq!(error.kind(), ErrorKind::CascadeFailure);
    assert_eq!(store.count(Collection::Categories).unwrap(), 1);
}

#[test]
fn cascade_on_closed_store_is_a_cascade_failure() {
    let (store, integrity) = setup();
    store.close().unwrap();
    let error = integrity
        .rename(NameKind::Category, "Transport", "Travel")
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::CascadeFailure);
}
