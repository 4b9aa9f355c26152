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

//! Property-based tests for the ledger.
//!
//! These tests verify invariants that should hold for any sequence of
//! valid movements and cascades.

use chrono::NaiveDate;
use ledger_store_rs::aggregation::{LedgerViews, ViewParams, bank_summaries, global_balance};
use ledger_store_rs::{
    Engine, EntryKind, IntegrityManager, MovementRecord, NameKind, NewMovement, Store,
    UNCATEGORIZED,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

// =============================================================================
// Arbitrary Strategies
// =============================================================================

/// Generate a positive amount (0.01 to 100000.00).
fn arb_amount() -> impl Strategy<Value = Decimal> {
    (1i64..=10_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

fn arb_kind() -> impl Strategy<Value = EntryKind> {
    prop_oneof![
        Just(EntryKind::Income),
        Just(EntryKind::Expense),
        Just(EntryKind::InitialBalance),
    ]
}

fn arb_name(prefix: &'static str) -> impl Strategy<Value = String> {
    (0u8..4).prop_map(move |n| format!("{prefix}{n}"))
}

fn arb_movement() -> impl Strategy<Value = NewMovement> {
    (
        arb_kind(),
        arb_amount(),
        arb_name("Cat"),
        arb_name("Bank"),
        1u32..=28,
    )
        .prop_map(|(kind, amount, category, bank, day)| {
            let date = NaiveDate::from_ymd_opt(2025, 2, day).unwrap();
            NewMovement::new("generated", amount, kind, date)
                .category(category)
                .bank(bank)
        })
}

fn records(movements: &[NewMovement]) -> Vec<MovementRecord> {
    movements
        .iter()
        .cloned()
        .map(|m| m.into_record().unwrap())
        .collect()
}

fn params() -> ViewParams {
    ViewParams::at(MovementRecord::noon(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()))
}

// =============================================================================
// Aggregation Invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Per-bank final balances add up to the global balance.
    #[test]
    fn balance_additivity(movements in prop::collection::vec(arb_movement(), 0..40)) {
        let records = records(&movements);
        let banks = bank_summaries(&records);
        let sum: Decimal = banks.iter().map(|b| b.final_balance).sum();
        prop_assert_eq!(sum, global_balance(&banks));

        let views = LedgerViews::compute(&records, &params());
        prop_assert_eq!(views.global_balance, views.totals.income - views.totals.expense);
    }

    /// Income minus expense minus commission is the available balance.
    #[test]
    fn reconciliation(movements in prop::collection::vec(arb_movement(), 0..40)) {
        let views = LedgerViews::compute(&records(&movements), &params());
        prop_assert_eq!(
            views.totals.income - views.totals.expense - views.totals.commission,
            views.available_balance
        );
        prop_assert_eq!(
            views.available_balance,
            views.global_balance - views.total_commission()
        );
    }

    /// Every expense carries exactly 0.3% commission; income carries none.
    #[test]
    fn commission_determinism(movement in arb_movement()) {
        let record = movement.clone().into_record().unwrap();
        match movement.kind {
            EntryKind::Expense => prop_assert_eq!(record.commission, record.amount * dec!(0.003)),
            _ => prop_assert_eq!(record.commission, Decimal::ZERO),
        }
    }

    /// Computing views twice over the same movements gives the same result.
    #[test]
    fn aggregation_idempotence(movements in prop::collection::vec(arb_movement(), 0..40)) {
        let records = records(&movements);
        prop_assert_eq!(
            LedgerViews::compute(&records, &params()),
            LedgerViews::compute(&records, &params())
        );
    }
}

// =============================================================================
// Cascade Invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// After a rename no movement references the old name, and the number of
    /// movements under the new name equals the count reported.
    #[test]
    fn rename_completeness(movements in prop::collection::vec(arb_movement(), 1..30)) {
        let engine = Engine::in_memory();
        for movement in &movements {
            engine.add_movement(movement.clone()).unwrap();
        }
        let integrity = engine.integrity();
        let expected = integrity.references(NameKind::Category, "Cat0").unwrap();

        if engine.categories().unwrap().contains(&"Cat0".to_string()) {
            let report = integrity.rename(NameKind::Category, "Cat0", "Renamed").unwrap();
            prop_assert_eq!(report.movements, expected);
            prop_assert_eq!(integrity.references(NameKind::Category, "Cat0").unwrap(), 0);
            prop_assert_eq!(integrity.references(NameKind::Category, "Renamed").unwrap(), expected);
        }
    }

    /// Deleting a category moves exactly its movements to the sentinel and
    /// leaves balances untouched.
    #[test]
    fn delete_reassignment(movements in prop::collection::vec(arb_movement(), 1..30)) {
        let store = Arc::new(Store::in_memory());
        let engine = Engine::new(Arc::clone(&store), Default::default());
        for movement in &movements {
            engine.add_movement(movement.clone()).unwrap();
        }
        let integrity = IntegrityManager::new(store);
        let before = engine.views().unwrap();
        let referenced = integrity.references(NameKind::Category, "Cat1").unwrap();
        let sentinel_before = integrity.references(NameKind::Category, UNCATEGORIZED).unwrap();

        if referenced > 0 {
            let report = integrity.delete(NameKind::Category, "Cat1").unwrap();
            prop_assert_eq!(report.movements, referenced);
            prop_assert_eq!(
                integrity.references(NameKind::Category, UNCATEGORIZED).unwrap(),
                sentinel_before + referenced
            );
            let after = engine.views().unwrap();
            prop_assert_eq!(after.global_balance, before.global_balance);
            prop_assert_eq!(after.banks, before.banks);
        }
    }
}
