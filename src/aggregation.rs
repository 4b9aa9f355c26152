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

//! Derived views over the movement set.
//!
//! Nothing here is cached. Every call rescans the movements it is given (or
//! reads them fresh from the store), so views always agree with storage and
//! two calls without an intervening write return identical values.
//!
//! # Balances
//!
//! | View | Formula |
//! |------|---------|
//! | per-bank final | `initial + income - expense` |
//! | global | `Σ per-bank final` = `total income - total expense` |
//! | available | `total income - total expense - total commission` |
//!
//! Commissions are the values captured when each expense was written, never
//! recomputed from the current rate.

use crate::error::Result;
use crate::movement::{MovementKind, MovementRecord};
use crate::numeral;
use crate::store::Store;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Length of the trailing budget window.
pub const BUDGET_WINDOW_DAYS: i64 = 30;

/// Budget usage at or above this percentage is a warning.
pub const BUDGET_WARNING_PERCENT: Decimal = dec!(70);

/// Budget usage at or above this percentage is critical.
pub const BUDGET_CRITICAL_PERCENT: Decimal = dec!(90);

/// Balance summary of one bank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankSummary {
    pub bank: String,
    pub initial: Decimal,
    pub income: Decimal,
    pub expense: Decimal,
    /// Commission stored on this bank's expenses. Not part of `final_balance`.
    pub commission: Decimal,
    pub final_balance: Decimal,
}

impl BankSummary {
    const DECIMAL_PRECISION: u32 = 2;

    fn empty(bank: &str) -> Self {
        Self {
            bank: bank.to_string(),
            initial: Decimal::ZERO,
            income: Decimal::ZERO,
            expense: Decimal::ZERO,
            commission: Decimal::ZERO,
            final_balance: Decimal::ZERO,
        }
    }
}

impl Serialize for BankSummary {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("BankSummary", 6)?;
        state.serialize_field("bank", &self.bank)?;
        state.serialize_field("initial", &self.initial.round_dp(Self::DECIMAL_PRECISION))?;
        state.serialize_field("income", &self.income.round_dp(Self::DECIMAL_PRECISION))?;
        state.serialize_field("expense", &self.expense.round_dp(Self::DECIMAL_PRECISION))?;
        state.serialize_field(
            "commission",
            &self.commission.round_dp(Self::DECIMAL_PRECISION),
        )?;
        state.serialize_field(
            "final_balance",
            &self.final_balance.round_dp(Self::DECIMAL_PRECISION),
        )?;
        state.end()
    }
}

/// Ledger-wide sums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Totals {
    /// Every income, initial balances included.
    pub income: Decimal,
    pub expense: Decimal,
    pub commission: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryTotal {
    pub category: String,
    pub amount: Decimal,
}

/// Expenses inside the trailing budget window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BudgetUsage {
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
    pub total_spent: Decimal,
    /// Sorted by amount, largest first.
    pub by_category: Vec<CategoryTotal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetLevel {
    Ok,
    Warning,
    Critical,
}

/// Spending measured against the configured goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BudgetProgress {
    pub goal: Option<Decimal>,
    pub spent: Decimal,
    /// Clamped to `0..=100`, two decimals. Zero when no goal is set.
    pub percent: Decimal,
    pub level: BudgetLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyTotals {
    /// `YYYY-MM`.
    pub month: String,
    pub income: Decimal,
    pub expense: Decimal,
}

/// Global balance converted with the configured exchange rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CurrencyEquivalent {
    Valid { rate: Decimal, amount: Decimal },
    /// Rate missing, not a number, not positive, or too small to divide by.
    Invalid,
}

/// Movement subset selected for a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportFilter {
    Category(String),
    /// Inclusive on both ends.
    DateRange { from: NaiveDate, to: NaiveDate },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub movements: Vec<MovementRecord>,
    pub income: Decimal,
    pub expense: Decimal,
    pub commission: Decimal,
    /// `income - expense - commission`.
    pub net: Decimal,
}

/// Inputs that are not part of the movement set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewParams {
    pub now: NaiveDateTime,
    pub exchange_rate: Option<String>,
    pub budget_goal: Option<Decimal>,
}

impl ViewParams {
    pub fn at(now: NaiveDateTime) -> Self {
        Self {
            now,
            exchange_rate: None,
            budget_goal: None,
        }
    }
}

/// Every derived view, computed in one pass set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerViews {
    pub movement_count: usize,
    pub banks: Vec<BankSummary>,
    pub global_balance: Decimal,
    pub totals: Totals,
    pub available_balance: Decimal,
    pub budget: BudgetUsage,
    pub budget_progress: BudgetProgress,
    pub categories: Vec<CategoryTotal>,
    pub monthly: Vec<MonthlyTotals>,
    pub equivalent: CurrencyEquivalent,
}

impl LedgerViews {
    pub fn compute(movements: &[MovementRecord], params: &ViewParams) -> Self {
        let banks = bank_summaries(movements);
        let global_balance = global_balance(&banks);
        let totals = totals(movements);
        let budget = budget_usage(movements, params.now);
        let budget_progress = budget_progress(&budget, params.budget_goal);

        Self {
            movement_count: movements.len(),
            global_balance,
            available_balance: totals.income - totals.expense - totals.commission,
            totals,
            banks,
            budget_progress,
            budget,
            categories: category_breakdown(movements),
            monthly: monthly_totals(movements),
            equivalent: currency_equivalent(global_balance, params.exchange_rate.as_deref()),
        }
    }

    pub fn total_commission(&self) -> Decimal {
        self.totals.commission
    }

    pub fn bank(&self, name: &str) -> Option<&BankSummary> {
        self.banks.iter().find(|summary| summary.bank == name)
    }
}

/// One summary per distinct bank value, ordered by bank name.
pub fn bank_summaries(movements: &[MovementRecord]) -> Vec<BankSummary> {
    let mut by_bank: BTreeMap<&str, BankSummary> = BTreeMap::new();

    for movement in movements {
        let summary = by_bank
            .entry(movement.bank.as_str())
            .or_insert_with(|| BankSummary::empty(&movement.bank));

        match movement.kind {
            _ if movement.is_initial_balance() => summary.initial += movement.amount,
            MovementKind::Income => summary.income += movement.amount,
            MovementKind::Expense => {
                summary.expense += movement.amount;
                summary.commission += movement.commission;
            }
        }
    }

    by_bank
        .into_values()
        .map(|mut summary| {
            summary.final_balance = summary.initial + summary.income - summary.expense;
            summary
        })
        .collect()
}

pub fn global_balance(banks: &[BankSummary]) -> Decimal {
    banks.iter().map(|summary| summary.final_balance).sum()
}

pub fn totals(movements: &[MovementRecord]) -> Totals {
    movements
        .iter()
        .fold(Totals::default(), |mut totals, movement| {
            match movement.kind {
                MovementKind::Income => totals.income += movement.amount,
                MovementKind::Expense => {
                    totals.expense += movement.amount;
                    totals.commission += movement.commission;
                }
            }
            totals
        })
}

fn sorted_by_amount(totals: BTreeMap<&str, Decimal>) -> Vec<CategoryTotal> {
    let mut sorted: Vec<CategoryTotal> = totals
        .into_iter()
        .map(|(category, amount)| CategoryTotal {
            category: category.to_string(),
            amount,
        })
        .collect();
    // Stable: ties keep name order from the map.
    sorted.sort_by(|a, b| b.amount.cmp(&a.amount));
    sorted
}

/// Expenses dated within `[now - 30 days, now]`, grouped by category.
pub fn budget_usage(movements: &[MovementRecord], now: NaiveDateTime) -> BudgetUsage {
    let window_start = now - Duration::days(BUDGET_WINDOW_DAYS);
    let mut by_category: BTreeMap<&str, Decimal> = BTreeMap::new();
    let mut total_spent = Decimal::ZERO;

    for movement in movements
        .iter()
        .filter(|m| m.is_expense() && m.date >= window_start && m.date <= now)
    {
        *by_category.entry(movement.category.as_str()).or_default() += movement.amount;
        total_spent += movement.amount;
    }

    BudgetUsage {
        window_start,
        window_end: now,
        total_spent,
        by_category: sorted_by_amount(by_category),
    }
}

pub fn budget_progress(usage: &BudgetUsage, goal: Option<Decimal>) -> BudgetProgress {
    let percent = match goal {
        // Overflow means the goal is vanishingly small next to the spending.
        Some(goal) if goal > Decimal::ZERO => usage
            .total_spent
            .checked_div(goal)
            .and_then(|ratio| ratio.checked_mul(dec!(100)))
            .map_or(dec!(100), |percent| {
                percent.clamp(Decimal::ZERO, dec!(100)).round_dp(2)
            }),
        _ => Decimal::ZERO,
    };
    let level = if percent >= BUDGET_CRITICAL_PERCENT {
        BudgetLevel::Critical
    } else if percent >= BUDGET_WARNING_PERCENT {
        BudgetLevel::Warning
    } else {
        BudgetLevel::Ok
    };

    BudgetProgress {
        goal,
        spent: usage.total_spent,
        percent,
        level,
    }
}

/// All-time expense per category, largest first.
pub fn category_breakdown(movements: &[MovementRecord]) -> Vec<CategoryTotal> {
    let mut by_category: BTreeMap<&str, Decimal> = BTreeMap::new();
    for movement in movements.iter().filter(|m| m.is_expense()) {
        *by_category.entry(movement.category.as_str()).or_default() += movement.amount;
    }
    sorted_by_amount(by_category)
}

/// Income and expense per calendar month, oldest first.
pub fn monthly_totals(movements: &[MovementRecord]) -> Vec<MonthlyTotals> {
    let mut by_month: BTreeMap<String, (Decimal, Decimal)> = BTreeMap::new();
    for movement in movements {
        let month = movement.date.format("%Y-%m").to_string();
        let (income, expense) = by_month.entry(month).or_default();
        match movement.kind {
            MovementKind::Income => *income += movement.amount,
            MovementKind::Expense => *expense += movement.amount,
        }
    }

    by_month
        .into_iter()
        .map(|(month, (income, expense))| MonthlyTotals {
            month,
            income,
            expense,
        })
        .collect()
}

/// Converts `balance` with `rate` (a decimal string).
///
/// A rate so small that the converted amount is unrepresentable is invalid.
pub fn currency_equivalent(balance: Decimal, rate: Option<&str>) -> CurrencyEquivalent {
    match rate.and_then(numeral::parse_decimal) {
        Some(rate) if rate > Decimal::ZERO => match balance.checked_div(rate) {
            Some(amount) => CurrencyEquivalent::Valid { rate, amount },
            None => CurrencyEquivalent::Invalid,
        },
        _ => CurrencyEquivalent::Invalid,
    }
}

pub fn report(movements: &[MovementRecord], filter: &ReportFilter) -> Report {
    let selected: Vec<MovementRecord> = movements
        .iter()
        .filter(|movement| match filter {
            ReportFilter::Category(category) => &movement.category == category,
            ReportFilter::DateRange { from, to } => {
                let day = movement.date.date();
                day >= *from && day <= *to
            }
        })
        .cloned()
        .collect();

    let totals = totals(&selected);
    Report {
        movements: selected,
        income: totals.income,
        expense: totals.expense,
        commission: totals.commission,
        net: totals.income - totals.expense - totals.commission,
    }
}

/// Reads the movement collection and derives views from it.
#[derive(Debug, Clone)]
pub struct Aggregator {
    store: Arc<Store>,
}

impl Aggregator {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Every movement, oldest first.
    pub fn movements(&self) -> Result<Vec<MovementRecord>> {
        let mut movements = self.store.all::<MovementRecord>()?;
        movements.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));
        Ok(movements)
    }

    pub fn views(&self, params: &ViewParams) -> Result<LedgerViews> {
        Ok(LedgerViews::compute(&self.movements()?, params))
    }

    pub fn report(&self, filter: &ReportFilter) -> Result<Report> {
        Ok(report(&self.movements()?, filter))
    }
}
