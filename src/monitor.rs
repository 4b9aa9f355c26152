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

//! Consistency monitor.
//!
//! After every balance recomputation the command facade hands the fresh
//! views to [`ConsistencyMonitor::inspect`]. A non-empty ledger whose global
//! balance, or whose commission-adjusted available balance, sits within
//! [`ZERO_BALANCE_EPSILON`] of zero is treated as a stale display: the monitor recomputes every view from the store and pushes the
//! result to a [`RefreshSink`]. Records are never touched.
//!
//! A ledger whose movements genuinely cancel out also triggers a refresh.
//! That is harmless, only costing one extra recomputation.

use crate::aggregation::LedgerViews;
use crate::error::Result;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, warn};

/// Balances closer to zero than this are suspicious.
pub const ZERO_BALANCE_EPSILON: Decimal = dec!(0.01);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Suspicious,
    Repairing,
}

/// Receives views recomputed by a repair pass.
pub trait RefreshSink: Send + Sync {
    fn refresh(&self, views: &LedgerViews);
}

/// Sink that drops every refresh.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl RefreshSink for NoopSink {
    fn refresh(&self, _views: &LedgerViews) {}
}

/// Outcome of one inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorReport {
    /// States entered after `Idle`, in order. Empty when nothing fired.
    pub transitions: Vec<MonitorState>,
    /// Views handed to the sink by the repair pass.
    pub repaired: Option<LedgerViews>,
}

impl MonitorReport {
    pub fn quiet() -> Self {
        Self {
            transitions: Vec::new(),
            repaired: None,
        }
    }

    pub fn triggered(&self) -> bool {
        self.repaired.is_some()
    }
}

/// Stateless zero-balance detector. Each call starts and ends `Idle`.
#[derive(Debug, Clone, Copy)]
pub struct ConsistencyMonitor {
    epsilon: Decimal,
}

impl ConsistencyMonitor {
    pub fn new() -> Self {
        Self {
            epsilon: ZERO_BALANCE_EPSILON,
        }
    }

    pub fn with_epsilon(epsilon: Decimal) -> Self {
        Self { epsilon }
    }

    /// A non-empty ledger whose global or available balance is near zero.
    pub fn is_suspicious(&self, views: &LedgerViews) -> bool {
        views.movement_count > 0
            && (views.global_balance.abs() < self.epsilon
                || views.available_balance.abs() < self.epsilon)
    }

    /// Inspects `views`; when suspicious, runs `recompute` once and pushes
    /// its result to `sink`.
    ///
    /// The repaired views are not inspected again.
    ///
    /// # Errors
    ///
    /// Whatever `recompute` returns. The monitor is back to `Idle` either way.
    pub fn inspect<F>(
        &self,
        views: &LedgerViews,
        recompute: F,
        sink: &dyn RefreshSink,
    ) -> Result<MonitorReport>
    where
        F: FnOnce() -> Result<LedgerViews>,
    {
        if !self.is_suspicious(views) {
            return Ok(MonitorReport::quiet());
        }

        warn!(
            movements = views.movement_count,
            balance = %views.global_balance,
            available = %views.available_balance,
            "balance is zero with movements present, refreshing views"
        );
        let mut transitions = vec![MonitorState::Suspicious, MonitorState::Repairing];

        let repaired = recompute()?;
        sink.refresh(&repaired);
        transitions.push(MonitorState::Idle);
        debug!(balance = %repaired.global_balance, "views refreshed");

        Ok(MonitorReport {
            transitions,
            repaired: Some(repaired),
        })
    }
}

impl Default for ConsistencyMonitor {
    fn default() -> Self {
        Self::new()
    }
}
