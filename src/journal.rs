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

//! Commit journal.
//!
//! Every committed store mutation is appended to a lock-free queue with a
//! monotonic sequence number, preserving commit order. Collaborators that
//! mirror the store (renderers, sync agents) drain it to learn what changed.
//!
//! The queue holds at most `capacity` mutations. Past that the oldest are
//! dropped; a reader that falls behind sees a gap in the sequence numbers.

use crate::base::RecordKey;
use crate::schema::Collection;
use crossbeam::queue::SegQueue;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// What a committed mutation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Insert,
    Replace,
    Delete,
    Clear,
    CreateCollection,
}

/// A mutation staged inside a transaction, before it has a sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingMutation {
    pub collection: Collection,
    pub key: Option<RecordKey>,
    pub operation: Operation,
}

/// A committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mutation {
    pub sequence: u64,
    pub collection: Collection,
    pub key: Option<RecordKey>,
    pub operation: Operation,
}

/// Mutations a journal keeps when no capacity is given.
pub const DEFAULT_JOURNAL_CAPACITY: usize = 4096;

/// Ordered, thread-safe log of the most recent committed mutations.
#[derive(Debug)]
pub struct Journal {
    entries: SegQueue<Mutation>,
    next_sequence: AtomicU64,
    capacity: usize,
}

impl Journal {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_JOURNAL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: SegQueue::new(),
            next_sequence: AtomicU64::new(0),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends a committed batch. Sequence numbers are contiguous within it.
    ///
    /// Callers hold the store's write lock, so batches never interleave.
    pub(crate) fn record(&self, batch: Vec<PendingMutation>) {
        for pending in batch {
            let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst) + 1;
            self.entries.push(Mutation {
                sequence,
                collection: pending.collection,
                key: pending.key,
                operation: pending.operation,
            });
        }
        while self.entries.len() > self.capacity {
            self.entries.pop();
        }
    }

    /// Removes and returns every mutation recorded so far, oldest first.
    pub fn drain(&self) -> Vec<Mutation> {
        std::iter::from_fn(|| self.entries.pop()).collect()
    }

    /// Sequence number of the last committed mutation, `0` if none.
    pub fn last_sequence(&self) -> u64 {
        self.next_sequence.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for Journal {
    fn default() -> Self {
        Self::new()
    }
}
