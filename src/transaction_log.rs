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

//! Append-only, per-customer transaction log.
//!
//! The log is the source of truth for every balance. Entries are never edited
//! or removed; a correction is a new compensating entry.
//!
//! Storage is pluggable through [`LogStore`]. [`MemoryLog`] keeps one
//! independently locked stream per customer so appends for different customers
//! never contend on the same lock.

use crate::base::{CustomerId, SequenceNumber};
use crate::error::LedgerError;
use crate::transaction::{PendingTransaction, Transaction};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Backing storage for the transaction log.
///
/// Implementations must assign sequence numbers starting at 1, strictly
/// increasing and gapless per customer. Callers serialize appends per customer;
/// a store does not need to order concurrent appends for the same customer
/// beyond keeping its own state consistent.
pub trait LogStore: Send + Sync {
    /// Appends a transaction and returns it sealed with its sequence number.
    fn append(&self, pending: PendingTransaction) -> Result<Arc<Transaction>, LedgerError>;

    /// Sequence number of the most recent entry, or [`SequenceNumber::ZERO`].
    fn head(&self, customer_id: &CustomerId) -> SequenceNumber;

    /// Fetches a single entry by position.
    fn get(&self, customer_id: &CustomerId, sequence: SequenceNumber) -> Option<Arc<Transaction>>;

    /// All customers with at least one entry.
    fn customers(&self) -> Vec<CustomerId>;
}

type Stream = Arc<RwLock<Vec<Arc<Transaction>>>>;

/// In-memory [`LogStore`].
#[derive(Debug, Default)]
pub struct MemoryLog {
    streams: DashMap<CustomerId, Stream>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self {
            streams: DashMap::new(),
        }
    }

    /// Clones the stream handle out so the shard lock is released before the
    /// stream itself is locked.
    fn stream(&self, customer_id: &CustomerId) -> Option<Stream> {
        self.streams.get(customer_id).map(|s| Arc::clone(s.value()))
    }

    fn stream_or_insert(&self, customer_id: &CustomerId) -> Stream {
        if let Some(stream) = self.stream(customer_id) {
            return stream;
        }
        Arc::clone(self.streams.entry(customer_id.clone()).or_default().value())
    }
}

impl LogStore for MemoryLog {
    fn append(&self, pending: PendingTransaction) -> Result<Arc<Transaction>, LedgerError> {
        let stream = self.stream_or_insert(&pending.customer_id);
        let mut entries = stream.write();

        let head = SequenceNumber(entries.len() as u64);
        if let Some(last) = entries.last() {
            if last.sequence_number != head {
                return Err(LedgerError::LogCorrupted {
                    customer: pending.customer_id,
                    detail: format!(
                        "entry {} stored at position {}",
                        last.sequence_number, head
                    ),
                });
            }
        }

        let transaction = Arc::new(pending.seal(head.next(), Utc::now()));
        entries.push(Arc::clone(&transaction));
        Ok(transaction)
    }

    fn head(&self, customer_id: &CustomerId) -> SequenceNumber {
        self.stream(customer_id)
            .map(|stream| SequenceNumber(stream.read().len() as u64))
            .unwrap_or(SequenceNumber::ZERO)
    }

    fn get(&self, customer_id: &CustomerId, sequence: SequenceNumber) -> Option<Arc<Transaction>> {
        let index = usize::try_from(sequence.0).ok()?.checked_sub(1)?;
        let stream = self.stream(customer_id)?;
        let entries = stream.read();
        entries.get(index).cloned()
    }

    fn customers(&self) -> Vec<CustomerId> {
        self.streams.iter().map(|s| s.key().clone()).collect()
    }
}

/// Lazy, restartable walk over one customer's log in sequence order.
///
/// The upper bound is fixed when the replay is created, so entries appended
/// afterwards are not observed. Each step fetches one entry from the store.
pub struct Replay<'a, S: LogStore + ?Sized> {
    store: &'a S,
    customer_id: CustomerId,
    first: SequenceNumber,
    next: SequenceNumber,
    last: SequenceNumber,
}

impl<'a, S: LogStore + ?Sized> Replay<'a, S> {
    /// Replays everything currently in the customer's log.
    pub fn new(store: &'a S, customer_id: CustomerId) -> Self {
        let last = store.head(&customer_id);
        Self::bounded(store, customer_id, last)
    }

    /// Replays entries `1..=last`.
    pub fn bounded(store: &'a S, customer_id: CustomerId, last: SequenceNumber) -> Self {
        Self {
            store,
            customer_id,
            first: SequenceNumber(1),
            next: SequenceNumber(1),
            last,
        }
    }

    /// Narrows the replay to at most `limit` entries after skipping `offset`.
    /// Restarting with [`Replay::rewind`] returns to the start of the window.
    pub fn window(mut self, offset: usize, limit: usize) -> Self {
        let offset = offset as u64;
        let limit = limit as u64;
        self.first = SequenceNumber(self.first.0.saturating_add(offset));
        let end = self.first.0.saturating_add(limit).saturating_sub(1);
        self.last = SequenceNumber(self.last.0.min(end));
        self.next = self.first;
        self
    }

    /// Restarts the walk from the first entry of the window.
    pub fn rewind(&mut self) {
        self.next = self.first;
    }

    pub fn customer_id(&self) -> &CustomerId {
        &self.customer_id
    }

    fn remaining(&self) -> usize {
        (self.last.0 + 1).saturating_sub(self.next.0) as usize
    }
}

impl<S: LogStore + ?Sized> Clone for Replay<'_, S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store,
            customer_id: self.customer_id.clone(),
            first: self.first,
            next: self.next,
            last: self.last,
        }
    }
}

impl<S: LogStore + ?Sized> fmt::Debug for Replay<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replay")
            .field("customer_id", &self.customer_id)
            .field("next", &self.next)
            .field("last", &self.last)
            .finish()
    }
}

impl<S: LogStore + ?Sized> Iterator for Replay<'_, S> {
    type Item = Arc<Transaction>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.last {
            return None;
        }
        let transaction = self.store.get(&self.customer_id, self.next);
        if transaction.is_none() {
            tracing::error!(
                customer = %self.customer_id,
                sequence = %self.next,
                "log entry missing below recorded head"
            );
            self.next = self.last.next();
            return None;
        }
        self.next = self.next.next();
        transaction
    }

    fn nth(&mut self, n: usize) -> Option<Self::Item> {
        self.next = SequenceNumber(self.next.0.saturating_add(n as u64));
        self.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::Points;
    use crate::transaction::TransactionKind;

    fn accrual(customer: &str, amount: Points) -> PendingTransaction {
        PendingTransaction {
            customer_id: CustomerId::new(customer),
            kind: TransactionKind::Accrual,
            amount,
            reason: None,
        }
    }

    fn amounts<S: LogStore>(replay: Replay<'_, S>) -> Vec<Points> {
        replay.map(|tx| tx.amount).collect()
    }

    #[test]
    fn append_assigns_gapless_sequence_numbers() {
        let log = MemoryLog::new();
        for amount in 1..=5 {
            let tx = log.append(accrual("a", amount)).unwrap();
            assert_eq!(tx.sequence_number, SequenceNumber(amount));
        }
        assert_eq!(log.head(&CustomerId::new("a")), SequenceNumber(5));
    }

    #[test]
    fn sequences_are_independent_per_customer() {
        let log = MemoryLog::new();
        log.append(accrual("a", 1)).unwrap();
        log.append(accrual("a", 2)).unwrap();
        let tx = log.append(accrual("b", 3)).unwrap();
        assert_eq!(tx.sequence_number, SequenceNumber(1));

        let mut customers = log.customers();
        customers.sort();
        assert_eq!(customers, vec![CustomerId::new("a"), CustomerId::new("b")]);
    }

    #[test]
    fn get_outside_log_returns_none() {
        let log = MemoryLog::new();
        log.append(accrual("a", 1)).unwrap();
        let id = CustomerId::new("a");
        assert!(log.get(&id, SequenceNumber::ZERO).is_none());
        assert!(log.get(&id, SequenceNumber(2)).is_none());
        assert!(log.get(&CustomerId::new("z"), SequenceNumber(1)).is_none());
    }

    #[test]
    fn replay_is_ordered_and_restartable() {
        let log = MemoryLog::new();
        for amount in [10, 20, 30] {
            log.append(accrual("a", amount)).unwrap();
        }

        let mut replay = Replay::new(&log, CustomerId::new("a"));
        assert_eq!(replay.next().unwrap().amount, 10);
        assert_eq!(replay.next().unwrap().amount, 20);
        replay.rewind();
        assert_eq!(amounts(replay), vec![10, 20, 30]);
    }

    #[test]
    fn replay_does_not_see_later_appends() {
        let log = MemoryLog::new();
        log.append(accrual("a", 1)).unwrap();
        let replay = Replay::new(&log, CustomerId::new("a"));
        log.append(accrual("a", 2)).unwrap();
        assert_eq!(amounts(replay), vec![1]);
    }

    #[test]
    fn replay_of_unknown_customer_is_empty() {
        let log = MemoryLog::new();
        assert_eq!(Replay::new(&log, CustomerId::new("ghost")).count(), 0);
    }

    #[test]
    fn window_bounds_offset_and_limit() {
        let log = MemoryLog::new();
        for amount in 1..=10 {
            log.append(accrual("a", amount)).unwrap();
        }
        let id = CustomerId::new("a");

        assert_eq!(amounts(Replay::new(&log, id.clone()).window(2, 3)), vec![3, 4, 5]);
        assert_eq!(amounts(Replay::new(&log, id.clone()).window(8, 5)), vec![9, 10]);
        assert!(amounts(Replay::new(&log, id.clone()).window(10, 5)).is_empty());
        assert!(amounts(Replay::new(&log, id.clone()).window(0, 0)).is_empty());

        let mut window = Replay::new(&log, id).window(4, 2);
        assert_eq!(window.next().unwrap().amount, 5);
        window.rewind();
        assert_eq!(amounts(window), vec![5, 6]);
    }

    #[test]
    fn nth_skips_without_fetching() {
        let log = MemoryLog::new();
        for amount in 1..=4 {
            log.append(accrual("a", amount)).unwrap();
        }
        let mut replay = Replay::new(&log, CustomerId::new("a"));
        assert_eq!(replay.nth(2).unwrap().amount, 3);
        assert_eq!(replay.next().unwrap().amount, 4);
        assert!(replay.next().is_none());
    }
}
