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

//! Balance index.
//!
//! A cache of `customer -> balance` derived from the transaction log. It exists
//! so balance queries do not replay the log; it is never the source of truth.
//! Each entry records the sequence number it was folded up to, which lets the
//! ledger check it against the log and rebuild it when the two disagree.

use crate::base::{CustomerId, Points, SequenceNumber};
use crate::error::LedgerError;
use crate::transaction::Transaction;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

/// Cached balance of one customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct IndexEntry {
    pub balance: Points,
    /// Last log entry folded into `balance`.
    pub sequence: SequenceNumber,
}

impl IndexEntry {
    /// Folds a log replay from the empty balance. `head` is the sequence
    /// number the log reports as its last entry; the replay must reach it.
    ///
    /// # Errors
    ///
    /// [`LedgerError::LogCorrupted`] if the replay skips a sequence number,
    /// ends before `head`, or an entry would drive the balance negative or
    /// past `u64::MAX`.
    pub fn fold<I>(customer_id: &CustomerId, head: SequenceNumber, replay: I) -> Result<Self, LedgerError>
    where
        I: IntoIterator<Item = Arc<Transaction>>,
    {
        let entry = replay
            .into_iter()
            .try_fold(IndexEntry::default(), |entry, tx| entry.apply(customer_id, &tx))?;
        if entry.sequence != head {
            return Err(LedgerError::LogCorrupted {
                customer: customer_id.clone(),
                detail: format!("replay ended at sequence {}, log head is {}", entry.sequence, head),
            });
        }
        Ok(entry)
    }

    fn apply(self, customer_id: &CustomerId, tx: &Transaction) -> Result<Self, LedgerError> {
        let expected = self.sequence.next();
        if tx.sequence_number != expected {
            return Err(LedgerError::LogCorrupted {
                customer: customer_id.clone(),
                detail: format!("expected sequence {}, found {}", expected, tx.sequence_number),
            });
        }
        let balance = tx.apply_to(self.balance).ok_or_else(|| LedgerError::LogCorrupted {
            customer: customer_id.clone(),
            detail: format!(
                "{} of {} at sequence {} leaves no valid balance from {}",
                tx.kind, tx.amount, tx.sequence_number, self.balance
            ),
        })?;
        Ok(IndexEntry {
            balance,
            sequence: tx.sequence_number,
        })
    }
}

/// Disagreement between the index and the log for one customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Divergence {
    pub customer_id: CustomerId,
    /// What the index holds, `None` if the customer is missing from it.
    pub indexed: Option<IndexEntry>,
    /// What replaying the log produces.
    pub replayed: IndexEntry,
}

/// Concurrent `customer -> balance` cache.
///
/// Writes are made by the ledger while it holds the customer's lock, so this
/// type does no ordering of its own.
#[derive(Debug, Default)]
pub struct BalanceIndex {
    entries: DashMap<CustomerId, IndexEntry>,
}

impl BalanceIndex {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, customer_id: &CustomerId) -> Option<IndexEntry> {
        self.entries.get(customer_id).map(|e| *e.value())
    }

    /// Records the balance after a committed log entry.
    pub fn commit(&self, customer_id: &CustomerId, entry: IndexEntry) {
        self.entries.insert(customer_id.clone(), entry);
    }

    /// Registers a customer with an empty balance unless already present.
    pub fn open(&self, customer_id: &CustomerId) {
        self.entries.entry(customer_id.clone()).or_default();
    }

    /// Drops a customer's entry. The next write or rebuild refolds it from the log.
    pub fn remove(&self, customer_id: &CustomerId) -> Option<IndexEntry> {
        self.entries.remove(customer_id).map(|(_, entry)| entry)
    }

    pub fn contains(&self, customer_id: &CustomerId) -> bool {
        self.entries.contains_key(customer_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn customers(&self) -> Vec<CustomerId> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Replaces one customer's entry with the fold of its log. The entry is
    /// left untouched if the log does not fold.
    pub fn rebuild_customer<I>(
        &self,
        customer_id: &CustomerId,
        head: SequenceNumber,
        replay: I,
    ) -> Result<IndexEntry, LedgerError>
    where
        I: IntoIterator<Item = Arc<Transaction>>,
    {
        let entry = IndexEntry::fold(customer_id, head, replay)?;
        self.commit(customer_id, entry);
        Ok(entry)
    }

    /// Compares one customer's entry with the fold of its log.
    pub fn verify_customer<I>(
        &self,
        customer_id: &CustomerId,
        head: SequenceNumber,
        replay: I,
    ) -> Result<Option<Divergence>, LedgerError>
    where
        I: IntoIterator<Item = Arc<Transaction>>,
    {
        let replayed = IndexEntry::fold(customer_id, head, replay)?;
        let indexed = self.get(customer_id);
        let consistent = match indexed {
            Some(entry) => entry == replayed,
            None => replayed.sequence == SequenceNumber::ZERO,
        };
        if consistent {
            return Ok(None);
        }
        Ok(Some(Divergence {
            customer_id: customer_id.clone(),
            indexed,
            replayed,
        }))
    }
}
