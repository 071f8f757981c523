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

//! Points ledger service.
//!
//! The [`Ledger`] owns the transaction log and the balance index and is the
//! only writer of either. It exposes balance queries, accruals, redemptions,
//! and history reads.
//!
//! # Concurrency
//!
//! Every customer has its own [`RwLock`], created on first write and never
//! removed. A mutation holds the customer's write lock across
//! validate, log append, and index commit, so readers (who take the read lock)
//! never observe a log entry without its balance or the reverse. Different
//! customers share no lock beyond the brief [`DashMap`] shard access needed to
//! look up their lock, so their operations proceed in parallel.

use crate::balance_index::{BalanceIndex, Divergence, IndexEntry};
use crate::base::{CustomerId, Points, SequenceNumber};
use crate::error::LedgerError;
use crate::transaction::{PendingTransaction, Transaction, TransactionKind, apply};
use crate::transaction_log::{LogStore, MemoryLog, Replay};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Ledger behavior switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Create accounts on the first accrual or redemption. When disabled,
    /// accounts must be opened with [`Ledger::open_account`] and mutations on
    /// unknown customers fail with [`LedgerError::UnknownCustomer`].
    pub auto_create_accounts: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            auto_create_accounts: true,
        }
    }
}

/// Result of a balance query.
///
/// An unknown customer is not an error: `found` is `false` and `points` is 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceLookup {
    pub points: Points,
    pub found: bool,
}

/// Outcome of a committed accrual or redemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// Balance immediately after the transaction.
    pub balance: Points,
    pub transaction: Arc<Transaction>,
}

/// A page of a customer's history in ascending sequence order.
pub type History<'a, S> = Replay<'a, S>;

/// Loyalty points ledger.
///
/// # Invariants
///
/// - A customer's balance equals its accruals minus its redemptions.
/// - A balance is never negative; a redemption that would make it so is
///   rejected without appending anything.
/// - Sequence numbers are gapless and strictly increasing per customer.
/// - The index entry for a customer equals the fold of its log after every
///   completed mutation.
pub struct Ledger<S: LogStore = MemoryLog> {
    config: LedgerConfig,
    log: S,
    index: BalanceIndex,
    locks: DashMap<CustomerId, Arc<RwLock<()>>>,
}

impl Ledger<MemoryLog> {
    /// Creates an empty in-memory ledger with default configuration.
    pub fn new() -> Self {
        Self::with_config(LedgerConfig::default())
    }

    pub fn with_config(config: LedgerConfig) -> Self {
        Ledger {
            config,
            log: MemoryLog::new(),
            index: BalanceIndex::new(),
            locks: DashMap::new(),
        }
    }
}

impl Default for Ledger<MemoryLog> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: LogStore> Ledger<S> {
    /// Creates a ledger over an existing log store, building the index from
    /// whatever the store already holds.
    ///
    /// # Errors
    ///
    /// [`LedgerError::LogCorrupted`] if any customer's log does not fold.
    pub fn with_store(log: S, config: LedgerConfig) -> Result<Self, LedgerError> {
        let ledger = Ledger {
            config,
            log,
            index: BalanceIndex::new(),
            locks: DashMap::new(),
        };
        ledger.rebuild_index()?;
        Ok(ledger)
    }

    pub fn config(&self) -> LedgerConfig {
        self.config
    }

    /// The underlying transaction log.
    pub fn log_store(&self) -> &S {
        &self.log
    }

    /// Returns the current balance for a customer.
    pub fn get_balance(&self, customer_id: &CustomerId) -> BalanceLookup {
        let Some(lock) = self.existing_lock(customer_id) else {
            return BalanceLookup {
                points: 0,
                found: false,
            };
        };
        let _guard = lock.read();
        match self.index.get(customer_id) {
            Some(entry) => BalanceLookup {
                points: entry.balance,
                found: true,
            },
            None => BalanceLookup {
                points: 0,
                found: false,
            },
        }
    }

    /// Adds points to a customer's balance.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - `amount <= 0`.
    /// - [`LedgerError::BalanceOverflow`] - the new balance does not fit in [`Points`].
    /// - [`LedgerError::UnknownCustomer`] - no account and auto-creation is disabled.
    pub fn accrue(
        &self,
        customer_id: &CustomerId,
        amount: i64,
        reason: Option<&str>,
    ) -> Result<Receipt, LedgerError> {
        self.commit(customer_id, TransactionKind::Accrual, amount, reason)
    }

    /// Removes points from a customer's balance.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - `amount <= 0`.
    /// - [`LedgerError::InsufficientBalance`] - `amount` exceeds the current balance.
    /// - [`LedgerError::UnknownCustomer`] - no account and auto-creation is disabled.
    pub fn redeem(
        &self,
        customer_id: &CustomerId,
        amount: i64,
        reason: Option<&str>,
    ) -> Result<Receipt, LedgerError> {
        self.commit(customer_id, TransactionKind::Redemption, amount, reason)
    }

    /// Returns up to `limit` transactions starting after the first `offset`.
    ///
    /// The page is bounded by the log head at the time of the call. Unknown
    /// customers yield an empty page.
    pub fn history(&self, customer_id: &CustomerId, limit: usize, offset: usize) -> History<'_, S> {
        self.replay(customer_id).window(offset, limit)
    }

    /// Replays a customer's full log as of now.
    pub fn replay(&self, customer_id: &CustomerId) -> Replay<'_, S> {
        let head = match self.existing_lock(customer_id) {
            Some(lock) => {
                let _guard = lock.read();
                self.log.head(customer_id)
            }
            None => SequenceNumber::ZERO,
        };
        Replay::bounded(&self.log, customer_id.clone(), head)
    }

    /// Opens an account with a zero balance. Returns `false` if it already existed.
    pub fn open_account(&self, customer_id: &CustomerId) -> bool {
        let lock = self.lock(customer_id);
        let _guard = lock.write();
        if self.index.contains(customer_id) {
            return false;
        }
        self.index.open(customer_id);
        debug!(customer = %customer_id, "account opened");
        true
    }

    /// All customers with an account, sorted.
    pub fn customers(&self) -> Vec<CustomerId> {
        self.known_customers().into_iter().collect()
    }

    /// Refolds every index entry from the log, replacing whatever it held.
    ///
    /// Returns the number of customers reindexed.
    pub fn rebuild_index(&self) -> Result<usize, LedgerError> {
        let customers = self.known_customers();
        for customer_id in &customers {
            let lock = self.lock(customer_id);
            let _guard = lock.write();
            let head = self.log.head(customer_id);
            let replay = Replay::bounded(&self.log, customer_id.clone(), head);
            self.index.rebuild_customer(customer_id, head, replay).inspect_err(|e| {
                error!(customer = %customer_id, error = %e, "index rebuild failed");
            })?;
        }
        info!(customers = customers.len(), "balance index rebuilt from log");
        Ok(customers.len())
    }

    /// Compares every index entry with the fold of its log.
    pub fn verify_index(&self) -> Result<Vec<Divergence>, LedgerError> {
        let mut divergences = Vec::new();
        for customer_id in self.known_customers() {
            let lock = self.lock(&customer_id);
            let _guard = lock.read();
            let head = self.log.head(&customer_id);
            let replay = Replay::bounded(&self.log, customer_id.clone(), head);
            if let Some(divergence) = self.index.verify_customer(&customer_id, head, replay)? {
                warn!(
                    customer = %customer_id,
                    indexed = ?divergence.indexed,
                    replayed = ?divergence.replayed,
                    "balance index diverges from log"
                );
                divergences.push(divergence);
            }
        }
        Ok(divergences)
    }

    fn commit(
        &self,
        customer_id: &CustomerId,
        kind: TransactionKind,
        amount: i64,
        reason: Option<&str>,
    ) -> Result<Receipt, LedgerError> {
        let amount = positive_amount(amount)?;

        let lock = self.lock(customer_id);
        let _guard = lock.write();

        let current = self.current_entry(customer_id)?;
        let balance = apply(kind, current.balance, amount).ok_or_else(|| match kind {
            TransactionKind::Accrual => LedgerError::BalanceOverflow,
            TransactionKind::Redemption => LedgerError::InsufficientBalance {
                requested: amount,
                available: current.balance,
            },
        });
        let balance = balance.inspect_err(|e| {
            debug!(customer = %customer_id, %kind, amount, error = %e, "transaction rejected");
        })?;

        let transaction = self
            .log
            .append(PendingTransaction {
                customer_id: customer_id.clone(),
                kind,
                amount,
                reason: reason.map(str::to_owned),
            })
            .inspect_err(|e| error!(customer = %customer_id, error = %e, "log append failed"))?;

        if transaction.sequence_number != current.sequence.next() {
            let e = LedgerError::LogCorrupted {
                customer: customer_id.clone(),
                detail: format!(
                    "appended sequence {} after indexed sequence {}",
                    transaction.sequence_number, current.sequence
                ),
            };
            error!(error = %e, "log and index out of step");
            return Err(e);
        }

        self.index.commit(
            customer_id,
            IndexEntry {
                balance,
                sequence: transaction.sequence_number,
            },
        );
        debug!(
            customer = %customer_id,
            %kind,
            amount,
            balance,
            sequence = %transaction.sequence_number,
            "transaction committed"
        );

        Ok(Receipt {
            balance,
            transaction,
        })
    }

    /// Index entry to validate against, refolded from the log if it lags.
    /// Caller holds the customer's write lock.
    fn current_entry(&self, customer_id: &CustomerId) -> Result<IndexEntry, LedgerError> {
        let indexed = self.index.get(customer_id);
        let head = self.log.head(customer_id);

        if indexed.is_none() && head == SequenceNumber::ZERO {
            if !self.config.auto_create_accounts {
                return Err(LedgerError::UnknownCustomer(customer_id.clone()));
            }
            return Ok(IndexEntry::default());
        }

        match indexed {
            Some(entry) if entry.sequence == head => Ok(entry),
            _ => {
                warn!(customer = %customer_id, indexed = ?indexed, %head, "index behind log, refolding");
                let replay = Replay::bounded(&self.log, customer_id.clone(), head);
                self.index.rebuild_customer(customer_id, head, replay)
            }
        }
    }

    fn existing_lock(&self, customer_id: &CustomerId) -> Option<Arc<RwLock<()>>> {
        self.locks.get(customer_id).map(|l| Arc::clone(l.value()))
    }

    /// Clones the customer's lock out of the map so the shard is released
    /// before the lock is taken.
    fn lock(&self, customer_id: &CustomerId) -> Arc<RwLock<()>> {
        if let Some(lock) = self.existing_lock(customer_id) {
            return lock;
        }
        Arc::clone(self.locks.entry(customer_id.clone()).or_default().value())
    }

    fn known_customers(&self) -> BTreeSet<CustomerId> {
        let mut customers: BTreeSet<CustomerId> = self.log.customers().into_iter().collect();
        customers.extend(self.index.customers());
        customers
    }
}

fn positive_amount(amount: i64) -> Result<Points, LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount { amount });
    }
    Ok(amount as Points)
}
