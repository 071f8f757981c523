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

//! # Loyalty Ledger
//!
//! This library tracks per-customer loyalty point balances. Points are accrued
//! and redeemed through a [`Ledger`], which records every change in an
//! append-only transaction log and keeps a derived balance index in step with it.
//!
//! ## Core Components
//!
//! - [`Ledger`]: Service owning the log and index; serializes writes per customer
//! - [`LogStore`] / [`MemoryLog`]: Pluggable append-only transaction log
//! - [`BalanceIndex`]: Cached balances, rebuildable from the log
//! - [`LedgerError`]: Error types for rejected operations
//! - [`api`]: JSON-over-HTTP transport adapter
//!
//! ## Example
//!
//! ```
//! use loyalty_ledger::{CustomerId, Ledger, LedgerError, TransactionKind};
//!
//! let ledger = Ledger::new();
//! let customer = CustomerId::new("cust-001");
//!
//! assert_eq!(ledger.accrue(&customer, 100, Some("signup")).unwrap().balance, 100);
//! assert_eq!(ledger.redeem(&customer, 30, Some("reward")).unwrap().balance, 70);
//! assert!(matches!(
//!     ledger.redeem(&customer, 1000, None),
//!     Err(LedgerError::InsufficientBalance { .. })
//! ));
//!
//! let kinds: Vec<_> = ledger.history(&customer, 10, 0).map(|tx| tx.kind).collect();
//! assert_eq!(kinds, vec![TransactionKind::Accrual, TransactionKind::Redemption]);
//! ```
//!
//! ## Thread Safety
//!
//! Writes for one customer are mutually exclusive; writes for different
//! customers proceed in parallel. Readers never observe a log entry without
//! its matching balance.

pub mod api;
pub mod balance_index;
mod base;
pub mod error;
mod ledger;
mod transaction;
pub mod transaction_log;

pub use balance_index::{BalanceIndex, Divergence, IndexEntry};
pub use base::{CustomerId, Points, SequenceNumber};
pub use error::LedgerError;
pub use ledger::{BalanceLookup, History, Ledger, LedgerConfig, Receipt};
pub use transaction::{PendingTransaction, Transaction, TransactionKind};
pub use transaction_log::{LogStore, MemoryLog, Replay};
