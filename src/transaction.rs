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

//! Ledger transactions.
//!
//! A [`PendingTransaction`] is what a caller asks for; the log turns it into an
//! immutable [`Transaction`] by stamping the next sequence number and the
//! append time.

use crate::base::{CustomerId, Points, SequenceNumber};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Accrual,
    Redemption,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accrual => f.write_str("ACCRUAL"),
            Self::Redemption => f.write_str("REDEMPTION"),
        }
    }
}

/// A validated transaction waiting to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
    pub customer_id: CustomerId,
    pub kind: TransactionKind,
    pub amount: Points,
    pub reason: Option<String>,
}

/// An appended, immutable ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub customer_id: CustomerId,
    pub kind: TransactionKind,
    pub amount: Points,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
    pub sequence_number: SequenceNumber,
    pub timestamp: DateTime<Utc>,
}

impl PendingTransaction {
    /// Seals the transaction at the given log position.
    pub fn seal(self, sequence_number: SequenceNumber, timestamp: DateTime<Utc>) -> Transaction {
        Transaction {
            customer_id: self.customer_id,
            kind: self.kind,
            amount: self.amount,
            reason: self.reason,
            sequence_number,
            timestamp,
        }
    }
}

impl Transaction {
    /// Applies this entry to a running balance.
    ///
    /// Returns `None` when the result would be negative or overflow, which a
    /// well-formed log never produces.
    pub fn apply_to(&self, balance: Points) -> Option<Points> {
        apply(self.kind, balance, self.amount)
    }
}

pub(crate) fn apply(kind: TransactionKind, balance: Points, amount: Points) -> Option<Points> {
    match kind {
        TransactionKind::Accrual => balance.checked_add(amount),
        TransactionKind::Redemption => balance.checked_sub(amount),
    }
}
