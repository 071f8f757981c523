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

//! Error types for ledger operations.

use crate::base::{CustomerId, Points};
use thiserror::Error;

/// Ledger operation errors.
///
/// Every variant except [`LedgerError::LogCorrupted`] is a validation outcome the
/// caller can recover from. A rejected operation leaves the ledger unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Amount is zero or negative
    #[error("invalid amount {amount} (must be positive)")]
    InvalidAmount { amount: i64 },

    /// Redemption would drive the balance below zero
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Points, available: Points },

    /// Account does not exist and auto-creation is disabled
    #[error("unknown customer {0}")]
    UnknownCustomer(CustomerId),

    /// Accrual would exceed the representable balance
    #[error("balance overflow")]
    BalanceOverflow,

    /// The log for a customer cannot be folded into a valid balance
    #[error("transaction log corrupted for {customer}: {detail}")]
    LogCorrupted { customer: CustomerId, detail: String },
}

impl LedgerError {
    /// Stable machine-readable code for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidAmount { .. } => "INVALID_AMOUNT",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::UnknownCustomer(_) => "UNKNOWN_CUSTOMER",
            Self::BalanceOverflow => "BALANCE_OVERFLOW",
            Self::LogCorrupted { .. } => "LOG_CORRUPTED",
        }
    }

    /// Returns `true` for conditions that must reach an operator.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::LogCorrupted { .. })
    }
}
