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

//! Ledger public API integration tests.

use loyalty_ledger::{
    BalanceLookup, CustomerId, Ledger, LedgerConfig, LedgerError, LogStore, MemoryLog,
    PendingTransaction, SequenceNumber, Transaction, TransactionKind,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

fn id(s: &str) -> CustomerId {
    CustomerId::new(s)
}

#[test]
fn accrual_creates_account() {
    let ledger = Ledger::new();
    let receipt = ledger.accrue(&id("cust-001"), 50, None).unwrap();

    assert_eq!(receipt.balance, 50);
    assert_eq!(
        ledger.get_balance(&id("cust-001")),
        BalanceLookup {
            points: 50,
            found: true
        }
    );
}

#[test]
fn unknown_customer_is_not_found_with_zero_balance() {
    let ledger = Ledger::new();
    assert_eq!(
        ledger.get_balance(&id("never-seen")),
        BalanceLookup {
            points: 0,
            found: false
        }
    );
    assert_eq!(ledger.history(&id("never-seen"), 10, 0).count(), 0);
}

#[test]
fn signup_reward_overdraw_scenario() {
    let ledger = Ledger::new();
    let customer = id("cust-001");

    assert_eq!(ledger.accrue(&customer, 100, Some("signup")).unwrap().balance, 100);
    assert_eq!(ledger.redeem(&customer, 30, Some("reward")).unwrap().balance, 70);
    assert_eq!(
        ledger.redeem(&customer, 1000, Some("x")),
        Err(LedgerError::InsufficientBalance {
            requested: 1000,
            available: 70
        })
    );
    assert_eq!(ledger.get_balance(&customer).points, 70);

    let history: Vec<_> = ledger.history(&customer, 100, 0).collect();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].kind, TransactionKind::Accrual);
    assert_eq!(history[0].amount, 100);
    assert_eq!(history[0].reason.as_deref(), Some("signup"));
    assert_eq!(history[0].sequence_number, SequenceNumber(1));
    assert_eq!(history[1].kind, TransactionKind::Redemption);
    assert_eq!(history[1].amount, 30);
    assert_eq!(history[1].sequence_number, SequenceNumber(2));
    assert!(history[0].timestamp <= history[1].timestamp);
}

#[test]
fn redemption_on_new_customer_fails_without_creating_account() {
    let ledger = Ledger::new();
    let result = ledger.redeem(&id("a"), 1, None);

    assert_eq!(
        result,
        Err(LedgerError::InsufficientBalance {
            requested: 1,
            available: 0
        })
    );
    assert!(!ledger.get_balance(&id("a")).found);
    assert!(ledger.customers().is_empty());
}

#[test]
fn redeem_entire_balance_leaves_zero() {
    let ledger = Ledger::new();
    ledger.accrue(&id("a"), 25, None).unwrap();
    assert_eq!(ledger.redeem(&id("a"), 25, None).unwrap().balance, 0);

    let lookup = ledger.get_balance(&id("a"));
    assert!(lookup.found);
    assert_eq!(lookup.points, 0);
}

#[test]
fn non_positive_amounts_are_rejected_without_side_effects() {
    let ledger = Ledger::new();
    ledger.accrue(&id("a"), 10, None).unwrap();

    for amount in [0, -1, i64::MIN] {
        assert_eq!(
            ledger.accrue(&id("a"), amount, None),
            Err(LedgerError::InvalidAmount { amount })
        );
        assert_eq!(
            ledger.redeem(&id("a"), amount, None),
            Err(LedgerError::InvalidAmount { amount })
        );
    }

    assert_eq!(ledger.get_balance(&id("a")).points, 10);
    assert_eq!(ledger.history(&id("a"), 10, 0).count(), 1);
    assert!(!ledger.get_balance(&id("b")).found);
    let _ = ledger.accrue(&id("b"), 0, None);
    assert_eq!(ledger.customers(), vec![id("a")]);
}

#[test]
fn accrual_overflow_is_rejected() {
    let ledger = Ledger::new();
    ledger.accrue(&id("a"), i64::MAX, None).unwrap();
    ledger.accrue(&id("a"), i64::MAX, None).unwrap();

    assert_eq!(
        ledger.accrue(&id("a"), 2, None),
        Err(LedgerError::BalanceOverflow)
    );
    assert_eq!(ledger.get_balance(&id("a")).points, (i64::MAX as u64) * 2);
    assert_eq!(ledger.history(&id("a"), 10, 0).count(), 2);
}

#[test]
fn customers_are_isolated() {
    let ledger = Ledger::new();
    ledger.accrue(&id("a"), 100, None).unwrap();
    ledger.accrue(&id("b"), 200, None).unwrap();
    ledger.redeem(&id("b"), 50, None).unwrap();

    assert_eq!(ledger.get_balance(&id("a")).points, 100);
    assert_eq!(ledger.get_balance(&id("b")).points, 150);

    let b_history: Vec<_> = ledger.history(&id("b"), 10, 0).collect();
    assert_eq!(b_history[0].sequence_number, SequenceNumber(1));
    assert!(b_history.iter().all(|tx| tx.customer_id == id("b")));
}

#[test]
fn history_pages_with_limit_and_offset() {
    let ledger = Ledger::new();
    for amount in 1..=7 {
        ledger.accrue(&id("a"), amount, None).unwrap();
    }

    let page: Vec<_> = ledger.history(&id("a"), 3, 2).map(|tx| tx.amount).collect();
    assert_eq!(page, vec![3, 4, 5]);

    let tail: Vec<_> = ledger.history(&id("a"), 10, 5).map(|tx| tx.amount).collect();
    assert_eq!(tail, vec![6, 7]);

    assert_eq!(ledger.history(&id("a"), 10, 7).count(), 0);
    assert_eq!(ledger.history(&id("a"), 0, 0).count(), 0);
}

#[test]
fn history_is_restartable_and_ignores_later_writes() {
    let ledger = Ledger::new();
    ledger.accrue(&id("a"), 1, None).unwrap();
    ledger.accrue(&id("a"), 2, None).unwrap();

    let mut history = ledger.history(&id("a"), 10, 0);
    ledger.accrue(&id("a"), 3, None).unwrap();

    assert_eq!(history.next().unwrap().amount, 1);
    history.rewind();
    let amounts: Vec<_> = history.map(|tx| tx.amount).collect();
    assert_eq!(amounts, vec![1, 2]);
}

#[test]
fn replay_matches_last_returned_balance() {
    let ledger = Ledger::new();
    let mut last = 0;
    for (i, amount) in [40, 15, 60, 5, 99].into_iter().enumerate() {
        let receipt = if i % 2 == 0 {
            ledger.accrue(&id("a"), amount, None)
        } else {
            ledger.redeem(&id("a"), amount, None)
        };
        if let Ok(receipt) = receipt {
            last = receipt.balance;
        }
    }

    let replayed = ledger.replay(&id("a")).fold(0u64, |balance, tx| {
        tx.apply_to(balance).expect("log folds to a valid balance")
    });
    assert_eq!(replayed, last);
    assert_eq!(ledger.get_balance(&id("a")).points, last);
}

#[test]
fn rebuild_index_preserves_balances() {
    let ledger = Ledger::new();
    ledger.accrue(&id("a"), 10, None).unwrap();
    ledger.accrue(&id("b"), 20, None).unwrap();
    ledger.redeem(&id("b"), 5, None).unwrap();

    assert_eq!(ledger.rebuild_index().unwrap(), 2);
    assert_eq!(ledger.get_balance(&id("a")).points, 10);
    assert_eq!(ledger.get_balance(&id("b")).points, 15);
    assert!(ledger.verify_index().unwrap().is_empty());
}

#[test]
fn strict_mode_requires_open_account() {
    let ledger = Ledger::with_config(LedgerConfig {
        auto_create_accounts: false,
    });

    assert_eq!(
        ledger.accrue(&id("a"), 10, None),
        Err(LedgerError::UnknownCustomer(id("a")))
    );
    assert_eq!(
        ledger.redeem(&id("a"), 10, None),
        Err(LedgerError::UnknownCustomer(id("a")))
    );
    assert!(!ledger.get_balance(&id("a")).found);

    assert!(ledger.open_account(&id("a")));
    assert!(!ledger.open_account(&id("a")));
    assert_eq!(
        ledger.get_balance(&id("a")),
        BalanceLookup {
            points: 0,
            found: true
        }
    );
    assert_eq!(ledger.accrue(&id("a"), 10, None).unwrap().balance, 10);
}

#[test]
fn independent_ledgers_do_not_share_state() {
    let first = Ledger::new();
    let second = Ledger::new();
    first.accrue(&id("a"), 10, None).unwrap();

    assert!(!second.get_balance(&id("a")).found);
    assert_eq!(second.history(&id("a"), 10, 0).count(), 0);
}

// === Log corruption ===

/// Log store that loses sequence 2 for every customer while `dropping` is set.
#[derive(Default)]
struct LossyLog {
    inner: MemoryLog,
    dropping: AtomicBool,
}

impl LogStore for LossyLog {
    fn append(&self, pending: PendingTransaction) -> Result<Arc<Transaction>, LedgerError> {
        self.inner.append(pending)
    }

    fn head(&self, customer_id: &CustomerId) -> SequenceNumber {
        self.inner.head(customer_id)
    }

    fn get(&self, customer_id: &CustomerId, sequence: SequenceNumber) -> Option<Arc<Transaction>> {
        if sequence == SequenceNumber(2) && self.dropping.load(Ordering::SeqCst) {
            return None;
        }
        self.inner.get(customer_id, sequence)
    }

    fn customers(&self) -> Vec<CustomerId> {
        self.inner.customers()
    }
}

fn seed(log: &LossyLog, customer: &CustomerId) {
    for (kind, amount) in [
        (TransactionKind::Accrual, 100),
        (TransactionKind::Redemption, 30),
        (TransactionKind::Accrual, 5),
    ] {
        log.append(PendingTransaction {
            customer_id: customer.clone(),
            kind,
            amount,
            reason: None,
        })
        .unwrap();
    }
}

fn truncated(customer: &CustomerId) -> LedgerError {
    LedgerError::LogCorrupted {
        customer: customer.clone(),
        detail: "replay ended at sequence 1, log head is 3".to_string(),
    }
}

#[test]
fn opening_over_log_with_missing_entry_fails() {
    let log = LossyLog::default();
    seed(&log, &id("a"));
    log.dropping.store(true, Ordering::SeqCst);

    match Ledger::with_store(log, LedgerConfig::default()) {
        Ok(_) => panic!("ledger opened over a log with a missing entry"),
        Err(e) => {
            assert!(e.is_fatal());
            assert_eq!(e, truncated(&id("a")));
        }
    }
}

#[test]
fn rebuild_and_verify_report_missing_entry() {
    let log = LossyLog::default();
    seed(&log, &id("a"));
    let ledger = Ledger::with_store(log, LedgerConfig::default()).unwrap();
    assert_eq!(ledger.get_balance(&id("a")).points, 75);

    ledger.log_store().dropping.store(true, Ordering::SeqCst);
    assert_eq!(ledger.verify_index(), Err(truncated(&id("a"))));
    assert_eq!(ledger.rebuild_index(), Err(truncated(&id("a"))));
    assert_eq!(ledger.get_balance(&id("a")).points, 75);
}
