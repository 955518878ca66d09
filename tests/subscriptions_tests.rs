// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use chrono::NaiveDate;
use milebook::commands::subscriptions::{
    correct_last_subscription, create_subscription, process_due_credits, process_monthly_credit,
    CreditOutcome, SubscriptionTerms,
};
use milebook::commands::{accounts, programs, transactions};
use milebook::error::LedgerError;
use milebook::models::{AcquisitionMode, Management, Periodicity, ProgramKind};
use milebook::db;
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::str::FromStr;

fn setup() -> Connection {
    let mut conn = Connection::open_in_memory().unwrap();
    db::init_schema(&mut conn).unwrap();
    accounts::register_account(&conn, "Alice", "52998224725", Management::Own).unwrap();
    programs::add_program(&conn, "Smiles", ProgramKind::Airline).unwrap();
    conn
}

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn club_terms() -> SubscriptionTerms {
    SubscriptionTerms {
        periodicity: Periodicity::Monthly,
        cycle_value: dec("100.00"),
        cycle_miles: 100_000,
        start_date: d(2024, 1, 1),
        renewal_date: d(2025, 1, 1),
    }
}

#[test]
fn fixed_cpm_is_locked_at_creation() {
    let conn = setup();
    let created = create_subscription(&conn, "Alice", "Smiles", &club_terms()).unwrap();
    assert_eq!(created.fixed_cpm, dec("1"));

    let stored: String = conn
        .query_row(
            "SELECT fixed_cpm FROM subscriptions WHERE id=?1",
            [created.id],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(Decimal::from_str(&stored).unwrap(), dec("1"));
}

#[test]
fn invalid_terms_are_rejected() {
    let conn = setup();
    let mut terms = club_terms();
    terms.cycle_value = Decimal::ZERO;
    assert!(matches!(
        create_subscription(&conn, "Alice", "Smiles", &terms).unwrap_err(),
        LedgerError::Validation(_)
    ));

    let mut terms = club_terms();
    terms.renewal_date = d(2023, 1, 1);
    assert!(matches!(
        create_subscription(&conn, "Alice", "Smiles", &terms).unwrap_err(),
        LedgerError::Validation(_)
    ));
}

#[test]
fn second_active_subscription_conflicts_until_first_is_closed() {
    let conn = setup();
    let first = create_subscription(&conn, "Alice", "Smiles", &club_terms()).unwrap();
    let err = create_subscription(&conn, "Alice", "Smiles", &club_terms()).unwrap_err();
    assert!(matches!(err, LedgerError::Conflict(_)));

    // end-dating deactivates the row, freeing the pair for a new contract
    conn.execute(
        "UPDATE subscriptions SET end_date='2024-06-30' WHERE id=?1",
        [first.id],
    )
    .unwrap();
    let active: bool = conn
        .query_row(
            "SELECT active FROM subscriptions WHERE id=?1",
            [first.id],
            |r| r.get(0),
        )
        .unwrap();
    assert!(!active);

    create_subscription(&conn, "Alice", "Smiles", &club_terms()).unwrap();
}

#[test]
fn monthly_credit_writes_one_transaction_and_one_checkpoint() {
    let mut conn = setup();
    let created = create_subscription(&conn, "Alice", "Smiles", &club_terms()).unwrap();

    let outcome = process_monthly_credit(&mut conn, created.id, "2024-03").unwrap();
    let CreditOutcome::Credited {
        miles, cost, cpm, ..
    } = outcome
    else {
        panic!("expected a credit");
    };
    assert_eq!(miles, 100_000);
    assert_eq!(cost, dec("100.00"));
    assert_eq!(cpm, dec("1"));

    let (tx_count, credited, cost_s, cpm_s): (i64, i64, String, String) = conn
        .query_row(
            "SELECT COUNT(*), MAX(credited_miles), MAX(total_cost), MAX(cpm_real)
             FROM transactions WHERE subscription_id=?1",
            [created.id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .unwrap();
    assert_eq!(tx_count, 1);
    assert_eq!(credited, 100_000);
    assert_eq!(Decimal::from_str(&cost_s).unwrap(), dec("100.00"));
    // the locked rate is copied verbatim, never recomputed
    assert_eq!(Decimal::from_str(&cpm_s).unwrap(), dec("1"));

    let chk_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM cpm_checkpoints WHERE kind='monthly' AND period='2024-03'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(chk_count, 1);
}

#[test]
fn second_credit_for_same_period_is_idempotent() {
    let mut conn = setup();
    let created = create_subscription(&conn, "Alice", "Smiles", &club_terms()).unwrap();

    process_monthly_credit(&mut conn, created.id, "2024-03").unwrap();
    let second = process_monthly_credit(&mut conn, created.id, "2024-03").unwrap();
    assert!(matches!(second, CreditOutcome::AlreadyCredited { .. }));

    let (tx_count, chk_count): (i64, i64) = conn
        .query_row(
            "SELECT (SELECT COUNT(*) FROM transactions),
                    (SELECT COUNT(*) FROM cpm_checkpoints)",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(tx_count, 1);
    assert_eq!(chk_count, 1);
}

#[test]
fn concurrent_credits_yield_a_single_winner() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("ledger.sqlite");

    let mut conn1 = Connection::open(&path).unwrap();
    db::init_schema(&mut conn1).unwrap();
    let mut conn2 = Connection::open(&path).unwrap();
    db::init_schema(&mut conn2).unwrap();

    accounts::register_account(&conn1, "Alice", "52998224725", Management::Own).unwrap();
    programs::add_program(&conn1, "Smiles", ProgramKind::Airline).unwrap();
    let created = create_subscription(&conn1, "Alice", "Smiles", &club_terms()).unwrap();

    let first = process_monthly_credit(&mut conn1, created.id, "2024-04").unwrap();
    let second = process_monthly_credit(&mut conn2, created.id, "2024-04").unwrap();
    assert!(matches!(first, CreditOutcome::Credited { .. }));
    assert!(matches!(second, CreditOutcome::AlreadyCredited { .. }));

    let (tx_count, chk_count): (i64, i64) = conn2
        .query_row(
            "SELECT (SELECT COUNT(*) FROM transactions WHERE subscription_id = ?1),
                    (SELECT COUNT(*) FROM cpm_checkpoints WHERE period = '2024-04')",
            [created.id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(tx_count, 1);
    assert_eq!(chk_count, 1);
}

#[test]
fn credit_validates_subscription_and_period() {
    let mut conn = setup();
    assert!(matches!(
        process_monthly_credit(&mut conn, 99, "2024-03").unwrap_err(),
        LedgerError::NotFound(_)
    ));

    let created = create_subscription(&conn, "Alice", "Smiles", &club_terms()).unwrap();
    assert!(matches!(
        process_monthly_credit(&mut conn, created.id, "2024/03").unwrap_err(),
        LedgerError::Validation(_)
    ));
    assert!(matches!(
        process_monthly_credit(&mut conn, created.id, "2999-01").unwrap_err(),
        LedgerError::Validation(_)
    ));

    conn.execute(
        "UPDATE subscriptions SET end_date='2024-06-30' WHERE id=?1",
        [created.id],
    )
    .unwrap();
    assert!(matches!(
        process_monthly_credit(&mut conn, created.id, "2024-03").unwrap_err(),
        LedgerError::Conflict(_)
    ));
}

#[test]
fn due_pass_credits_each_active_subscription_once() {
    let mut conn = setup();
    programs::add_program(&conn, "Latam Pass", ProgramKind::Airline).unwrap();
    let a = create_subscription(&conn, "Alice", "Smiles", &club_terms()).unwrap();
    let mut other = club_terms();
    other.cycle_miles = 10_000;
    other.cycle_value = dec("50.00");
    let b = create_subscription(&conn, "Alice", "Latam Pass", &other).unwrap();

    let results = process_due_credits(&mut conn, "2024-05").unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].subscription_id, a.id);
    assert_eq!(results[1].subscription_id, b.id);
    assert!(results
        .iter()
        .all(|r| matches!(r.outcome, CreditOutcome::Credited { .. })));

    let again = process_due_credits(&mut conn, "2024-05").unwrap();
    assert!(again
        .iter()
        .all(|r| matches!(r.outcome, CreditOutcome::AlreadyCredited { .. })));
}

#[test]
fn correction_preserves_history_and_repoints_transactions() {
    let mut conn = setup();
    let first = create_subscription(&conn, "Alice", "Smiles", &club_terms()).unwrap();
    process_monthly_credit(&mut conn, first.id, "2024-02").unwrap();
    transactions::register_intra_club_transaction(
        &conn,
        first.id,
        "Alice",
        "Smiles",
        2_000,
        Decimal::ZERO,
        Decimal::ZERO,
        d(2024, 2, 20),
        None,
    )
    .unwrap();
    let tx_count_before: i64 = conn
        .query_row("SELECT COUNT(*) FROM transactions", [], |r| r.get(0))
        .unwrap();

    let mut corrected = club_terms();
    corrected.cycle_value = dec("120.00");
    let result = correct_last_subscription(&mut conn, "Alice", "Smiles", &corrected).unwrap();
    assert_eq!(result.previous_id, Some(first.id));
    assert_eq!(result.fixed_cpm, dec("1.2"));
    assert_eq!(result.repointed_transactions, 2);

    // old row persists, closed; its locked rate is untouched
    let (active, end_date, old_cpm): (bool, Option<String>, String) = conn
        .query_row(
            "SELECT active, end_date, fixed_cpm FROM subscriptions WHERE id=?1",
            [first.id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .unwrap();
    assert!(!active);
    assert!(end_date.is_some());
    assert_eq!(Decimal::from_str(&old_cpm).unwrap(), dec("1"));

    let new_active: bool = conn
        .query_row(
            "SELECT active FROM subscriptions WHERE id=?1",
            [result.new_id],
            |r| r.get(0),
        )
        .unwrap();
    assert!(new_active);

    let linked_to_old: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM transactions WHERE subscription_id=?1",
            [first.id],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(linked_to_old, 0);
    let linked_to_new: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM transactions WHERE subscription_id=?1",
            [result.new_id],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(linked_to_new, 2);

    let tx_count_after: i64 = conn
        .query_row("SELECT COUNT(*) FROM transactions", [], |r| r.get(0))
        .unwrap();
    assert_eq!(tx_count_after, tx_count_before);
}

#[test]
fn intra_club_requires_matching_active_subscription() {
    let conn = setup();
    let err = transactions::register_intra_club_transaction(
        &conn,
        42,
        "Alice",
        "Smiles",
        1_000,
        Decimal::ZERO,
        Decimal::ZERO,
        d(2024, 2, 20),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)));

    let created = create_subscription(&conn, "Alice", "Smiles", &club_terms()).unwrap();
    conn.execute(
        "UPDATE subscriptions SET end_date='2024-06-30' WHERE id=?1",
        [created.id],
    )
    .unwrap();
    let err = transactions::register_intra_club_transaction(
        &conn,
        created.id,
        "Alice",
        "Smiles",
        1_000,
        Decimal::ZERO,
        Decimal::ZERO,
        d(2024, 2, 20),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, LedgerError::Conflict(_)));
}

#[test]
fn club_entry_links_and_uses_purchase_mode_when_paid() {
    let conn = setup();
    let created = create_subscription(&conn, "Alice", "Smiles", &club_terms()).unwrap();
    let rec = transactions::register_intra_club_transaction(
        &conn,
        created.id,
        "Alice",
        "Smiles",
        4_000,
        dec("50"),
        dec("90"),
        d(2024, 2, 20),
        Some("flash promo"),
    )
    .unwrap();
    assert_eq!(rec.credited_miles, 6_000);
    assert_eq!(rec.cpm_real, dec("15"));

    let (mode, sub_id): (String, i64) = conn
        .query_row(
            "SELECT mode, subscription_id FROM transactions WHERE id=?1",
            [rec.id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(mode, AcquisitionMode::Purchase.as_str());
    assert_eq!(sub_id, created.id);
}
