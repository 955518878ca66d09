// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use chrono::NaiveDate;
use milebook::commands::checkpoints::create_checkpoint;
use milebook::commands::undo::{confirm_delete_transaction, preview_delete_last_transaction};
use milebook::commands::{accounts, programs, transactions};
use milebook::db;
use milebook::error::LedgerError;
use milebook::models::{AcquisitionMode, CheckpointKind, Management, ProgramKind};
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::str::FromStr;

fn setup() -> Connection {
    let mut conn = Connection::open_in_memory().unwrap();
    db::init_schema(&mut conn).unwrap();
    accounts::register_account(&conn, "Alice", "52998224725", Management::Own).unwrap();
    programs::add_program(&conn, "Smiles", ProgramKind::Airline).unwrap();
    programs::add_program(&conn, "Livelo", ProgramKind::Bank).unwrap();
    conn
}

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn add_purchase(conn: &Connection, miles: i64, cost: &str, date: NaiveDate) -> i64 {
    transactions::register_transaction(
        conn,
        "Alice",
        "Smiles",
        AcquisitionMode::Purchase,
        miles,
        Decimal::ZERO,
        dec(cost),
        date,
        None,
    )
    .unwrap()
    .id
}

#[test]
fn preview_selects_the_most_recent_entry() {
    let conn = setup();
    add_purchase(&conn, 1_000, "20", d(2024, 1, 1));
    let latest = add_purchase(&conn, 2_000, "50", d(2024, 1, 5));

    let handle = preview_delete_last_transaction(&conn, "Alice", "Smiles").unwrap();
    assert_eq!(handle.transaction_id, latest);
    assert_eq!(handle.snapshot.base_miles, 2_000);
    assert!(!handle.snapshot.covered_by_checkpoint);

    // read-only: nothing changed
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM transactions", [], |r| r.get(0))
        .unwrap();
    assert_eq!(count, 2);
}

#[test]
fn preview_without_history_is_not_found() {
    let conn = setup();
    let err = preview_delete_last_transaction(&conn, "Alice", "Smiles").unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)));
}

#[test]
fn confirm_deletes_transaction_and_cascades_batches() {
    let mut conn = setup();
    add_purchase(&conn, 1_000, "20", d(2024, 1, 1));
    let rec = transactions::register_complex_transfer(
        &mut conn,
        "Alice",
        "Livelo",
        "Smiles",
        10_000,
        dec("100"),
        4_000,
        dec("16"),
        6_000,
        dec("168"),
        d(2024, 1, 10),
        None,
    )
    .unwrap();

    let handle = preview_delete_last_transaction(&conn, "Alice", "Smiles").unwrap();
    assert_eq!(handle.transaction_id, rec.id);
    let result = confirm_delete_transaction(&mut conn, &handle).unwrap();
    assert_eq!(result.transaction_id, rec.id);

    let (tx_count, batch_count): (i64, i64) = conn
        .query_row(
            "SELECT (SELECT COUNT(*) FROM transactions),
                    (SELECT COUNT(*) FROM transaction_batches)",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(tx_count, 1);
    assert_eq!(batch_count, 0);
}

#[test]
fn stale_handle_leaves_everything_intact() {
    let mut conn = setup();
    add_purchase(&conn, 1_000, "20", d(2024, 1, 1));
    let handle = preview_delete_last_transaction(&conn, "Alice", "Smiles").unwrap();

    // something newer arrives between preview and confirm
    add_purchase(&conn, 3_000, "90", d(2024, 1, 20));

    let err = confirm_delete_transaction(&mut conn, &handle).unwrap_err();
    assert!(matches!(err, LedgerError::StaleHandle(_)));

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM transactions", [], |r| r.get(0))
        .unwrap();
    assert_eq!(count, 2);
}

#[test]
fn confirm_removes_checkpoints_that_covered_the_row() {
    let mut conn = setup();
    add_purchase(&conn, 1_000, "20", d(2024, 1, 1));
    create_checkpoint(
        &mut conn,
        "Alice",
        "Smiles",
        CheckpointKind::Manual,
        None,
        None,
    )
    .unwrap();

    let handle = preview_delete_last_transaction(&conn, "Alice", "Smiles").unwrap();
    assert!(handle.snapshot.covered_by_checkpoint);

    let result = confirm_delete_transaction(&mut conn, &handle).unwrap();
    assert_eq!(result.removed_checkpoints.len(), 1);

    let (tx_count, chk_count): (i64, i64) = conn
        .query_row(
            "SELECT (SELECT COUNT(*) FROM transactions),
                    (SELECT COUNT(*) FROM cpm_checkpoints)",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(tx_count, 0);
    assert_eq!(chk_count, 0);
}

#[test]
fn checkpoints_before_the_row_survive_the_undo() {
    let mut conn = setup();
    add_purchase(&conn, 1_000, "20", d(2024, 1, 1));
    create_checkpoint(
        &mut conn,
        "Alice",
        "Smiles",
        CheckpointKind::Manual,
        None,
        None,
    )
    .unwrap();
    add_purchase(&conn, 2_000, "30", d(2024, 1, 15));

    let handle = preview_delete_last_transaction(&conn, "Alice", "Smiles").unwrap();
    assert!(!handle.snapshot.covered_by_checkpoint);
    let result = confirm_delete_transaction(&mut conn, &handle).unwrap();
    assert!(result.removed_checkpoints.is_empty());

    let chk_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM cpm_checkpoints", [], |r| r.get(0))
        .unwrap();
    assert_eq!(chk_count, 1);
}
