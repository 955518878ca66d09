// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use chrono::NaiveDate;
use milebook::commands::{accounts, programs, transactions};
use milebook::error::LedgerError;
use milebook::models::{AcquisitionMode, Management, ProgramKind};
use milebook::{cli, db};
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

#[test]
fn simple_purchase_computes_bonus_and_cpm() {
    let conn = setup();
    let rec = transactions::register_transaction(
        &conn,
        "Alice",
        "Smiles",
        AcquisitionMode::Purchase,
        10_000,
        dec("25"),
        dec("212.50"),
        d(2024, 1, 15),
        None,
    )
    .unwrap();
    assert_eq!(rec.credited_miles, 12_500);
    assert_eq!(rec.cpm_real, dec("17"));

    let (base, credited, cpm_s): (i64, i64, String) = conn
        .query_row(
            "SELECT base_miles, credited_miles, cpm_real FROM transactions WHERE id=?1",
            [rec.id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .unwrap();
    assert_eq!(base, 10_000);
    assert_eq!(credited, 12_500);
    assert_eq!(Decimal::from_str(&cpm_s).unwrap(), dec("17"));
}

#[test]
fn organic_entry_has_no_cost_and_no_source() {
    let conn = setup();
    let rec = transactions::register_transaction(
        &conn,
        "Alice",
        "Smiles",
        AcquisitionMode::Organic,
        5_000,
        Decimal::ZERO,
        Decimal::ZERO,
        d(2024, 2, 1),
        None,
    )
    .unwrap();
    assert_eq!(rec.cpm_real, Decimal::ZERO);
    let source: Option<i64> = conn
        .query_row(
            "SELECT source_id FROM transactions WHERE id=?1",
            [rec.id],
            |r| r.get(0),
        )
        .unwrap();
    assert!(source.is_none());
}

#[test]
fn organic_with_cost_is_rejected() {
    let conn = setup();
    let err = transactions::register_transaction(
        &conn,
        "Alice",
        "Smiles",
        AcquisitionMode::Organic,
        5_000,
        Decimal::ZERO,
        dec("10"),
        d(2024, 2, 1),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
}

#[test]
fn future_date_and_nonpositive_miles_are_rejected() {
    let conn = setup();
    let err = transactions::register_transaction(
        &conn,
        "Alice",
        "Smiles",
        AcquisitionMode::Purchase,
        1_000,
        Decimal::ZERO,
        dec("10"),
        d(2999, 1, 1),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    let err = transactions::register_transaction(
        &conn,
        "Alice",
        "Smiles",
        AcquisitionMode::Purchase,
        0,
        Decimal::ZERO,
        dec("10"),
        d(2024, 1, 1),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
}

#[test]
fn unknown_account_and_program_not_found() {
    let conn = setup();
    let err = transactions::register_transaction(
        &conn,
        "Nobody",
        "Smiles",
        AcquisitionMode::Purchase,
        1_000,
        Decimal::ZERO,
        dec("10"),
        d(2024, 1, 1),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)));

    let err = transactions::register_transaction(
        &conn,
        "Alice",
        "NoSuchProgram",
        AcquisitionMode::Purchase,
        1_000,
        Decimal::ZERO,
        dec("10"),
        d(2024, 1, 1),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)));
}

#[test]
fn complex_transfer_writes_batches_that_sum_to_base() {
    let mut conn = setup();
    let rec = transactions::register_complex_transfer(
        &mut conn,
        "Alice",
        "Livelo",
        "Smiles",
        50_000,
        dec("80"),
        30_000,
        dec("16"),
        20_000,
        dec("560"),
        d(2024, 3, 10),
        Some("promo transfer"),
    )
    .unwrap();

    // organic 30000 @ 16/k = 480, paid 560 => 1040 over 90000 credited
    assert_eq!(rec.credited_miles, 90_000);
    assert_eq!(rec.total_cost, dec("1040"));
    assert_eq!(rec.cpm_real.round_dp(4), dec("11.5556"));

    let (count, sum): (i64, i64) = conn
        .query_row(
            "SELECT COUNT(*), SUM(miles_qty) FROM transaction_batches WHERE transaction_id=?1",
            [rec.id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(count, 2);
    assert_eq!(sum, 50_000);

    let paid_cpm: String = conn
        .query_row(
            "SELECT lot_cpm FROM transaction_batches WHERE transaction_id=?1 AND kind='paid'",
            [rec.id],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(Decimal::from_str(&paid_cpm).unwrap(), dec("28"));
}

#[test]
fn transfer_lot_mismatch_writes_nothing() {
    let mut conn = setup();
    let err = transactions::register_complex_transfer(
        &mut conn,
        "Alice",
        "Livelo",
        "Smiles",
        50_000,
        dec("80"),
        30_000,
        dec("16"),
        10_000,
        dec("560"),
        d(2024, 3, 10),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM transactions", [], |r| r.get(0))
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn list_limit_respected() {
    let conn = setup();
    for day in 1..=3 {
        transactions::register_transaction(
            &conn,
            "Alice",
            "Smiles",
            AcquisitionMode::Purchase,
            1_000,
            Decimal::ZERO,
            dec("20"),
            d(2024, 1, day),
            None,
        )
        .unwrap();
    }
    let cli = cli::build_cli();
    let matches = cli.get_matches_from(["milebook", "tx", "list", "--limit", "2"]);
    if let Some(("tx", tx_m)) = matches.subcommand() {
        if let Some(("list", list_m)) = tx_m.subcommand() {
            let rows = transactions::query_rows(&conn, list_m).unwrap();
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[0].tx_date, "2024-01-03");
        } else {
            panic!("no list subcommand");
        }
    } else {
        panic!("no tx subcommand");
    }
}
