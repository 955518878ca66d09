// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::error::{LedgerError, LedgerResult};
use crate::models::{cpm, AcquisitionMode, BatchKind};
use crate::utils::{
    find_account, find_program, fmt_amount, maybe_print_json, parse_date, parse_decimal,
    pretty_table, today,
};
use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

pub fn handle(conn: &mut Connection, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("add", sub)) => add(conn, sub)?,
        Some(("transfer", sub)) => transfer(conn, sub)?,
        Some(("club", sub)) => club(conn, sub)?,
        Some(("list", sub)) => list(conn, sub)?,
        _ => {}
    }
    Ok(())
}

/// Everything needed to persist one ledger entry. Derivations (credited
/// miles, cpm_real) are the caller's job; this only writes.
pub(crate) struct NewTransaction<'a> {
    pub account_id: i64,
    pub mode: AcquisitionMode,
    pub source_id: Option<i64>,
    pub dest_id: i64,
    pub ref_program_id: i64,
    pub base_miles: i64,
    pub bonus_percent: Decimal,
    pub credited_miles: i64,
    pub total_cost: Decimal,
    pub cpm_real: String,
    pub tx_date: NaiveDate,
    pub description: String,
    pub note: Option<&'a str>,
    pub subscription_id: Option<i64>,
}

pub(crate) fn insert_transaction(
    conn: &Connection,
    row: &NewTransaction<'_>,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO transactions(account_id, mode, source_id, dest_id, ref_program_id,
             base_miles, bonus_percent, credited_miles, total_cost, cpm_real,
             tx_date, description, note, subscription_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            row.account_id,
            row.mode.as_str(),
            row.source_id,
            row.dest_id,
            row.ref_program_id,
            row.base_miles,
            row.bonus_percent.to_string(),
            row.credited_miles,
            row.total_cost.to_string(),
            row.cpm_real,
            row.tx_date.to_string(),
            row.description,
            row.note,
            row.subscription_id,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn credited_from(base_miles: i64, bonus_percent: Decimal) -> i64 {
    let factor = Decimal::ONE + bonus_percent / Decimal::ONE_HUNDRED;
    (Decimal::from(base_miles) * factor)
        .floor()
        .to_i64()
        .unwrap_or(0)
}

fn check_common(base_miles: i64, bonus_percent: Decimal, tx_date: NaiveDate) -> LedgerResult<()> {
    if base_miles <= 0 {
        return Err(LedgerError::validation("miles must be greater than zero"));
    }
    if bonus_percent < Decimal::ZERO {
        return Err(LedgerError::validation("bonus percent cannot be negative"));
    }
    if tx_date > today() {
        return Err(LedgerError::validation(format!(
            "transaction date {} is in the future",
            tx_date
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordedTransaction {
    pub id: i64,
    pub account: String,
    pub credited_miles: i64,
    pub total_cost: Decimal,
    pub cpm_real: Decimal,
    pub description: String,
}

/// Records a simple purchase or an organic accrual against one program.
pub fn register_transaction(
    conn: &Connection,
    account: &str,
    program: &str,
    mode: AcquisitionMode,
    base_miles: i64,
    bonus_percent: Decimal,
    total_cost: Decimal,
    tx_date: NaiveDate,
    note: Option<&str>,
) -> LedgerResult<RecordedTransaction> {
    check_common(base_miles, bonus_percent, tx_date)?;
    match mode {
        AcquisitionMode::Purchase => {
            if total_cost <= Decimal::ZERO {
                return Err(LedgerError::validation(
                    "a purchase requires a positive total cost",
                ));
            }
        }
        AcquisitionMode::Organic => {
            if total_cost != Decimal::ZERO {
                return Err(LedgerError::validation(
                    "an organic accrual carries no cost",
                ));
            }
        }
        other => {
            return Err(LedgerError::validation(format!(
                "mode '{}' is recorded through its dedicated operation",
                other
            )));
        }
    }

    let (account_id, account_name) = find_account(conn, account)?;
    let program_id = find_program(conn, program)?;

    let credited = credited_from(base_miles, bonus_percent);
    if credited <= 0 {
        return Err(LedgerError::validation("credited miles must be positive"));
    }
    let cpm_real = cpm(total_cost, credited);

    let bonus_tag = if bonus_percent > Decimal::ZERO {
        format!(" + {}% bonus", bonus_percent.normalize())
    } else {
        String::new()
    };
    let description = match mode {
        AcquisitionMode::Organic => format!(
            "Organic accrual: {} miles{} in {}",
            credited,
            bonus_tag,
            program.trim()
        ),
        _ => format!(
            "Simple purchase: {} miles{} in {}",
            base_miles,
            bonus_tag,
            program.trim()
        ),
    };

    let id = insert_transaction(
        conn,
        &NewTransaction {
            account_id,
            mode,
            source_id: match mode {
                AcquisitionMode::Organic => None,
                _ => Some(program_id),
            },
            dest_id: program_id,
            ref_program_id: program_id,
            base_miles,
            bonus_percent,
            credited_miles: credited,
            total_cost,
            cpm_real: cpm_real.to_string(),
            tx_date,
            description: description.clone(),
            note,
            subscription_id: None,
        },
    )?;

    tracing::info!(id, account_id, program_id, mode = %mode, "transaction recorded");
    Ok(RecordedTransaction {
        id,
        account: account_name,
        credited_miles: credited,
        total_cost,
        cpm_real,
        description,
    })
}

/// Records a bonused transfer composed of an organic and a paid lot. The
/// transaction and its batch rows land in one atomic unit.
pub fn register_complex_transfer(
    conn: &mut Connection,
    account: &str,
    source: &str,
    dest: &str,
    base_miles: i64,
    bonus_percent: Decimal,
    organic_qty: i64,
    organic_cpm: Decimal,
    paid_qty: i64,
    paid_cost: Decimal,
    tx_date: NaiveDate,
    note: Option<&str>,
) -> LedgerResult<RecordedTransaction> {
    check_common(base_miles, bonus_percent, tx_date)?;
    if organic_qty < 0 || paid_qty < 0 {
        return Err(LedgerError::validation("lot quantities cannot be negative"));
    }
    if organic_qty + paid_qty != base_miles {
        return Err(LedgerError::validation(format!(
            "lot quantities ({}) must add up to the base miles ({})",
            organic_qty + paid_qty,
            base_miles
        )));
    }
    if paid_cost < Decimal::ZERO || organic_cpm < Decimal::ZERO {
        return Err(LedgerError::validation("lot costs cannot be negative"));
    }

    let tx = conn.transaction()?;
    let (account_id, account_name) = find_account(&tx, account)?;
    let source_id = find_program(&tx, source)?;
    let dest_id = find_program(&tx, dest)?;

    let organic_cost = Decimal::from(organic_qty) / Decimal::ONE_THOUSAND * organic_cpm;
    let total_cost = organic_cost + paid_cost;
    let credited = credited_from(base_miles, bonus_percent);
    if credited <= 0 {
        return Err(LedgerError::validation("credited miles must be positive"));
    }
    let cpm_real = cpm(total_cost, credited);

    let description = format!(
        "Transfer {}->{}: {} paid ({}) + {} organic, {}% bonus",
        source.trim(),
        dest.trim(),
        paid_qty,
        fmt_amount(paid_cost),
        organic_qty,
        bonus_percent.normalize()
    );

    let id = insert_transaction(
        &tx,
        &NewTransaction {
            account_id,
            mode: AcquisitionMode::Transfer,
            source_id: Some(source_id),
            dest_id,
            ref_program_id: dest_id,
            base_miles,
            bonus_percent,
            credited_miles: credited,
            total_cost,
            cpm_real: cpm_real.to_string(),
            tx_date,
            description: description.clone(),
            note,
            subscription_id: None,
        },
    )?;

    if organic_qty > 0 {
        tx.execute(
            "INSERT INTO transaction_batches(transaction_id, kind, miles_qty, lot_cpm, partial_cost, seq)
             VALUES (?1, ?2, ?3, ?4, ?5, 1)",
            params![
                id,
                BatchKind::Organic.as_str(),
                organic_qty,
                organic_cpm.to_string(),
                organic_cost.to_string()
            ],
        )?;
    }
    if paid_qty > 0 {
        let paid_cpm = cpm(paid_cost, paid_qty);
        tx.execute(
            "INSERT INTO transaction_batches(transaction_id, kind, miles_qty, lot_cpm, partial_cost, seq)
             VALUES (?1, ?2, ?3, ?4, ?5, 2)",
            params![
                id,
                BatchKind::Paid.as_str(),
                paid_qty,
                paid_cpm.to_string(),
                paid_cost.to_string()
            ],
        )?;
    }
    tx.commit()?;

    tracing::info!(id, account_id, source_id, dest_id, "transfer recorded");
    Ok(RecordedTransaction {
        id,
        account: account_name,
        credited_miles: credited,
        total_cost,
        cpm_real,
        description,
    })
}

/// Records a one-off entry inside an active club subscription (spot bonus,
/// extra purchase, organic club credit).
pub fn register_intra_club_transaction(
    conn: &Connection,
    subscription_id: i64,
    account: &str,
    program: &str,
    base_miles: i64,
    bonus_percent: Decimal,
    total_cost: Decimal,
    tx_date: NaiveDate,
    note: Option<&str>,
) -> LedgerResult<RecordedTransaction> {
    check_common(base_miles, bonus_percent, tx_date)?;
    if total_cost < Decimal::ZERO {
        return Err(LedgerError::validation("total cost cannot be negative"));
    }

    let (account_id, account_name) = find_account(conn, account)?;
    let program_id = find_program(conn, program)?;

    let sub: Option<(i64, i64, bool)> = conn
        .query_row(
            "SELECT account_id, program_id, active FROM subscriptions WHERE id = ?1",
            params![subscription_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let (sub_account, sub_program, active) =
        sub.ok_or_else(|| LedgerError::not_found(format!("subscription #{}", subscription_id)))?;
    if sub_account != account_id || sub_program != program_id {
        return Err(LedgerError::validation(format!(
            "subscription #{} does not belong to this account/program pair",
            subscription_id
        )));
    }
    if !active {
        return Err(LedgerError::conflict(format!(
            "subscription #{} is no longer active",
            subscription_id
        )));
    }

    let credited = credited_from(base_miles, bonus_percent);
    if credited <= 0 {
        return Err(LedgerError::validation("credited miles must be positive"));
    }
    let mode = if total_cost == Decimal::ZERO {
        AcquisitionMode::Organic
    } else {
        AcquisitionMode::Purchase
    };
    let cpm_real = cpm(total_cost, credited);
    let description = match mode {
        AcquisitionMode::Organic => format!(
            "Club bonus: {} miles in {} (subscription #{})",
            credited,
            program.trim(),
            subscription_id
        ),
        _ => format!(
            "Club purchase: {} miles in {} (subscription #{})",
            base_miles,
            program.trim(),
            subscription_id
        ),
    };

    let id = insert_transaction(
        conn,
        &NewTransaction {
            account_id,
            mode,
            source_id: match mode {
                AcquisitionMode::Organic => None,
                _ => Some(program_id),
            },
            dest_id: program_id,
            ref_program_id: program_id,
            base_miles,
            bonus_percent,
            credited_miles: credited,
            total_cost,
            cpm_real: cpm_real.to_string(),
            tx_date,
            description: description.clone(),
            note,
            subscription_id: Some(subscription_id),
        },
    )?;

    tracing::info!(id, subscription_id, "intra-club transaction recorded");
    Ok(RecordedTransaction {
        id,
        account: account_name,
        credited_miles: credited,
        total_cost,
        cpm_real,
        description,
    })
}

fn add(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let account = sub.get_one::<String>("account").unwrap();
    let program = sub.get_one::<String>("program").unwrap();
    let miles: i64 = sub.get_one::<String>("miles").unwrap().trim().parse()?;
    let cost = parse_decimal(sub.get_one::<String>("cost").unwrap())?;
    let bonus = match sub.get_one::<String>("bonus") {
        Some(raw) => parse_decimal(raw)?,
        None => Decimal::ZERO,
    };
    let date = match sub.get_one::<String>("date") {
        Some(raw) => parse_date(raw)?,
        None => today(),
    };
    let note = sub.get_one::<String>("note").map(|s| s.as_str());
    let mode = if cost == Decimal::ZERO {
        AcquisitionMode::Organic
    } else {
        AcquisitionMode::Purchase
    };

    let rec = register_transaction(conn, account, program, mode, miles, bonus, cost, date, note)?;
    println!(
        "Recorded for {}: {} miles credited, cost {}, CPM {}",
        rec.account,
        rec.credited_miles,
        fmt_amount(rec.total_cost),
        fmt_amount(rec.cpm_real)
    );
    Ok(())
}

fn transfer(conn: &mut Connection, sub: &clap::ArgMatches) -> Result<()> {
    let account = sub.get_one::<String>("account").unwrap();
    let source = sub.get_one::<String>("from").unwrap();
    let dest = sub.get_one::<String>("to").unwrap();
    let miles: i64 = sub.get_one::<String>("miles").unwrap().trim().parse()?;
    let bonus = parse_decimal(sub.get_one::<String>("bonus").unwrap())?;
    let organic_qty: i64 = sub
        .get_one::<String>("organic-qty")
        .unwrap()
        .trim()
        .parse()?;
    let organic_cpm = parse_decimal(sub.get_one::<String>("organic-cpm").unwrap())?;
    let paid_qty: i64 = sub.get_one::<String>("paid-qty").unwrap().trim().parse()?;
    let paid_cost = parse_decimal(sub.get_one::<String>("paid-cost").unwrap())?;
    let date = match sub.get_one::<String>("date") {
        Some(raw) => parse_date(raw)?,
        None => today(),
    };
    let note = sub.get_one::<String>("note").map(|s| s.as_str());

    let rec = register_complex_transfer(
        conn, account, source, dest, miles, bonus, organic_qty, organic_cpm, paid_qty, paid_cost,
        date, note,
    )?;
    println!(
        "Transfer recorded for {}: {} miles credited, total cost {}, CPM {}",
        rec.account,
        rec.credited_miles,
        fmt_amount(rec.total_cost),
        fmt_amount(rec.cpm_real)
    );
    Ok(())
}

fn club(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let subscription_id: i64 = sub
        .get_one::<String>("subscription")
        .unwrap()
        .trim()
        .parse()?;
    let account = sub.get_one::<String>("account").unwrap();
    let program = sub.get_one::<String>("program").unwrap();
    let miles: i64 = sub.get_one::<String>("miles").unwrap().trim().parse()?;
    let cost = parse_decimal(sub.get_one::<String>("cost").unwrap())?;
    let bonus = match sub.get_one::<String>("bonus") {
        Some(raw) => parse_decimal(raw)?,
        None => Decimal::ZERO,
    };
    let date = match sub.get_one::<String>("date") {
        Some(raw) => parse_date(raw)?,
        None => today(),
    };
    let note = sub.get_one::<String>("note").map(|s| s.as_str());

    let rec = register_intra_club_transaction(
        conn,
        subscription_id,
        account,
        program,
        miles,
        bonus,
        cost,
        date,
        note,
    )?;
    println!(
        "Intra-club entry recorded for {}: {} miles, cost {}, CPM {}",
        rec.account,
        rec.credited_miles,
        fmt_amount(rec.total_cost),
        fmt_amount(rec.cpm_real)
    );
    Ok(())
}

#[derive(Serialize)]
pub struct TransactionRow {
    pub id: i64,
    pub tx_date: String,
    pub account: String,
    pub program: String,
    pub mode: String,
    pub base_miles: i64,
    pub credited_miles: i64,
    pub total_cost: String,
    pub cpm_real: String,
    pub description: String,
}

pub fn query_rows(conn: &Connection, sub: &clap::ArgMatches) -> Result<Vec<TransactionRow>> {
    let mut sql = String::from(
        "SELECT t.id, t.tx_date, a.name, p.name, t.mode, t.base_miles, t.credited_miles,
                t.total_cost, t.cpm_real, t.description
         FROM transactions t
         JOIN accounts a ON t.account_id = a.id
         JOIN programs p ON t.ref_program_id = p.id
         WHERE 1=1",
    );
    let mut params_vec: Vec<String> = Vec::new();

    if let Some(acct) = sub.get_one::<String>("account") {
        sql.push_str(" AND a.name = ?");
        params_vec.push(acct.into());
    }
    if let Some(prog) = sub.get_one::<String>("program") {
        sql.push_str(" AND p.name = ?");
        params_vec.push(prog.into());
    }
    sql.push_str(" ORDER BY t.tx_date DESC, t.registered_at DESC, t.id DESC");
    if let Some(limit) = sub.get_one::<usize>("limit") {
        sql.push_str(" LIMIT ?");
        params_vec.push(limit.to_string());
    }

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = if params_vec.is_empty() {
        stmt.query([])?
    } else {
        let params: Vec<&dyn rusqlite::ToSql> = params_vec
            .iter()
            .map(|s| s as &dyn rusqlite::ToSql)
            .collect();
        stmt.query(rusqlite::params_from_iter(params))?
    };

    let mut data = Vec::new();
    while let Some(r) = rows.next()? {
        data.push(TransactionRow {
            id: r.get(0)?,
            tx_date: r.get(1)?,
            account: r.get(2)?,
            program: r.get(3)?,
            mode: r.get(4)?,
            base_miles: r.get(5)?,
            credited_miles: r.get(6)?,
            total_cost: r.get(7)?,
            cpm_real: r.get(8)?,
            description: r.get(9)?,
        });
    }
    Ok(data)
}

fn list(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let json_flag = sub.get_flag("json");
    let jsonl_flag = sub.get_flag("jsonl");
    let data = query_rows(conn, sub)?;
    if !maybe_print_json(json_flag, jsonl_flag, &data)? {
        let rows: Vec<Vec<String>> = data
            .iter()
            .map(|r| {
                vec![
                    r.id.to_string(),
                    r.tx_date.clone(),
                    r.account.clone(),
                    r.program.clone(),
                    r.mode.clone(),
                    r.base_miles.to_string(),
                    r.credited_miles.to_string(),
                    r.total_cost.clone(),
                    r.cpm_real.clone(),
                    r.description.clone(),
                ]
            })
            .collect();
        println!(
            "{}",
            pretty_table(
                &[
                    "Id", "Date", "Account", "Program", "Mode", "Base", "Credited", "Cost", "CPM",
                    "Description",
                ],
                rows,
            )
        );
    }
    Ok(())
}
