// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::commands::checkpoints::cpm_totals;
use crate::error::{LedgerError, LedgerResult};
use crate::models::cpm;
use crate::utils::{find_account, fmt_amount, maybe_print_json, pretty_table, stored_decimal, today};
use anyhow::Result;
use chrono::Datelike;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::Serialize;

pub fn handle(conn: &Connection, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("balance", sub)) => balance(conn, sub)?,
        Some(("overview", sub)) => overview(conn, sub)?,
        _ => {}
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceRow {
    pub program: String,
    pub miles: i64,
    pub total_cost: Decimal,
    pub avg_cpm: Decimal,
}

/// Per-program position for one account: miles, cumulative cost and the
/// weighted-average CPM. Programs with no positive balance are omitted.
pub fn get_account_balance(conn: &Connection, account: &str) -> LedgerResult<Vec<BalanceRow>> {
    let (account_id, _) = find_account(conn, account)?;

    let mut stmt = conn.prepare(
        "SELECT p.name, t.credited_miles, t.total_cost
         FROM transactions t
         JOIN programs p ON t.ref_program_id = p.id
         WHERE t.account_id = ?1
         ORDER BY p.name, t.id",
    )?;
    let mut rows = stmt.query(params![account_id])?;

    let mut out: Vec<BalanceRow> = Vec::new();
    while let Some(r) = rows.next()? {
        let program: String = r.get(0)?;
        let miles: i64 = r.get(1)?;
        let cost_s: String = r.get(2)?;
        let cost = stored_decimal(&cost_s, "transaction.total_cost")?;
        match out.last_mut() {
            Some(row) if row.program == program => {
                row.miles += miles;
                row.total_cost += cost;
            }
            _ => out.push(BalanceRow {
                program,
                miles,
                total_cost: cost,
                avg_cpm: Decimal::ZERO,
            }),
        }
    }
    out.retain(|r| r.miles > 0);
    for row in &mut out {
        row.avg_cpm = cpm(row.total_cost, row.miles);
    }
    Ok(out)
}

fn balance(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let account = sub.get_one::<String>("account").unwrap();
    let (_, account_name) = find_account(conn, account)?;
    let rows = get_account_balance(conn, account)?;
    if rows.is_empty() {
        println!("No balance found for {}", account_name);
        return Ok(());
    }
    if maybe_print_json(sub.get_flag("json"), false, &rows)? {
        return Ok(());
    }
    let mut total = 0i64;
    let table_rows: Vec<Vec<String>> = rows
        .iter()
        .map(|r| {
            total += r.miles;
            vec![
                r.program.clone(),
                r.miles.to_string(),
                fmt_amount(r.total_cost),
                fmt_amount(r.avg_cpm),
            ]
        })
        .collect();
    println!("Statement for {}:", account_name);
    println!(
        "{}",
        pretty_table(&["Program", "Miles", "Cost", "Avg CPM"], table_rows)
    );
    println!("Total: {} miles", total);
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct OverviewRow {
    pub program: String,
    pub miles: i64,
    pub avg_cpm: Decimal,
    pub latest_close: Option<String>,
    pub unconsolidated: i64,
    pub status: &'static str,
}

/// Checkpoint-health panorama across every program the account touched.
pub fn account_overview(conn: &Connection, account: &str) -> LedgerResult<Vec<OverviewRow>> {
    let (account_id, _) = find_account(conn, account)?;
    let now = today();
    let previous_month = if now.month() > 1 {
        format!("{}-{:02}", now.year(), now.month() - 1)
    } else {
        format!("{}-12", now.year() - 1)
    };

    let programs: Vec<(i64, String)> = {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT t.ref_program_id, p.name
             FROM transactions t
             JOIN programs p ON p.id = t.ref_program_id
             WHERE t.account_id = ?1
             ORDER BY p.name",
        )?;
        let rows = stmt.query_map(params![account_id], |r| Ok((r.get(0)?, r.get(1)?)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };

    let mut out = Vec::new();
    for (program_id, program) in programs {
        let totals = cpm_totals(conn, account_id, program_id)?;
        if totals.total_miles <= 0 {
            continue;
        }
        let closed_previous: Option<i64> = conn
            .query_row(
                "SELECT id FROM cpm_checkpoints
                 WHERE account_id = ?1 AND program_id = ?2 AND period = ?3 AND kind = 'monthly'",
                params![account_id, program_id, previous_month],
                |r| r.get(0),
            )
            .optional()?;

        let status = if totals.checkpoint.is_none() {
            "no checkpoint"
        } else if closed_previous.is_none() || totals.delta_count > 10 {
            "attention"
        } else {
            "ok"
        };
        let latest_close = totals.checkpoint.as_ref().map(|c| {
            c.period
                .clone()
                .unwrap_or_else(|| format!("{} ({})", c.checkpoint_date, c.kind))
        });
        out.push(OverviewRow {
            program,
            miles: totals.total_miles,
            avg_cpm: totals.current_cpm(),
            latest_close,
            unconsolidated: totals.delta_count,
            status,
        });
    }
    Ok(out)
}

fn overview(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let account = sub.get_one::<String>("account").unwrap();
    let (_, account_name) = find_account(conn, account)?;
    let rows = account_overview(conn, account)?;
    if rows.is_empty() {
        return Err(LedgerError::not_found(format!("transactions for {}", account_name)).into());
    }
    if maybe_print_json(sub.get_flag("json"), false, &rows)? {
        return Ok(());
    }
    let mut total = 0i64;
    let mut attention: Vec<String> = Vec::new();
    let table_rows: Vec<Vec<String>> = rows
        .iter()
        .map(|r| {
            total += r.miles;
            if r.status != "ok" {
                attention.push(r.program.clone());
            }
            vec![
                r.program.clone(),
                r.miles.to_string(),
                fmt_amount(r.avg_cpm),
                r.latest_close.clone().unwrap_or_else(|| "-".into()),
                r.unconsolidated.to_string(),
                r.status.to_string(),
            ]
        })
        .collect();
    println!("Panorama - {}", account_name);
    println!(
        "{}",
        pretty_table(
            &["Program", "Miles", "CPM", "Last close", "Pending", "Status"],
            table_rows,
        )
    );
    println!("Total: {} miles across {} program(s)", total, rows.len());
    if !attention.is_empty() {
        println!("Needs attention: {}", attention.join(", "));
    }
    Ok(())
}
