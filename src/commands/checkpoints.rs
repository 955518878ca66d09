// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::error::{LedgerError, LedgerResult};
use crate::models::{cpm, CheckpointKind};
use crate::utils::{
    find_account, find_program, fmt_amount, maybe_print_json, parse_period, pretty_table,
    program_name, reject_future_period, stored_date, stored_decimal, today,
};
use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use rust_decimal::Decimal;
use serde::Serialize;

pub fn handle(conn: &mut Connection, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("create", sub)) => create(conn, sub)?,
        Some(("list", sub)) => list(conn, sub)?,
        _ => {}
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckpointInfo {
    pub id: i64,
    pub kind: CheckpointKind,
    pub period: Option<String>,
    pub checkpoint_date: NaiveDate,
    pub total_miles: i64,
    pub total_cost: Decimal,
    pub cpm_snapshot: Decimal,
    pub covered_through_tx_id: Option<i64>,
}

/// Cumulative position for one (account, program): the latest snapshot plus
/// the delta of transactions registered after its covered bound. Without a
/// snapshot the whole history is scanned.
#[derive(Debug, Clone, Serialize)]
pub struct CpmTotals {
    pub total_miles: i64,
    pub total_cost: Decimal,
    pub checkpoint: Option<CheckpointInfo>,
    pub delta_count: i64,
    pub delta_miles: i64,
    pub delta_cost: Decimal,
    pub delta_from: Option<NaiveDate>,
    pub delta_to: Option<NaiveDate>,
    pub max_tx_id: Option<i64>,
}

impl CpmTotals {
    pub fn current_cpm(&self) -> Decimal {
        cpm(self.total_cost, self.total_miles)
    }
}

fn latest_checkpoint(
    conn: &Connection,
    account_id: i64,
    program_id: i64,
) -> LedgerResult<Option<CheckpointInfo>> {
    let row: Option<(i64, String, Option<String>, String, i64, String, String, Option<i64>)> = conn
        .query_row(
            "SELECT id, kind, period, checkpoint_date, total_miles, total_cost, cpm_snapshot,
                    covered_through_tx_id
             FROM cpm_checkpoints
             WHERE account_id = ?1 AND program_id = ?2
             ORDER BY id DESC LIMIT 1",
            params![account_id, program_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                    r.get(7)?,
                ))
            },
        )
        .optional()?;
    let Some((id, kind_s, period, date_s, miles, cost_s, cpm_s, bound)) = row else {
        return Ok(None);
    };
    let kind = CheckpointKind::parse(&kind_s)
        .ok_or_else(|| LedgerError::invariant("checkpoint.kind", format!("'{}'", kind_s)))?;
    Ok(Some(CheckpointInfo {
        id,
        kind,
        period,
        checkpoint_date: stored_date(&date_s, "checkpoint.checkpoint_date")?,
        total_miles: miles,
        total_cost: stored_decimal(&cost_s, "checkpoint.total_cost")?,
        cpm_snapshot: stored_decimal(&cpm_s, "checkpoint.cpm_snapshot")?,
        covered_through_tx_id: bound,
    }))
}

pub fn cpm_totals(
    conn: &Connection,
    account_id: i64,
    program_id: i64,
) -> LedgerResult<CpmTotals> {
    let checkpoint = latest_checkpoint(conn, account_id, program_id)?;
    let bound = checkpoint
        .as_ref()
        .and_then(|c| c.covered_through_tx_id)
        .unwrap_or(0);

    let mut stmt = conn.prepare(
        "SELECT id, credited_miles, total_cost, tx_date
         FROM transactions
         WHERE account_id = ?1 AND ref_program_id = ?2 AND id > ?3
         ORDER BY id",
    )?;
    let mut rows = stmt.query(params![account_id, program_id, bound])?;

    let mut delta_count = 0i64;
    let mut delta_miles = 0i64;
    let mut delta_cost = Decimal::ZERO;
    let mut delta_from: Option<NaiveDate> = None;
    let mut delta_to: Option<NaiveDate> = None;
    let mut max_tx_id: Option<i64> = checkpoint.as_ref().and_then(|c| c.covered_through_tx_id);

    while let Some(r) = rows.next()? {
        let id: i64 = r.get(0)?;
        let miles: i64 = r.get(1)?;
        let cost_s: String = r.get(2)?;
        let date_s: String = r.get(3)?;
        let date = stored_date(&date_s, "transaction.tx_date")?;
        delta_count += 1;
        delta_miles += miles;
        delta_cost += stored_decimal(&cost_s, "transaction.total_cost")?;
        delta_from = Some(delta_from.map_or(date, |d: NaiveDate| d.min(date)));
        delta_to = Some(delta_to.map_or(date, |d: NaiveDate| d.max(date)));
        max_tx_id = Some(max_tx_id.map_or(id, |m| m.max(id)));
    }

    let base_miles = checkpoint.as_ref().map_or(0, |c| c.total_miles);
    let base_cost = checkpoint
        .as_ref()
        .map_or(Decimal::ZERO, |c| c.total_cost);

    Ok(CpmTotals {
        total_miles: base_miles + delta_miles,
        total_cost: base_cost + delta_cost,
        checkpoint,
        delta_count,
        delta_miles,
        delta_cost,
        delta_from,
        delta_to,
        max_tx_id,
    })
}

fn snapshot_description(kind: CheckpointKind, program: &str, period: Option<&str>) -> String {
    match kind {
        CheckpointKind::Monthly => {
            format!("Monthly close {} - {}", period.unwrap_or("?"), program)
        }
        CheckpointKind::Manual => format!("CPM confirmation - {}", program),
        CheckpointKind::Automatic => format!("Post-adjustment snapshot - {}", program),
    }
}

/// Persists one snapshot row. No commit here; the caller owns the atomic
/// unit and translates unique-index losses into its own domain outcome.
pub(crate) fn insert_snapshot(
    conn: &Connection,
    account_id: i64,
    program_id: i64,
    kind: CheckpointKind,
    period: Option<&str>,
    totals: &CpmTotals,
    note: Option<&str>,
) -> rusqlite::Result<i64> {
    let snapshot = cpm(totals.total_cost, totals.total_miles);
    let program = program_name(conn, program_id).unwrap_or_else(|_| format!("#{}", program_id));
    let description = snapshot_description(kind, &program, period);
    conn.execute(
        "INSERT INTO cpm_checkpoints(account_id, program_id, checkpoint_date, total_miles,
             total_cost, cpm_snapshot, kind, period, covered_from, covered_to,
             covered_through_tx_id, description, note)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            account_id,
            program_id,
            today().to_string(),
            totals.total_miles,
            totals.total_cost.to_string(),
            snapshot.to_string(),
            kind.as_str(),
            period,
            totals.delta_from.map(|d| d.to_string()),
            totals.delta_to.map(|d| d.to_string()),
            totals.max_tx_id,
            description,
            note,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckpointCreated {
    pub id: i64,
    pub account: String,
    pub program: String,
    pub kind: CheckpointKind,
    pub period: Option<String>,
    pub total_miles: i64,
    pub total_cost: Decimal,
    pub cpm_snapshot: Decimal,
    pub covered_from: Option<NaiveDate>,
    pub covered_to: Option<NaiveDate>,
}

/// Confirms the current position as a snapshot. Later reconciliation starts
/// here instead of re-reading the full history.
pub fn create_checkpoint(
    conn: &mut Connection,
    account: &str,
    program: &str,
    kind: CheckpointKind,
    period: Option<&str>,
    note: Option<&str>,
) -> LedgerResult<CheckpointCreated> {
    let period = match (kind, period) {
        (CheckpointKind::Monthly, Some(p)) => {
            let p = parse_period(p)?;
            reject_future_period(&p)?;
            Some(p)
        }
        (CheckpointKind::Monthly, None) => {
            return Err(LedgerError::validation(
                "a monthly close requires a reference period (YYYY-MM)",
            ));
        }
        (_, _) => None,
    };

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let (account_id, account_name) = find_account(&tx, account)?;
    let program_id = find_program(&tx, program)?;
    let program_label = program_name(&tx, program_id)?;

    if let Some(p) = period.as_deref() {
        let exists: Option<i64> = tx
            .query_row(
                "SELECT id FROM cpm_checkpoints
                 WHERE account_id = ?1 AND program_id = ?2 AND period = ?3 AND kind = 'monthly'",
                params![account_id, program_id, p],
                |r| r.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(LedgerError::conflict(format!(
                "period {} is already closed for {} / {}",
                p, program_label, account_name
            )));
        }
    }

    let totals = cpm_totals(&tx, account_id, program_id)?;
    if totals.total_miles <= 0 {
        return Err(LedgerError::validation(format!(
            "no transactions recorded for {} / {}",
            program_label, account_name
        )));
    }

    let id = insert_snapshot(
        &tx,
        account_id,
        program_id,
        kind,
        period.as_deref(),
        &totals,
        note,
    )
    .map_err(|e| {
        LedgerError::on_unique(
            e,
            &format!(
                "period {} is already closed for {} / {}",
                period.as_deref().unwrap_or("?"),
                program_label,
                account_name
            ),
        )
    })?;
    tx.commit()?;

    tracing::info!(id, account_id, program_id, kind = %kind, "checkpoint created");
    Ok(CheckpointCreated {
        id,
        account: account_name,
        program: program_label,
        kind,
        period,
        total_miles: totals.total_miles,
        total_cost: totals.total_cost,
        cpm_snapshot: cpm(totals.total_cost, totals.total_miles),
        covered_from: totals.delta_from,
        covered_to: totals.delta_to,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct CpmStatus {
    pub account: String,
    pub program: String,
    pub total_miles: i64,
    pub total_cost: Decimal,
    pub current_cpm: Decimal,
    pub checkpoint: Option<CheckpointInfo>,
    pub unconsolidated: i64,
}

/// The sole balance read path: latest snapshot plus whatever was registered
/// after it. Never mutates.
pub fn get_current_cpm(conn: &Connection, account: &str, program: &str) -> LedgerResult<CpmStatus> {
    let (account_id, account_name) = find_account(conn, account)?;
    let program_id = find_program(conn, program)?;
    let program_label = program_name(conn, program_id)?;
    let totals = cpm_totals(conn, account_id, program_id)?;
    if totals.total_miles <= 0 && totals.delta_count == 0 && totals.checkpoint.is_none() {
        return Err(LedgerError::not_found(format!(
            "ledger activity for {} / {}",
            program_label, account_name
        )));
    }
    Ok(CpmStatus {
        account: account_name,
        program: program_label,
        total_miles: totals.total_miles,
        total_cost: totals.total_cost,
        current_cpm: totals.current_cpm(),
        checkpoint: totals.checkpoint.clone(),
        unconsolidated: totals.delta_count,
    })
}

fn create(conn: &mut Connection, sub: &clap::ArgMatches) -> Result<()> {
    let account = sub.get_one::<String>("account").unwrap();
    let program = sub.get_one::<String>("program").unwrap();
    let kind_raw = sub.get_one::<String>("kind").unwrap();
    let kind = CheckpointKind::parse(kind_raw)
        .ok_or_else(|| anyhow::anyhow!("Unknown checkpoint kind '{}'", kind_raw))?;
    let period = sub.get_one::<String>("period").map(|s| s.as_str());
    let note = sub.get_one::<String>("note").map(|s| s.as_str());

    let created = create_checkpoint(conn, account, program, kind, period, note)?;
    let tag = match created.period.as_deref() {
        Some(p) => format!(" [{}]", p),
        None => format!(" [{}]", created.kind),
    };
    println!(
        "Checkpoint recorded{} for {} / {}: {} miles, cost {}, CPM {}",
        tag,
        created.program,
        created.account,
        created.total_miles,
        fmt_amount(created.total_cost),
        fmt_amount(created.cpm_snapshot)
    );
    if let (Some(from), Some(to)) = (created.covered_from, created.covered_to) {
        println!("Covered transactions dated {} to {}", from, to);
    }
    Ok(())
}

#[derive(Serialize)]
struct CheckpointRow {
    id: i64,
    date: String,
    kind: String,
    period: String,
    total_miles: i64,
    total_cost: String,
    cpm_snapshot: String,
    description: String,
}

fn list(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let account = sub.get_one::<String>("account").unwrap();
    let program = sub.get_one::<String>("program").unwrap();
    let (account_id, _) = find_account(conn, account)?;
    let program_id = find_program(conn, program)?;

    let mut stmt = conn.prepare(
        "SELECT id, checkpoint_date, kind, period, total_miles, total_cost, cpm_snapshot, description
         FROM cpm_checkpoints
         WHERE account_id = ?1 AND program_id = ?2
         ORDER BY id DESC",
    )?;
    let rows = stmt.query_map(params![account_id, program_id], |r| {
        Ok(CheckpointRow {
            id: r.get(0)?,
            date: r.get(1)?,
            kind: r.get(2)?,
            period: r.get::<_, Option<String>>(3)?.unwrap_or_default(),
            total_miles: r.get(4)?,
            total_cost: r.get(5)?,
            cpm_snapshot: r.get(6)?,
            description: r.get(7)?,
        })
    })?;
    let mut data = Vec::new();
    for row in rows {
        data.push(row?);
    }

    if !maybe_print_json(sub.get_flag("json"), false, &data)? {
        let table_rows = data
            .iter()
            .map(|c| {
                vec![
                    c.id.to_string(),
                    c.date.clone(),
                    c.kind.clone(),
                    c.period.clone(),
                    c.total_miles.to_string(),
                    c.total_cost.clone(),
                    c.cpm_snapshot.clone(),
                    c.description.clone(),
                ]
            })
            .collect();
        println!(
            "{}",
            pretty_table(
                &["Id", "Date", "Kind", "Period", "Miles", "Cost", "CPM", "Description"],
                table_rows,
            )
        );
    }
    Ok(())
}
