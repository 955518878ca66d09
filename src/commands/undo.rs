// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::error::{LedgerError, LedgerResult};
use crate::utils::{find_account, find_program, program_name};
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;

pub fn handle(conn: &mut Connection, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("preview", sub)) => preview(conn, sub)?,
        Some(("confirm", sub)) => confirm(conn, sub)?,
        _ => {}
    }
    Ok(())
}

/// Display snapshot of the row a preview selected, frozen at preview time.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionSnapshot {
    pub program: String,
    pub mode: String,
    pub base_miles: i64,
    pub bonus_percent: String,
    pub credited_miles: i64,
    pub total_cost: String,
    pub cpm_real: String,
    pub tx_date: String,
    pub description: String,
    pub subscription_id: Option<i64>,
    pub covered_by_checkpoint: bool,
}

/// Optimistic token for the two-step delete: the identity of the latest
/// transaction at preview time, re-validated at confirm time.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteHandle {
    pub transaction_id: i64,
    pub account_id: i64,
    pub program_id: i64,
    pub snapshot: TransactionSnapshot,
}

fn latest_transaction_id(
    conn: &Connection,
    account_id: i64,
    program_id: i64,
) -> LedgerResult<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM transactions
             WHERE account_id = ?1 AND ref_program_id = ?2
             ORDER BY tx_date DESC, registered_at DESC, id DESC
             LIMIT 1",
            params![account_id, program_id],
            |r| r.get(0),
        )
        .optional()?)
}

/// Step 1 of 2: selects the most recent transaction for the pair and hands
/// back a handle for confirmation. Read-only; only the latest entry may ever
/// be removed, because older ones already shaped the CPM of what followed.
pub fn preview_delete_last_transaction(
    conn: &Connection,
    account: &str,
    program: &str,
) -> LedgerResult<DeleteHandle> {
    let (account_id, account_name) = find_account(conn, account)?;
    let program_id = find_program(conn, program)?;
    let program_label = program_name(conn, program_id)?;

    let id = latest_transaction_id(conn, account_id, program_id)?.ok_or_else(|| {
        LedgerError::not_found(format!(
            "transactions for {} / {}",
            program_label, account_name
        ))
    })?;

    let snapshot = conn.query_row(
        "SELECT mode, base_miles, bonus_percent, credited_miles, total_cost, cpm_real,
                tx_date, description, subscription_id
         FROM transactions WHERE id = ?1",
        params![id],
        |r| {
            Ok(TransactionSnapshot {
                program: program_label.clone(),
                mode: r.get(0)?,
                base_miles: r.get(1)?,
                bonus_percent: r.get(2)?,
                credited_miles: r.get(3)?,
                total_cost: r.get(4)?,
                cpm_real: r.get(5)?,
                tx_date: r.get(6)?,
                description: r.get(7)?,
                subscription_id: r.get(8)?,
                covered_by_checkpoint: false,
            })
        },
    )?;

    let covered: Option<i64> = conn
        .query_row(
            "SELECT id FROM cpm_checkpoints
             WHERE account_id = ?1 AND program_id = ?2 AND covered_through_tx_id >= ?3
             LIMIT 1",
            params![account_id, program_id, id],
            |r| r.get(0),
        )
        .optional()?;

    Ok(DeleteHandle {
        transaction_id: id,
        account_id,
        program_id,
        snapshot: TransactionSnapshot {
            covered_by_checkpoint: covered.is_some(),
            ..snapshot
        },
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct RemovedCheckpoint {
    pub id: i64,
    pub kind: String,
    pub period: Option<String>,
    pub cpm_snapshot: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteResult {
    pub transaction_id: i64,
    pub removed_checkpoints: Vec<RemovedCheckpoint>,
}

/// Step 2 of 2: deletes the previewed transaction, cascading its batches.
/// Fails with a stale handle when anything newer arrived since the preview.
/// Checkpoints whose covered bound includes the row folded it into their
/// snapshot; they are invalidated by the undo and removed with it.
pub fn confirm_delete_transaction(
    conn: &mut Connection,
    handle: &DeleteHandle,
) -> LedgerResult<DeleteResult> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let latest = latest_transaction_id(&tx, handle.account_id, handle.program_id)?;
    if latest != Some(handle.transaction_id) {
        return Err(LedgerError::stale(
            "the previewed transaction is no longer the most recent one; preview again",
        ));
    }

    let mut removed = Vec::new();
    {
        let mut stmt = tx.prepare(
            "SELECT id, kind, period, cpm_snapshot FROM cpm_checkpoints
             WHERE account_id = ?1 AND program_id = ?2 AND covered_through_tx_id >= ?3
             ORDER BY id",
        )?;
        let rows = stmt.query_map(
            params![handle.account_id, handle.program_id, handle.transaction_id],
            |r| {
                Ok(RemovedCheckpoint {
                    id: r.get(0)?,
                    kind: r.get(1)?,
                    period: r.get(2)?,
                    cpm_snapshot: r.get(3)?,
                })
            },
        )?;
        for row in rows {
            removed.push(row?);
        }
    }
    tx.execute(
        "DELETE FROM cpm_checkpoints
         WHERE account_id = ?1 AND program_id = ?2 AND covered_through_tx_id >= ?3",
        params![handle.account_id, handle.program_id, handle.transaction_id],
    )?;
    tx.execute(
        "DELETE FROM transactions WHERE id = ?1",
        params![handle.transaction_id],
    )?;
    tx.commit()?;

    tracing::info!(
        transaction_id = handle.transaction_id,
        removed_checkpoints = removed.len(),
        "transaction deleted"
    );
    Ok(DeleteResult {
        transaction_id: handle.transaction_id,
        removed_checkpoints: removed,
    })
}

fn preview(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let account = sub.get_one::<String>("account").unwrap();
    let program = sub.get_one::<String>("program").unwrap();
    let handle = preview_delete_last_transaction(conn, account, program)?;
    let s = &handle.snapshot;

    println!("Most recent transaction for {}:", s.program);
    println!("  Mode       : {}", s.mode);
    println!(
        "  Miles      : {} base -> {} credited",
        s.base_miles, s.credited_miles
    );
    println!("  Cost       : {} | CPM {}", s.total_cost, s.cpm_real);
    println!("  Date       : {}", s.tx_date);
    println!("  Description: {}", s.description);
    if s.subscription_id.is_some() {
        println!("  Warning: this entry belongs to a subscription; deleting it changes the contract history.");
    }
    if s.covered_by_checkpoint {
        println!("  Warning: a CPM checkpoint covers this entry and will be removed with it.");
    }
    println!(
        "Run 'milebook undo confirm --account \"{}\" --program \"{}\" --transaction {}' to delete.",
        account, program, handle.transaction_id
    );
    Ok(())
}

fn confirm(conn: &mut Connection, sub: &clap::ArgMatches) -> Result<()> {
    let account = sub.get_one::<String>("account").unwrap();
    let program = sub.get_one::<String>("program").unwrap();
    let expected: i64 = sub
        .get_one::<String>("transaction")
        .unwrap()
        .trim()
        .parse()?;

    // Rebuild the handle and make sure it still points at the id the user
    // confirmed; the engine re-validates once more inside the atomic unit.
    let handle = preview_delete_last_transaction(conn, account, program)?;
    if handle.transaction_id != expected {
        return Err(LedgerError::stale(
            "the previewed transaction is no longer the most recent one; preview again",
        )
        .into());
    }
    let result = confirm_delete_transaction(conn, &handle)?;

    println!("Transaction #{} deleted.", result.transaction_id);
    for chk in &result.removed_checkpoints {
        let tag = chk
            .period
            .clone()
            .unwrap_or_else(|| chk.kind.clone());
        println!(
            "Removed invalidated checkpoint #{} ({}, CPM {})",
            chk.id, tag, chk.cpm_snapshot
        );
    }
    if !result.removed_checkpoints.is_empty() {
        println!("The CPM history for this program needs reconfirmation.");
    }
    Ok(())
}
