// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::commands::checkpoints::{cpm_totals, get_current_cpm, insert_snapshot};
use crate::commands::transactions::{insert_transaction, NewTransaction};
use crate::error::{LedgerError, LedgerResult};
use crate::models::{cpm, AcquisitionMode, CheckpointKind};
use crate::utils::{find_account, find_program, fmt_amount, maybe_print_json, parse_decimal, program_name, today};
use anyhow::Result;
use rusqlite::{Connection, TransactionBehavior};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

pub fn handle(conn: &mut Connection, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("show", sub)) => show(conn, sub)?,
        Some(("target", sub)) => target(conn, sub)?,
        Some(("adjust", sub)) => adjust(conn, sub)?,
        _ => {}
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustmentKind {
    Cost,
    Miles,
}

impl AdjustmentKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "cost" => Some(AdjustmentKind::Cost),
            "miles" => Some(AdjustmentKind::Miles),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AdjustmentPlan {
    pub account: String,
    pub program: String,
    pub current_cpm: Decimal,
    pub target_cpm: Decimal,
    pub needed: bool,
    /// Delta to apply on cost, keeping miles unchanged.
    pub cost_delta: Decimal,
    /// Free miles that dilute down to the target; only meaningful when the
    /// target sits below the current CPM.
    pub miles_delta: Option<i64>,
}

/// Computes what it would take to land on a target CPM. Creates nothing.
pub fn calculate_cpm_adjustment(
    conn: &Connection,
    account: &str,
    program: &str,
    target_cpm: Decimal,
) -> LedgerResult<AdjustmentPlan> {
    if target_cpm <= Decimal::ZERO {
        return Err(LedgerError::validation("target CPM must be positive"));
    }
    let (account_id, account_name) = find_account(conn, account)?;
    let program_id = find_program(conn, program)?;
    let program_label = program_name(conn, program_id)?;

    let totals = cpm_totals(conn, account_id, program_id)?;
    if totals.total_miles <= 0 {
        return Err(LedgerError::validation(format!(
            "no transactions recorded for {} / {}",
            program_label, account_name
        )));
    }
    let current = totals.current_cpm();
    let needed = (current - target_cpm).abs() >= Decimal::new(1, 2);

    let cost_delta =
        target_cpm * Decimal::from(totals.total_miles) / Decimal::ONE_THOUSAND - totals.total_cost;
    let miles_delta = if target_cpm < current {
        (totals.total_cost / target_cpm * Decimal::ONE_THOUSAND
            - Decimal::from(totals.total_miles))
        .round()
        .to_i64()
    } else {
        None
    };

    Ok(AdjustmentPlan {
        account: account_name,
        program: program_label,
        current_cpm: current,
        target_cpm,
        needed,
        cost_delta,
        miles_delta,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct AppliedAdjustment {
    pub transaction_id: i64,
    pub checkpoint_id: i64,
    pub account: String,
    pub program: String,
    pub new_cpm: Decimal,
}

/// Writes one adjustment entry and an automatic checkpoint in the same
/// unit, so later reconciliation starts from the adjusted state.
pub fn apply_cpm_adjustment(
    conn: &mut Connection,
    account: &str,
    program: &str,
    kind: AdjustmentKind,
    value: Decimal,
    note: Option<&str>,
) -> LedgerResult<AppliedAdjustment> {
    if value == Decimal::ZERO {
        return Err(LedgerError::validation("adjustment value cannot be zero"));
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let (account_id, account_name) = find_account(&tx, account)?;
    let program_id = find_program(&tx, program)?;
    let program_label = program_name(&tx, program_id)?;

    let (miles, cost, description) = match kind {
        AdjustmentKind::Cost => {
            let before = cpm_totals(&tx, account_id, program_id)?;
            if before.total_cost + value < Decimal::ZERO {
                return Err(LedgerError::validation(format!(
                    "a cost delta of {} would leave the cumulative cost negative",
                    fmt_amount(value)
                )));
            }
            (
                0i64,
                value,
                format!("CPM adjustment: cost correction ({:+})", value.round_dp(2)),
            )
        }
        AdjustmentKind::Miles => {
            if value < Decimal::ZERO || !value.fract().is_zero() {
                return Err(LedgerError::validation(
                    "a miles adjustment must be a positive whole number",
                ));
            }
            let qty = value.to_i64().ok_or_else(|| {
                LedgerError::validation("miles adjustment is out of range")
            })?;
            (
                qty,
                Decimal::ZERO,
                format!("CPM adjustment: {} free miles", qty),
            )
        }
    };

    let transaction_id = insert_transaction(
        &tx,
        &NewTransaction {
            account_id,
            mode: AcquisitionMode::Adjustment,
            source_id: None,
            dest_id: program_id,
            ref_program_id: program_id,
            base_miles: miles,
            bonus_percent: Decimal::ZERO,
            credited_miles: miles,
            total_cost: cost,
            cpm_real: Decimal::ZERO.to_string(),
            tx_date: today(),
            description,
            note,
            subscription_id: None,
        },
    )?;

    let totals = cpm_totals(&tx, account_id, program_id)?;
    let checkpoint_id = insert_snapshot(
        &tx,
        account_id,
        program_id,
        CheckpointKind::Automatic,
        None,
        &totals,
        note,
    )?;
    tx.commit()?;

    let new_cpm = cpm(totals.total_cost, totals.total_miles);
    tracing::info!(transaction_id, checkpoint_id, account_id, program_id, "cpm adjustment applied");
    Ok(AppliedAdjustment {
        transaction_id,
        checkpoint_id,
        account: account_name,
        program: program_label,
        new_cpm,
    })
}

fn show(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let account = sub.get_one::<String>("account").unwrap();
    let program = sub.get_one::<String>("program").unwrap();
    let status = get_current_cpm(conn, account, program)?;

    if maybe_print_json(sub.get_flag("json"), false, &status)? {
        return Ok(());
    }
    println!("CPM summary - {} / {}", status.program, status.account);
    match &status.checkpoint {
        Some(chk) => {
            let tag = chk.period.clone().unwrap_or_else(|| chk.kind.to_string());
            println!(
                "Last checkpoint: {} ({}) - confirmed CPM {}",
                chk.checkpoint_date,
                tag,
                fmt_amount(chk.cpm_snapshot)
            );
        }
        None => println!("No checkpoint yet - full history scanned"),
    }
    println!("Transactions since then: {}", status.unconsolidated);
    println!(
        "Position: {} miles | cost {} | current CPM {}",
        status.total_miles,
        fmt_amount(status.total_cost),
        fmt_amount(status.current_cpm)
    );
    if status.unconsolidated > 10 {
        println!(
            "{} transactions have no checkpoint; confirming now will speed up future reconciliation.",
            status.unconsolidated
        );
    }
    Ok(())
}

fn target(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let account = sub.get_one::<String>("account").unwrap();
    let program = sub.get_one::<String>("program").unwrap();
    let target_cpm = parse_decimal(sub.get_one::<String>("cpm").unwrap())?;

    let plan = calculate_cpm_adjustment(conn, account, program, target_cpm)?;
    if !plan.needed {
        println!(
            "Current CPM for {} / {} is already {}; no adjustment needed",
            plan.program,
            plan.account,
            fmt_amount(plan.current_cpm)
        );
        return Ok(());
    }
    println!(
        "To reach CPM {} (current {}) for {} / {}:",
        fmt_amount(plan.target_cpm),
        fmt_amount(plan.current_cpm),
        plan.program,
        plan.account
    );
    println!(
        "  Option A - cost correction: {} {} on the recorded cost",
        if plan.cost_delta < Decimal::ZERO {
            "remove"
        } else {
            "add"
        },
        fmt_amount(plan.cost_delta.abs())
    );
    match plan.miles_delta {
        Some(qty) => println!("  Option B - free miles: credit {} miles at no cost", qty),
        None => println!("  Option B - unavailable (target above current CPM; free miles cannot raise it)"),
    }
    Ok(())
}

fn adjust(conn: &mut Connection, sub: &clap::ArgMatches) -> Result<()> {
    let account = sub.get_one::<String>("account").unwrap();
    let program = sub.get_one::<String>("program").unwrap();
    let kind_raw = sub.get_one::<String>("kind").unwrap();
    let kind = AdjustmentKind::parse(kind_raw)
        .ok_or_else(|| anyhow::anyhow!("Unknown adjustment kind '{}' (use cost|miles)", kind_raw))?;
    let value = parse_decimal(sub.get_one::<String>("value").unwrap())?;
    let note = sub.get_one::<String>("note").map(|s| s.as_str());

    let applied = apply_cpm_adjustment(conn, account, program, kind, value, note)?;
    println!(
        "Adjustment applied to {} / {}: new CPM {} (checkpoint #{} recorded)",
        applied.program,
        applied.account,
        fmt_amount(applied.new_cpm),
        applied.checkpoint_id
    );
    Ok(())
}
