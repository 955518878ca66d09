// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::models::cpm;
use crate::utils::pretty_table;
use anyhow::Result;
use rusqlite::Connection;
use rust_decimal::Decimal;

/// Re-derives every stored derivation and flags drift. Stored cpm_real and
/// fixed_cpm must always match their inputs; batch quantities must add up to
/// the parent's base miles; no active subscription may carry an end date.
pub fn audit(conn: &Connection) -> Result<Vec<Vec<String>>> {
    let mut issues = Vec::new();

    // 1) cpm_real drift against cost/credited (adjustments store zero by design)
    let mut stmt = conn.prepare(
        "SELECT id, credited_miles, total_cost, cpm_real FROM transactions WHERE mode != 'adjustment'",
    )?;
    let mut cur = stmt.query([])?;
    while let Some(r) = cur.next()? {
        let id: i64 = r.get(0)?;
        let credited: i64 = r.get(1)?;
        let cost_s: String = r.get(2)?;
        let cpm_s: String = r.get(3)?;
        let (Ok(cost), Ok(stored)) = (
            Decimal::from_str_exact(&cost_s),
            Decimal::from_str_exact(&cpm_s),
        ) else {
            issues.push(vec!["unparseable_amount".into(), format!("transaction {}", id)]);
            continue;
        };
        if cpm(cost, credited).round_dp(6) != stored.round_dp(6) {
            issues.push(vec!["cpm_real_drift".into(), format!("transaction {}", id)]);
        }
    }

    // 2) batch quantities vs base miles
    let mut stmt2 = conn.prepare(
        "SELECT t.id, t.base_miles, SUM(b.miles_qty)
         FROM transactions t JOIN transaction_batches b ON b.transaction_id = t.id
         GROUP BY t.id HAVING SUM(b.miles_qty) != t.base_miles",
    )?;
    let mut cur2 = stmt2.query([])?;
    while let Some(r) = cur2.next()? {
        let id: i64 = r.get(0)?;
        issues.push(vec!["batch_sum_mismatch".into(), format!("transaction {}", id)]);
    }

    // 3) subscription coherence
    let mut stmt3 = conn.prepare(
        "SELECT id, cycle_value, cycle_miles, fixed_cpm, active, end_date FROM subscriptions",
    )?;
    let mut cur3 = stmt3.query([])?;
    while let Some(r) = cur3.next()? {
        let id: i64 = r.get(0)?;
        let value_s: String = r.get(1)?;
        let miles: i64 = r.get(2)?;
        let cpm_s: String = r.get(3)?;
        let active: bool = r.get(4)?;
        let end_date: Option<String> = r.get(5)?;
        if active && end_date.is_some() {
            issues.push(vec!["active_with_end_date".into(), format!("subscription {}", id)]);
        }
        let (Ok(value), Ok(stored)) = (
            Decimal::from_str_exact(&value_s),
            Decimal::from_str_exact(&cpm_s),
        ) else {
            issues.push(vec!["unparseable_amount".into(), format!("subscription {}", id)]);
            continue;
        };
        if cpm(value, miles).round_dp(6) != stored.round_dp(6) {
            issues.push(vec!["fixed_cpm_drift".into(), format!("subscription {}", id)]);
        }
    }

    // 4) monthly checkpoints must carry a reference period
    let mut stmt4 = conn
        .prepare("SELECT id FROM cpm_checkpoints WHERE kind = 'monthly' AND period IS NULL")?;
    let mut cur4 = stmt4.query([])?;
    while let Some(r) = cur4.next()? {
        let id: i64 = r.get(0)?;
        issues.push(vec!["monthly_without_period".into(), format!("checkpoint {}", id)]);
    }

    Ok(issues)
}

pub fn handle(conn: &Connection) -> Result<()> {
    let issues = audit(conn)?;
    if issues.is_empty() {
        println!("doctor: no issues found");
    } else {
        println!("{}", pretty_table(&["Issue", "Detail"], issues));
    }
    Ok(())
}
