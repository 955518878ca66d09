// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::Result;
use rusqlite::Connection;
use serde_json::json;

pub fn handle(conn: &Connection, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("transactions", sub)) => export_transactions(conn, sub),
        Some(("checkpoints", sub)) => export_checkpoints(conn, sub),
        _ => Ok(()),
    }
}

fn export_transactions(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let fmt = sub.get_one::<String>("format").unwrap().to_lowercase();
    let out = sub.get_one::<String>("out").unwrap();

    let mut stmt = conn.prepare(
        "SELECT t.tx_date, a.name as account, p.name as program, t.mode,
                t.base_miles, t.bonus_percent, t.credited_miles, t.total_cost,
                t.cpm_real, t.description, t.note
         FROM transactions t
         JOIN accounts a ON t.account_id = a.id
         JOIN programs p ON t.ref_program_id = p.id
         ORDER BY t.tx_date, t.id",
    )?;
    let rows = stmt.query_map([], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, String>(2)?,
            r.get::<_, String>(3)?,
            r.get::<_, i64>(4)?,
            r.get::<_, String>(5)?,
            r.get::<_, i64>(6)?,
            r.get::<_, String>(7)?,
            r.get::<_, String>(8)?,
            r.get::<_, String>(9)?,
            r.get::<_, Option<String>>(10)?,
        ))
    })?;

    match fmt.as_str() {
        "csv" => {
            let mut wtr = csv::Writer::from_path(out)?;
            wtr.write_record([
                "date",
                "account",
                "program",
                "mode",
                "base_miles",
                "bonus_percent",
                "credited_miles",
                "total_cost",
                "cpm_real",
                "description",
                "note",
            ])?;
            for row in rows {
                let (d, a, p, m, base, bonus, credited, cost, cpm, desc, note) = row?;
                wtr.write_record([
                    d,
                    a,
                    p,
                    m,
                    base.to_string(),
                    bonus,
                    credited.to_string(),
                    cost,
                    cpm,
                    desc,
                    note.unwrap_or_default(),
                ])?;
            }
            wtr.flush()?;
        }
        "json" => {
            let mut items = Vec::new();
            for row in rows {
                let (d, a, p, m, base, bonus, credited, cost, cpm, desc, note) = row?;
                items.push(json!({
                    "date": d, "account": a, "program": p, "mode": m,
                    "base_miles": base, "bonus_percent": bonus,
                    "credited_miles": credited, "total_cost": cost,
                    "cpm_real": cpm, "description": desc, "note": note
                }));
            }
            std::fs::write(out, serde_json::to_string_pretty(&items)?)?;
        }
        _ => {
            eprintln!("Unknown format: {} (use csv|json)", fmt);
        }
    }
    println!("Exported transactions to {}", out);
    Ok(())
}

fn export_checkpoints(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let fmt = sub.get_one::<String>("format").unwrap().to_lowercase();
    let out = sub.get_one::<String>("out").unwrap();

    let mut stmt = conn.prepare(
        "SELECT c.checkpoint_date, a.name as account, p.name as program, c.kind,
                c.period, c.total_miles, c.total_cost, c.cpm_snapshot, c.description
         FROM cpm_checkpoints c
         JOIN accounts a ON c.account_id = a.id
         JOIN programs p ON c.program_id = p.id
         ORDER BY c.id",
    )?;
    let rows = stmt.query_map([], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, String>(2)?,
            r.get::<_, String>(3)?,
            r.get::<_, Option<String>>(4)?,
            r.get::<_, i64>(5)?,
            r.get::<_, String>(6)?,
            r.get::<_, String>(7)?,
            r.get::<_, String>(8)?,
        ))
    })?;

    match fmt.as_str() {
        "csv" => {
            let mut wtr = csv::Writer::from_path(out)?;
            wtr.write_record([
                "date",
                "account",
                "program",
                "kind",
                "period",
                "total_miles",
                "total_cost",
                "cpm_snapshot",
                "description",
            ])?;
            for row in rows {
                let (d, a, p, k, period, miles, cost, cpm, desc) = row?;
                wtr.write_record([
                    d,
                    a,
                    p,
                    k,
                    period.unwrap_or_default(),
                    miles.to_string(),
                    cost,
                    cpm,
                    desc,
                ])?;
            }
            wtr.flush()?;
        }
        "json" => {
            let mut items = Vec::new();
            for row in rows {
                let (d, a, p, k, period, miles, cost, cpm, desc) = row?;
                items.push(json!({
                    "date": d, "account": a, "program": p, "kind": k, "period": period,
                    "total_miles": miles, "total_cost": cost, "cpm_snapshot": cpm,
                    "description": desc
                }));
            }
            std::fs::write(out, serde_json::to_string_pretty(&items)?)?;
        }
        _ => {
            eprintln!("Unknown format: {} (use csv|json)", fmt);
        }
    }
    println!("Exported checkpoints to {}", out);
    Ok(())
}
