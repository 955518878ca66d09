// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::error::{LedgerError, LedgerResult};
use crate::models::Management;
use crate::utils::{is_valid_tax_id, maybe_print_json, normalize_tax_id, pretty_table};
use anyhow::Result;
use rusqlite::{params, Connection};
use serde::Serialize;

pub fn handle(conn: &Connection, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("add", sub)) => {
            let name = sub.get_one::<String>("name").unwrap();
            let tax_id = sub.get_one::<String>("tax-id").unwrap();
            let management_raw = sub.get_one::<String>("management").unwrap();
            let management = Management::parse(management_raw)
                .ok_or_else(|| anyhow::anyhow!("Management must be 'own' or 'client'"))?;
            let id = register_account(conn, name, tax_id, management)?;
            println!("Added account '{}' ({}) with id {}", name, management.as_str(), id);
        }
        Some(("list", sub)) => list(conn, sub)?,
        _ => {}
    }
    Ok(())
}

/// Registers a client. The tax id must carry valid verifier digits and be
/// unique across the ledger; accounts are never hard-deleted afterwards.
pub fn register_account(
    conn: &Connection,
    name: &str,
    tax_id_raw: &str,
    management: Management,
) -> LedgerResult<i64> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LedgerError::validation("account name cannot be empty"));
    }
    let tax_id = normalize_tax_id(tax_id_raw);
    if !is_valid_tax_id(&tax_id) {
        return Err(LedgerError::validation(
            "invalid tax id: expected 11 digits with valid verifier digits",
        ));
    }
    conn.execute(
        "INSERT INTO accounts(name, tax_id, management) VALUES (?1, ?2, ?3)",
        params![name, tax_id, management.as_str()],
    )
    .map_err(|e| LedgerError::on_unique(e, "an account with this tax id already exists"))?;
    let id = conn.last_insert_rowid();
    tracing::info!(id, "account registered");
    Ok(id)
}

#[derive(Serialize)]
struct AccountRow {
    id: i64,
    name: String,
    tax_id: String,
    management: String,
    active: bool,
    created_at: String,
}

fn list(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT id, name, tax_id, management, active, created_at FROM accounts ORDER BY name",
    )?;
    let rows = stmt.query_map([], |r| {
        Ok(AccountRow {
            id: r.get(0)?,
            name: r.get(1)?,
            tax_id: r.get(2)?,
            management: r.get(3)?,
            active: r.get(4)?,
            created_at: r.get(5)?,
        })
    })?;
    let mut data = Vec::new();
    for row in rows {
        data.push(row?);
    }
    if !maybe_print_json(sub.get_flag("json"), false, &data)? {
        let table_rows = data
            .iter()
            .map(|a| {
                vec![
                    a.id.to_string(),
                    a.name.clone(),
                    a.tax_id.clone(),
                    a.management.clone(),
                    if a.active { "yes".into() } else { "no".into() },
                    a.created_at.clone(),
                ]
            })
            .collect();
        println!(
            "{}",
            pretty_table(
                &["Id", "Name", "Tax id", "Management", "Active", "Created"],
                table_rows,
            )
        );
    }
    Ok(())
}
