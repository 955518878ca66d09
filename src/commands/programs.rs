// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::error::{LedgerError, LedgerResult};
use crate::models::ProgramKind;
use crate::utils::pretty_table;
use anyhow::Result;
use rusqlite::{params, Connection};

pub fn handle(conn: &Connection, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("add", sub)) => {
            let name = sub.get_one::<String>("name").unwrap();
            let kind_raw = sub.get_one::<String>("kind").unwrap();
            let kind = ProgramKind::parse(kind_raw)
                .ok_or_else(|| anyhow::anyhow!("Kind must be 'airline', 'bank' or 'broker'"))?;
            let id = add_program(conn, name, kind)?;
            println!("Added program '{}' ({}) with id {}", name, kind.as_str(), id);
        }
        Some(("list", _)) => {
            let mut stmt =
                conn.prepare("SELECT name, kind FROM programs WHERE active = 1 ORDER BY name")?;
            let rows = stmt.query_map([], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?;
            let mut data = Vec::new();
            for row in rows {
                let (n, k) = row?;
                data.push(vec![n, k]);
            }
            println!("{}", pretty_table(&["Name", "Kind"], data));
        }
        _ => {}
    }
    Ok(())
}

pub fn add_program(conn: &Connection, name: &str, kind: ProgramKind) -> LedgerResult<i64> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LedgerError::validation("program name cannot be empty"));
    }
    conn.execute(
        "INSERT INTO programs(name, kind) VALUES (?1, ?2)",
        params![name, kind.as_str()],
    )
    .map_err(|e| LedgerError::on_unique(e, "a program with this name already exists"))?;
    Ok(conn.last_insert_rowid())
}
