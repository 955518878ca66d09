// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use rusqlite::Connection;
use std::fs;
use std::path::PathBuf;

static APP: Lazy<(&str, &str, &str)> = Lazy::new(|| ("com.alphavelocity", "Milebook", "milebook"));

pub fn db_path() -> Result<PathBuf> {
    let proj = ProjectDirs::from(APP.0, APP.1, APP.2)
        .context("Could not determine platform-specific data dir")?;
    let data_dir = proj.data_dir();
    fs::create_dir_all(data_dir).context("Failed to create data dir")?;
    Ok(data_dir.join("milebook.sqlite"))
}

pub fn open_or_init() -> Result<Connection> {
    let path = db_path()?;
    let mut conn =
        Connection::open(&path).with_context(|| format!("Open DB at {}", path.display()))?;
    init_schema(&mut conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        r#"
    PRAGMA foreign_keys = ON;
    PRAGMA busy_timeout = 5000;

    CREATE TABLE IF NOT EXISTS accounts(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        tax_id TEXT NOT NULL UNIQUE,
        management TEXT NOT NULL CHECK(management IN ('own','client')),
        active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE IF NOT EXISTS programs(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        kind TEXT NOT NULL CHECK(kind IN ('airline','bank','broker')),
        active INTEGER NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS subscriptions(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        account_id INTEGER NOT NULL,
        program_id INTEGER NOT NULL,
        periodicity TEXT NOT NULL CHECK(periodicity IN ('monthly','annual')),
        cycle_value TEXT NOT NULL,
        cycle_miles INTEGER NOT NULL,
        fixed_cpm TEXT NOT NULL,
        start_date TEXT NOT NULL,
        renewal_date TEXT NOT NULL,
        end_date TEXT,
        active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        FOREIGN KEY(account_id) REFERENCES accounts(id),
        FOREIGN KEY(program_id) REFERENCES programs(id)
    );
    -- One active contract per (account, program); the index is the final
    -- arbiter when two creations race.
    CREATE UNIQUE INDEX IF NOT EXISTS idx_subscriptions_one_active
        ON subscriptions(account_id, program_id) WHERE active = 1;

    -- Setting an end date closes the contract; active never survives a
    -- non-NULL end_date.
    CREATE TRIGGER IF NOT EXISTS trg_subscriptions_close_on_update
        AFTER UPDATE OF end_date ON subscriptions
        FOR EACH ROW WHEN NEW.end_date IS NOT NULL AND NEW.active = 1
    BEGIN
        UPDATE subscriptions SET active = 0 WHERE id = NEW.id;
    END;
    CREATE TRIGGER IF NOT EXISTS trg_subscriptions_close_on_insert
        AFTER INSERT ON subscriptions
        FOR EACH ROW WHEN NEW.end_date IS NOT NULL AND NEW.active = 1
    BEGIN
        UPDATE subscriptions SET active = 0 WHERE id = NEW.id;
    END;

    CREATE TABLE IF NOT EXISTS transactions(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        account_id INTEGER NOT NULL,
        mode TEXT NOT NULL CHECK(mode IN ('purchase','organic','transfer','club','adjustment')),
        source_id INTEGER,
        dest_id INTEGER NOT NULL,
        ref_program_id INTEGER NOT NULL,
        base_miles INTEGER NOT NULL,
        bonus_percent TEXT NOT NULL DEFAULT '0',
        credited_miles INTEGER NOT NULL,
        total_cost TEXT NOT NULL,
        cpm_real TEXT NOT NULL,
        tx_date TEXT NOT NULL,
        registered_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f','now')),
        description TEXT NOT NULL,
        note TEXT,
        subscription_id INTEGER,
        FOREIGN KEY(account_id) REFERENCES accounts(id),
        FOREIGN KEY(source_id) REFERENCES programs(id),
        FOREIGN KEY(dest_id) REFERENCES programs(id),
        FOREIGN KEY(ref_program_id) REFERENCES programs(id),
        FOREIGN KEY(subscription_id) REFERENCES subscriptions(id)
    );
    CREATE INDEX IF NOT EXISTS idx_transactions_ref
        ON transactions(account_id, ref_program_id, tx_date);

    CREATE TABLE IF NOT EXISTS transaction_batches(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        transaction_id INTEGER NOT NULL,
        kind TEXT NOT NULL CHECK(kind IN ('organic','paid')),
        miles_qty INTEGER NOT NULL,
        lot_cpm TEXT NOT NULL,
        partial_cost TEXT NOT NULL,
        seq INTEGER NOT NULL,
        FOREIGN KEY(transaction_id) REFERENCES transactions(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS cpm_checkpoints(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        account_id INTEGER NOT NULL,
        program_id INTEGER NOT NULL,
        checkpoint_date TEXT NOT NULL,
        total_miles INTEGER NOT NULL,
        total_cost TEXT NOT NULL,
        cpm_snapshot TEXT NOT NULL,
        kind TEXT NOT NULL CHECK(kind IN ('monthly','manual','automatic')),
        period TEXT,
        covered_from TEXT,
        covered_to TEXT,
        covered_through_tx_id INTEGER,
        description TEXT NOT NULL,
        note TEXT,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f','now')),
        FOREIGN KEY(account_id) REFERENCES accounts(id),
        FOREIGN KEY(program_id) REFERENCES programs(id)
    );
    -- One monthly close per (account, program, period): the fencing token
    -- for the crediting protocol.
    CREATE UNIQUE INDEX IF NOT EXISTS idx_checkpoints_monthly
        ON cpm_checkpoints(account_id, program_id, period) WHERE kind = 'monthly';
    "#,
    )?;
    Ok(())
}
