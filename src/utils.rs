// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::error::{LedgerError, LedgerResult};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;

pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", s))
}

/// Validates a YYYY-MM reference period and returns it normalized.
pub fn parse_period(s: &str) -> LedgerResult<String> {
    let s = s.trim();
    NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d")
        .map_err(|_| LedgerError::validation(format!("invalid period '{}', expected YYYY-MM", s)))?;
    Ok(s.to_string())
}

/// A monthly close cannot reference a month that has not happened yet.
pub fn reject_future_period(period: &str) -> LedgerResult<()> {
    let first = NaiveDate::parse_from_str(&format!("{}-01", period), "%Y-%m-%d")
        .map_err(|_| LedgerError::validation(format!("invalid period '{}'", period)))?;
    let now = today();
    if (first.year(), first.month()) > (now.year(), now.month()) {
        return Err(LedgerError::validation(format!(
            "period {} is in the future and cannot be closed",
            period
        )));
    }
    Ok(())
}

pub fn parse_decimal(s: &str) -> Result<Decimal> {
    s.trim()
        .parse::<Decimal>()
        .with_context(|| format!("Invalid decimal '{}'", s))
}

static NON_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\D").unwrap());

/// Strips punctuation and whitespace from a tax id, keeping digits only.
pub fn normalize_tax_id(raw: &str) -> String {
    NON_DIGITS.replace_all(raw.trim(), "").into_owned()
}

/// 11-digit national tax id: two trailing mod-11 verifier digits, and a
/// repeated single digit is never valid. Expects normalized input.
pub fn is_valid_tax_id(digits: &str) -> bool {
    if digits.len() != 11 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let d: Vec<u32> = digits.chars().filter_map(|c| c.to_digit(10)).collect();
    if d.iter().all(|&x| x == d[0]) {
        return false;
    }
    let verifier = |upto: usize| -> u32 {
        let total: u32 = d[..upto]
            .iter()
            .zip((2..=(upto as u32 + 1)).rev())
            .map(|(x, w)| x * w)
            .sum();
        let rest = total % 11;
        if rest < 2 { 0 } else { 11 - rest }
    };
    d[9] == verifier(9) && d[10] == verifier(10)
}

/// Finds an account by tax id (any punctuation) or by name, exact then
/// partial. Returns (id, display name).
pub fn find_account(conn: &Connection, ident: &str) -> LedgerResult<(i64, String)> {
    let digits = normalize_tax_id(ident);
    if digits.len() == 11 {
        let hit: Option<(i64, String)> = conn
            .query_row(
                "SELECT id, name FROM accounts WHERE tax_id = ?1",
                params![digits],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        if let Some(found) = hit {
            return Ok(found);
        }
    }
    let name = ident.trim();
    let hit: Option<(i64, String)> = conn
        .query_row(
            "SELECT id, name FROM accounts WHERE name = ?1",
            params![name],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    if let Some(found) = hit {
        return Ok(found);
    }
    let hit: Option<(i64, String)> = conn
        .query_row(
            "SELECT id, name FROM accounts WHERE name LIKE ?1 ORDER BY id LIMIT 1",
            params![format!("%{}%", name)],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    hit.ok_or_else(|| LedgerError::not_found(format!("account '{}'", ident)))
}

pub fn find_program(conn: &Connection, name: &str) -> LedgerResult<i64> {
    let name = name.trim();
    let hit: Option<i64> = conn
        .query_row(
            "SELECT id FROM programs WHERE name = ?1",
            params![name],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(id) = hit {
        return Ok(id);
    }
    let hit: Option<i64> = conn
        .query_row(
            "SELECT id FROM programs WHERE name LIKE ?1 ORDER BY id LIMIT 1",
            params![format!("%{}%", name)],
            |r| r.get(0),
        )
        .optional()?;
    hit.ok_or_else(|| LedgerError::not_found(format!("program '{}'", name)))
}

pub fn program_name(conn: &Connection, id: i64) -> LedgerResult<String> {
    conn.query_row(
        "SELECT name FROM programs WHERE id = ?1",
        params![id],
        |r| r.get(0),
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found(format!("program #{}", id)))
}

/// Re-parses a decimal persisted as TEXT. A row that fails here is corrupt,
/// so this surfaces as an invariant violation rather than a user error.
pub fn stored_decimal(s: &str, field: &'static str) -> LedgerResult<Decimal> {
    Decimal::from_str_exact(s.trim())
        .map_err(|e| LedgerError::invariant(field, format!("stored value '{}': {}", s, e)))
}

pub fn stored_date(s: &str, field: &'static str) -> LedgerResult<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| LedgerError::invariant(field, format!("stored value '{}': {}", s, e)))
}

pub fn fmt_amount(d: Decimal) -> String {
    d.round_dp(2).to_string()
}

pub fn pretty_table(headers: &[&str], rows: Vec<Vec<String>>) -> Table {
    let mut t = Table::new();
    t.load_preset(UTF8_FULL);
    t.set_header(headers.iter().map(|h| Cell::new(*h)));
    for r in rows {
        t.add_row(r.into_iter().map(Cell::new));
    }
    t
}

pub fn maybe_print_json<T: serde::Serialize>(
    json_flag: bool,
    jsonl_flag: bool,
    v: &T,
) -> Result<bool> {
    if json_flag {
        println!("{}", serde_json::to_string_pretty(v)?);
        return Ok(true);
    }
    if jsonl_flag {
        // If v is an array, stream each element; else stream single line
        let val = serde_json::to_value(v)?;
        if let Some(arr) = val.as_array() {
            for item in arr {
                println!("{}", serde_json::to_string(item)?);
            }
        } else {
            println!("{}", serde_json::to_string(&val)?);
        }
        return Ok(true);
    }
    Ok(false)
}

use chrono::Datelike;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tax_id_normalization_strips_punctuation() {
        assert_eq!(normalize_tax_id(" 529.982.247-25 "), "52998224725");
    }

    #[test]
    fn tax_id_verifier_digits() {
        assert!(is_valid_tax_id("52998224725"));
        assert!(!is_valid_tax_id("52998224724"));
        assert!(!is_valid_tax_id("11111111111"));
        assert!(!is_valid_tax_id("1234567890"));
    }

    #[test]
    fn period_parsing() {
        assert_eq!(parse_period(" 2026-03 ").unwrap(), "2026-03");
        assert!(parse_period("2026-13").is_err());
        assert!(parse_period("march").is_err());
    }

    #[test]
    fn future_period_rejected() {
        assert!(reject_future_period("2099-01").is_err());
        assert!(reject_future_period("2020-01").is_ok());
    }
}
