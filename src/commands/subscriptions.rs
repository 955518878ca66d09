// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::commands::checkpoints::{cpm_totals, insert_snapshot};
use crate::commands::transactions::{insert_transaction, NewTransaction};
use crate::error::{is_unique_violation, LedgerError, LedgerResult};
use crate::models::{cpm, AcquisitionMode, CheckpointKind, Periodicity};
use crate::utils::{
    find_account, find_program, fmt_amount, maybe_print_json, parse_date, parse_decimal,
    parse_period, pretty_table, program_name, reject_future_period, stored_decimal, today,
};
use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use rust_decimal::Decimal;
use serde::Serialize;

pub fn handle(conn: &mut Connection, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("add", sub)) => add(conn, sub)?,
        Some(("correct", sub)) => correct(conn, sub)?,
        Some(("credit", sub)) => credit(conn, sub)?,
        Some(("credit-due", sub)) => credit_due(conn, sub)?,
        Some(("list", sub)) => list(conn, sub)?,
        _ => {}
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct SubscriptionTerms {
    pub periodicity: Periodicity,
    pub cycle_value: Decimal,
    pub cycle_miles: i64,
    pub start_date: NaiveDate,
    pub renewal_date: NaiveDate,
}

impl SubscriptionTerms {
    fn check(&self) -> LedgerResult<()> {
        if self.cycle_value <= Decimal::ZERO {
            return Err(LedgerError::validation(
                "cycle value must be greater than zero",
            ));
        }
        if self.cycle_miles <= 0 {
            return Err(LedgerError::validation(
                "guaranteed miles must be greater than zero",
            ));
        }
        if self.renewal_date < self.start_date {
            return Err(LedgerError::validation(format!(
                "renewal date {} precedes the start date {}",
                self.renewal_date, self.start_date
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedSubscription {
    pub id: i64,
    pub account: String,
    pub program: String,
    pub fixed_cpm: Decimal,
}

fn insert_subscription(
    conn: &Connection,
    account_id: i64,
    program_id: i64,
    terms: &SubscriptionTerms,
) -> LedgerResult<(i64, Decimal)> {
    let fixed_cpm = cpm(terms.cycle_value, terms.cycle_miles);
    conn.execute(
        "INSERT INTO subscriptions(account_id, program_id, periodicity, cycle_value,
             cycle_miles, fixed_cpm, start_date, renewal_date, active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1)",
        params![
            account_id,
            program_id,
            terms.periodicity.as_str(),
            terms.cycle_value.to_string(),
            terms.cycle_miles,
            fixed_cpm.to_string(),
            terms.start_date.to_string(),
            terms.renewal_date.to_string(),
        ],
    )
    .map_err(|e| LedgerError::on_unique(e, "duplicate active subscription"))?;
    Ok((conn.last_insert_rowid(), fixed_cpm))
}

/// Signs a club contract. The contractual CPM is fixed here, once; the
/// partial unique index keeps a second active contract out even when two
/// creations race.
pub fn create_subscription(
    conn: &Connection,
    account: &str,
    program: &str,
    terms: &SubscriptionTerms,
) -> LedgerResult<CreatedSubscription> {
    terms.check()?;
    let (account_id, account_name) = find_account(conn, account)?;
    let program_id = find_program(conn, program)?;
    let program_label = program_name(conn, program_id)?;

    let (id, fixed_cpm) = insert_subscription(conn, account_id, program_id, terms)?;
    tracing::info!(id, account_id, program_id, "subscription created");
    Ok(CreatedSubscription {
        id,
        account: account_name,
        program: program_label,
        fixed_cpm,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrectionResult {
    pub new_id: i64,
    pub previous_id: Option<i64>,
    pub account: String,
    pub program: String,
    pub fixed_cpm: Decimal,
    pub repointed_transactions: usize,
}

/// Replaces the active contract with corrected terms. The old row is closed
/// (end-dated, which deactivates it) and kept forever; transactions that
/// referenced it move to the new row. All three steps share one atomic unit.
pub fn correct_last_subscription(
    conn: &mut Connection,
    account: &str,
    program: &str,
    terms: &SubscriptionTerms,
) -> LedgerResult<CorrectionResult> {
    terms.check()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let (account_id, account_name) = find_account(&tx, account)?;
    let program_id = find_program(&tx, program)?;
    let program_label = program_name(&tx, program_id)?;

    let previous_id: Option<i64> = tx
        .query_row(
            "SELECT id FROM subscriptions
             WHERE account_id = ?1 AND program_id = ?2 AND active = 1
             ORDER BY created_at DESC, id DESC LIMIT 1",
            params![account_id, program_id],
            |r| r.get(0),
        )
        .optional()?;

    if let Some(old_id) = previous_id {
        tx.execute(
            "UPDATE subscriptions SET end_date = ?1 WHERE id = ?2",
            params![today().to_string(), old_id],
        )?;
    }

    let (new_id, fixed_cpm) = insert_subscription(&tx, account_id, program_id, terms)?;

    let repointed = match previous_id {
        Some(old_id) => tx.execute(
            "UPDATE transactions SET subscription_id = ?1 WHERE subscription_id = ?2",
            params![new_id, old_id],
        )?,
        None => 0,
    };
    tx.commit()?;

    tracing::info!(
        new_id,
        previous_id,
        repointed,
        account_id,
        program_id,
        "subscription corrected"
    );
    Ok(CorrectionResult {
        new_id,
        previous_id,
        account: account_name,
        program: program_label,
        fixed_cpm,
        repointed_transactions: repointed,
    })
}

#[derive(Debug, Clone, Serialize)]
pub enum CreditOutcome {
    Credited {
        transaction_id: i64,
        checkpoint_id: i64,
        account: String,
        program: String,
        miles: i64,
        cost: Decimal,
        cpm: Decimal,
    },
    AlreadyCredited {
        period: String,
    },
}

/// Applies one cycle of a club contract for a reference period.
///
/// The atomic unit opens with the write lock already held, so the
/// period-existence check cannot race another writer; the monthly
/// checkpoint's unique index remains the backstop, and losing to it is the
/// idempotent AlreadyCredited outcome, never an error.
pub fn process_monthly_credit(
    conn: &mut Connection,
    subscription_id: i64,
    period: &str,
) -> LedgerResult<CreditOutcome> {
    let period = parse_period(period)?;
    reject_future_period(&period)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let sub: Option<(i64, i64, String, i64, String, bool)> = tx
        .query_row(
            "SELECT account_id, program_id, cycle_value, cycle_miles, fixed_cpm, active
             FROM subscriptions WHERE id = ?1",
            params![subscription_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                ))
            },
        )
        .optional()?;
    let (account_id, program_id, cycle_value_s, cycle_miles, fixed_cpm_s, active) =
        sub.ok_or_else(|| LedgerError::not_found(format!("subscription #{}", subscription_id)))?;
    if !active {
        return Err(LedgerError::conflict(format!(
            "subscription #{} is no longer active",
            subscription_id
        )));
    }

    let already: Option<i64> = tx
        .query_row(
            "SELECT id FROM cpm_checkpoints
             WHERE account_id = ?1 AND program_id = ?2 AND period = ?3 AND kind = 'monthly'",
            params![account_id, program_id, period],
            |r| r.get(0),
        )
        .optional()?;
    if already.is_some() {
        return Ok(CreditOutcome::AlreadyCredited { period });
    }

    let cycle_value = stored_decimal(&cycle_value_s, "subscription.cycle_value")?;
    let fixed_cpm = stored_decimal(&fixed_cpm_s, "subscription.fixed_cpm")?;
    let program_label = program_name(&tx, program_id)?;
    let account_name: String = tx.query_row(
        "SELECT name FROM accounts WHERE id = ?1",
        params![account_id],
        |r| r.get(0),
    )?;

    // Cost and miles come straight from the contract terms; the stored
    // fixed_cpm string is copied verbatim so the entry can never drift from
    // the locked rate.
    let transaction_id = insert_transaction(
        &tx,
        &NewTransaction {
            account_id,
            mode: AcquisitionMode::Club,
            source_id: Some(program_id),
            dest_id: program_id,
            ref_program_id: program_id,
            base_miles: cycle_miles,
            bonus_percent: Decimal::ZERO,
            credited_miles: cycle_miles,
            total_cost: cycle_value,
            cpm_real: fixed_cpm_s.clone(),
            tx_date: today(),
            description: format!("Monthly club credit - {} ({})", program_label, period),
            note: None,
            subscription_id: Some(subscription_id),
        },
    )?;

    let totals = cpm_totals(&tx, account_id, program_id)?;
    let checkpoint_id = match insert_snapshot(
        &tx,
        account_id,
        program_id,
        CheckpointKind::Monthly,
        Some(&period),
        &totals,
        None,
    ) {
        Ok(id) => id,
        Err(e) if is_unique_violation(&e) => {
            // Lost the race after the existence check: roll the credit back
            // and report the idempotent outcome.
            tx.rollback()?;
            return Ok(CreditOutcome::AlreadyCredited { period });
        }
        Err(e) => return Err(e.into()),
    };
    tx.commit()?;

    tracing::info!(
        subscription_id,
        transaction_id,
        checkpoint_id,
        %period,
        "monthly credit applied"
    );
    Ok(CreditOutcome::Credited {
        transaction_id,
        checkpoint_id,
        account: account_name,
        program: program_label,
        miles: cycle_miles,
        cost: cycle_value,
        cpm: fixed_cpm,
    })
}

#[derive(Debug, Serialize)]
pub struct DueCredit {
    pub subscription_id: i64,
    pub outcome: CreditOutcome,
}

/// One crediting pass over every active contract, in ascending subscription
/// id so concurrent passes always lock in the same order.
pub fn process_due_credits(conn: &mut Connection, period: &str) -> LedgerResult<Vec<DueCredit>> {
    let ids: Vec<i64> = {
        let mut stmt = conn.prepare("SELECT id FROM subscriptions WHERE active = 1 ORDER BY id")?;
        let rows = stmt.query_map([], |r| r.get(0))?;
        rows.collect::<rusqlite::Result<Vec<i64>>>()?
    };
    let mut results = Vec::with_capacity(ids.len());
    for id in ids {
        let outcome = process_monthly_credit(conn, id, period)?;
        results.push(DueCredit {
            subscription_id: id,
            outcome,
        });
    }
    Ok(results)
}

fn terms_from_args(sub: &clap::ArgMatches) -> Result<SubscriptionTerms> {
    let periodicity_raw = sub.get_one::<String>("periodicity").unwrap();
    let periodicity = Periodicity::parse(periodicity_raw)
        .ok_or_else(|| anyhow::anyhow!("Unknown periodicity '{}'", periodicity_raw))?;
    let cycle_value = parse_decimal(sub.get_one::<String>("value").unwrap())?;
    let cycle_miles: i64 = sub.get_one::<String>("miles").unwrap().trim().parse()?;
    let start_date = match sub.get_one::<String>("start") {
        Some(raw) => parse_date(raw)?,
        None => today(),
    };
    let renewal_date = parse_date(sub.get_one::<String>("renewal").unwrap())?;
    Ok(SubscriptionTerms {
        periodicity,
        cycle_value,
        cycle_miles,
        start_date,
        renewal_date,
    })
}

fn add(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let account = sub.get_one::<String>("account").unwrap();
    let program = sub.get_one::<String>("program").unwrap();
    let terms = terms_from_args(sub)?;
    let created = create_subscription(conn, account, program, &terms)?;
    println!(
        "Subscription #{} created for {} in {}: {} miles per cycle at {} (locked CPM {})",
        created.id,
        created.account,
        created.program,
        terms.cycle_miles,
        fmt_amount(terms.cycle_value),
        fmt_amount(created.fixed_cpm)
    );
    Ok(())
}

fn correct(conn: &mut Connection, sub: &clap::ArgMatches) -> Result<()> {
    let account = sub.get_one::<String>("account").unwrap();
    let program = sub.get_one::<String>("program").unwrap();
    let terms = terms_from_args(sub)?;
    let result = correct_last_subscription(conn, account, program, &terms)?;
    match result.previous_id {
        Some(old) => println!(
            "Subscription corrected for {} in {}: #{} closed, #{} active (locked CPM {}), {} transaction(s) relinked",
            result.account,
            result.program,
            old,
            result.new_id,
            fmt_amount(result.fixed_cpm),
            result.repointed_transactions
        ),
        None => println!(
            "No active subscription found for {} in {}; created #{} (locked CPM {})",
            result.account,
            result.program,
            result.new_id,
            fmt_amount(result.fixed_cpm)
        ),
    }
    Ok(())
}

fn credit(conn: &mut Connection, sub: &clap::ArgMatches) -> Result<()> {
    let subscription_id: i64 = sub
        .get_one::<String>("subscription")
        .unwrap()
        .trim()
        .parse()?;
    let period = sub.get_one::<String>("period").unwrap();
    match process_monthly_credit(conn, subscription_id, period)? {
        CreditOutcome::Credited {
            account,
            program,
            miles,
            cost,
            cpm,
            ..
        } => println!(
            "Credited {} miles to {} / {} at cost {} (CPM {})",
            miles,
            program,
            account,
            fmt_amount(cost),
            fmt_amount(cpm)
        ),
        CreditOutcome::AlreadyCredited { period } => {
            println!("Period {} was already credited; nothing to do", period)
        }
    }
    Ok(())
}

fn credit_due(conn: &mut Connection, sub: &clap::ArgMatches) -> Result<()> {
    let period = sub.get_one::<String>("period").unwrap();
    let results = process_due_credits(conn, period)?;
    if results.is_empty() {
        println!("No active subscriptions");
        return Ok(());
    }
    for r in &results {
        match &r.outcome {
            CreditOutcome::Credited {
                program,
                account,
                miles,
                ..
            } => println!(
                "#{}: credited {} miles ({} / {})",
                r.subscription_id, miles, program, account
            ),
            CreditOutcome::AlreadyCredited { period } => {
                println!("#{}: {} already credited, skipped", r.subscription_id, period)
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct SubscriptionRow {
    id: i64,
    account: String,
    program: String,
    periodicity: String,
    cycle_value: String,
    cycle_miles: i64,
    fixed_cpm: String,
    start_date: String,
    renewal_date: String,
    end_date: String,
    active: bool,
}

fn list(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let mut sql = String::from(
        "SELECT s.id, a.name, p.name, s.periodicity, s.cycle_value, s.cycle_miles,
                s.fixed_cpm, s.start_date, s.renewal_date, s.end_date, s.active
         FROM subscriptions s
         JOIN accounts a ON s.account_id = a.id
         JOIN programs p ON s.program_id = p.id
         WHERE 1=1",
    );
    let mut params_vec: Vec<String> = Vec::new();
    if let Some(acct) = sub.get_one::<String>("account") {
        sql.push_str(" AND a.name = ?");
        params_vec.push(acct.into());
    }
    sql.push_str(" ORDER BY s.id");

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = if params_vec.is_empty() {
        stmt.query([])?
    } else {
        let params: Vec<&dyn rusqlite::ToSql> = params_vec
            .iter()
            .map(|s| s as &dyn rusqlite::ToSql)
            .collect();
        stmt.query(rusqlite::params_from_iter(params))?
    };

    let mut data = Vec::new();
    while let Some(r) = rows.next()? {
        data.push(SubscriptionRow {
            id: r.get(0)?,
            account: r.get(1)?,
            program: r.get(2)?,
            periodicity: r.get(3)?,
            cycle_value: r.get(4)?,
            cycle_miles: r.get(5)?,
            fixed_cpm: r.get(6)?,
            start_date: r.get(7)?,
            renewal_date: r.get(8)?,
            end_date: r.get::<_, Option<String>>(9)?.unwrap_or_default(),
            active: r.get(10)?,
        });
    }

    if !maybe_print_json(sub.get_flag("json"), false, &data)? {
        let table_rows = data
            .iter()
            .map(|s| {
                vec![
                    s.id.to_string(),
                    s.account.clone(),
                    s.program.clone(),
                    s.periodicity.clone(),
                    s.cycle_value.clone(),
                    s.cycle_miles.to_string(),
                    s.fixed_cpm.clone(),
                    s.start_date.clone(),
                    s.renewal_date.clone(),
                    s.end_date.clone(),
                    if s.active { "yes".into() } else { "no".into() },
                ]
            })
            .collect();
        println!(
            "{}",
            pretty_table(
                &[
                    "Id", "Account", "Program", "Cycle", "Value", "Miles", "CPM", "Start",
                    "Renewal", "End", "Active",
                ],
                table_rows,
            )
        );
    }
    Ok(())
}
