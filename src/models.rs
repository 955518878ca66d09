// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cost per thousand miles. Zero when no miles back the cost.
pub fn cpm(total_cost: Decimal, miles: i64) -> Decimal {
    if miles > 0 {
        total_cost * Decimal::ONE_THOUSAND / Decimal::from(miles)
    } else {
        Decimal::ZERO
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Management {
    Own,
    Client,
}

impl Management {
    pub fn as_str(&self) -> &'static str {
        match self {
            Management::Own => "own",
            Management::Client => "client",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "own" => Some(Management::Own),
            "client" => Some(Management::Client),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgramKind {
    Airline,
    Bank,
    Broker,
}

impl ProgramKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgramKind::Airline => "airline",
            ProgramKind::Bank => "bank",
            ProgramKind::Broker => "broker",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "airline" => Some(ProgramKind::Airline),
            "bank" => Some(ProgramKind::Bank),
            "broker" => Some(ProgramKind::Broker),
            _ => None,
        }
    }
}

/// How the miles entered the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionMode {
    Purchase,
    Organic,
    Transfer,
    Club,
    Adjustment,
}

impl AcquisitionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionMode::Purchase => "purchase",
            AcquisitionMode::Organic => "organic",
            AcquisitionMode::Transfer => "transfer",
            AcquisitionMode::Club => "club",
            AcquisitionMode::Adjustment => "adjustment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "purchase" => Some(AcquisitionMode::Purchase),
            "organic" => Some(AcquisitionMode::Organic),
            "transfer" => Some(AcquisitionMode::Transfer),
            "club" => Some(AcquisitionMode::Club),
            "adjustment" => Some(AcquisitionMode::Adjustment),
            _ => None,
        }
    }
}

impl fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    Organic,
    Paid,
}

impl BatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchKind::Organic => "organic",
            BatchKind::Paid => "paid",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Periodicity {
    Monthly,
    Annual,
}

impl Periodicity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Periodicity::Monthly => "monthly",
            Periodicity::Annual => "annual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "monthly" => Some(Periodicity::Monthly),
            "annual" => Some(Periodicity::Annual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointKind {
    Monthly,
    Manual,
    Automatic,
}

impl CheckpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointKind::Monthly => "monthly",
            CheckpointKind::Manual => "manual",
            CheckpointKind::Automatic => "automatic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "monthly" => Some(CheckpointKind::Monthly),
            "manual" => Some(CheckpointKind::Manual),
            "automatic" => Some(CheckpointKind::Automatic),
            _ => None,
        }
    }
}

impl fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub tax_id: String,
    pub management: Management,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub id: i64,
    pub name: String,
    pub kind: ProgramKind,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MileTransaction {
    pub id: i64,
    pub account_id: i64,
    pub mode: AcquisitionMode,
    pub source_id: Option<i64>,
    pub dest_id: i64,
    pub ref_program_id: i64,
    pub base_miles: i64,
    pub bonus_percent: Decimal,
    pub credited_miles: i64,
    pub total_cost: Decimal,
    pub cpm_real: Decimal,
    pub tx_date: NaiveDate,
    pub description: String,
    pub note: Option<String>,
    pub subscription_id: Option<i64>,
}

impl MileTransaction {
    /// Unit cost before the bonus dilutes it. Derived on read, never stored.
    pub fn cpm_without_bonus(&self) -> Decimal {
        cpm(self.total_cost, self.base_miles)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionBatch {
    pub id: i64,
    pub transaction_id: i64,
    pub kind: BatchKind,
    pub miles_qty: i64,
    pub lot_cpm: Decimal,
    pub partial_cost: Decimal,
    pub seq: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub account_id: i64,
    pub program_id: i64,
    pub periodicity: Periodicity,
    pub cycle_value: Decimal,
    pub cycle_miles: i64,
    pub fixed_cpm: Decimal,
    pub start_date: NaiveDate,
    pub renewal_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpmCheckpoint {
    pub id: i64,
    pub account_id: i64,
    pub program_id: i64,
    pub checkpoint_date: NaiveDate,
    pub total_miles: i64,
    pub total_cost: Decimal,
    pub cpm_snapshot: Decimal,
    pub kind: CheckpointKind,
    pub period: Option<String>,
    pub covered_from: Option<NaiveDate>,
    pub covered_to: Option<NaiveDate>,
    pub covered_through_tx_id: Option<i64>,
    pub description: String,
}
