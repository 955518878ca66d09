// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use clap::{arg, value_parser, Command};

pub fn build_cli() -> Command {
    Command::new("milebook")
        .about("Airline-miles ledger: purchases, club subscriptions and CPM tracking")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand(Command::new("init").about("Initialize the database"))
        .subcommand(
            Command::new("account")
                .about("Manage accounts")
                .subcommand(
                    Command::new("add")
                        .about("Register an account")
                        .arg(arg!(--name <NAME> "Display name").required(true))
                        .arg(arg!(--"tax-id" <TAXID> "11-digit national tax id").required(true))
                        .arg(arg!(--management <KIND> "own|client").required(true)),
                )
                .subcommand(
                    Command::new("list")
                        .about("List accounts")
                        .arg(arg!(--json "Print as JSON")),
                ),
        )
        .subcommand(
            Command::new("program")
                .about("Manage loyalty programs")
                .subcommand(
                    Command::new("add")
                        .about("Register a program")
                        .arg(arg!(--name <NAME>).required(true))
                        .arg(arg!(--kind <KIND> "airline|bank|broker").required(true)),
                )
                .subcommand(Command::new("list").about("List programs")),
        )
        .subcommand(
            Command::new("tx")
                .about("Record and list transactions")
                .subcommand(
                    Command::new("add")
                        .about("Record a simple purchase or organic accrual")
                        .arg(arg!(--account <ACCOUNT>).required(true))
                        .arg(arg!(--program <PROGRAM>).required(true))
                        .arg(arg!(--miles <MILES> "Base miles").required(true))
                        .arg(arg!(--cost <COST> "Total cost; 0 records an organic entry").required(true))
                        .arg(arg!(--bonus <PERCENT> "Bonus percent").required(false))
                        .arg(arg!(--date <DATE> "Transaction date YYYY-MM-DD").required(false))
                        .arg(arg!(--note <NOTE>).required(false)),
                )
                .subcommand(
                    Command::new("transfer")
                        .about("Record a bonused transfer with organic and paid lots")
                        .arg(arg!(--account <ACCOUNT>).required(true))
                        .arg(arg!(--from <PROGRAM> "Source program").required(true))
                        .arg(arg!(--to <PROGRAM> "Destination program").required(true))
                        .arg(arg!(--miles <MILES> "Base miles").required(true))
                        .arg(arg!(--bonus <PERCENT> "Bonus percent").required(true))
                        .arg(arg!(--"organic-qty" <MILES>).required(true))
                        .arg(arg!(--"organic-cpm" <CPM>).required(true))
                        .arg(arg!(--"paid-qty" <MILES>).required(true))
                        .arg(arg!(--"paid-cost" <COST>).required(true))
                        .arg(arg!(--date <DATE>).required(false))
                        .arg(arg!(--note <NOTE>).required(false)),
                )
                .subcommand(
                    Command::new("club")
                        .about("Record a one-off entry inside an active subscription")
                        .arg(arg!(--subscription <ID>).required(true))
                        .arg(arg!(--account <ACCOUNT>).required(true))
                        .arg(arg!(--program <PROGRAM>).required(true))
                        .arg(arg!(--miles <MILES>).required(true))
                        .arg(arg!(--cost <COST>).required(true))
                        .arg(arg!(--bonus <PERCENT>).required(false))
                        .arg(arg!(--date <DATE>).required(false))
                        .arg(arg!(--note <NOTE>).required(false)),
                )
                .subcommand(
                    Command::new("list")
                        .about("List transactions")
                        .arg(arg!(--account <ACCOUNT>).required(false))
                        .arg(arg!(--program <PROGRAM>).required(false))
                        .arg(
                            arg!(--limit <N>)
                                .required(false)
                                .value_parser(value_parser!(usize)),
                        )
                        .arg(arg!(--json "Print as JSON"))
                        .arg(arg!(--jsonl "Print as JSON lines")),
                ),
        )
        .subcommand(
            Command::new("sub")
                .about("Manage club subscriptions")
                .subcommand(
                    Command::new("add")
                        .about("Sign a club contract")
                        .arg(arg!(--account <ACCOUNT>).required(true))
                        .arg(arg!(--program <PROGRAM>).required(true))
                        .arg(arg!(--periodicity <CYCLE> "monthly|annual").required(true))
                        .arg(arg!(--value <VALUE> "Cycle value").required(true))
                        .arg(arg!(--miles <MILES> "Guaranteed miles per cycle").required(true))
                        .arg(arg!(--renewal <DATE> "Renewal date YYYY-MM-DD").required(true))
                        .arg(arg!(--start <DATE> "Start date, defaults to today").required(false)),
                )
                .subcommand(
                    Command::new("correct")
                        .about("Replace the active contract with corrected terms")
                        .arg(arg!(--account <ACCOUNT>).required(true))
                        .arg(arg!(--program <PROGRAM>).required(true))
                        .arg(arg!(--periodicity <CYCLE> "monthly|annual").required(true))
                        .arg(arg!(--value <VALUE>).required(true))
                        .arg(arg!(--miles <MILES>).required(true))
                        .arg(arg!(--renewal <DATE>).required(true))
                        .arg(arg!(--start <DATE>).required(false)),
                )
                .subcommand(
                    Command::new("credit")
                        .about("Apply the contract credit for a reference period")
                        .arg(arg!(--subscription <ID>).required(true))
                        .arg(arg!(--period <PERIOD> "YYYY-MM").required(true)),
                )
                .subcommand(
                    Command::new("credit-due")
                        .about("Apply the period credit to every active subscription")
                        .arg(arg!(--period <PERIOD> "YYYY-MM").required(true)),
                )
                .subcommand(
                    Command::new("list")
                        .about("List subscriptions")
                        .arg(arg!(--account <ACCOUNT>).required(false))
                        .arg(arg!(--json "Print as JSON")),
                ),
        )
        .subcommand(
            Command::new("undo")
                .about("Two-step deletion of the most recent transaction")
                .subcommand(
                    Command::new("preview")
                        .about("Show what would be deleted, without touching anything")
                        .arg(arg!(--account <ACCOUNT>).required(true))
                        .arg(arg!(--program <PROGRAM>).required(true)),
                )
                .subcommand(
                    Command::new("confirm")
                        .about("Delete the previewed transaction")
                        .arg(arg!(--account <ACCOUNT>).required(true))
                        .arg(arg!(--program <PROGRAM>).required(true))
                        .arg(arg!(--transaction <ID> "Id shown by the preview").required(true)),
                ),
        )
        .subcommand(
            Command::new("checkpoint")
                .about("Persist and list CPM snapshots")
                .subcommand(
                    Command::new("create")
                        .about("Confirm the current position as a snapshot")
                        .arg(arg!(--account <ACCOUNT>).required(true))
                        .arg(arg!(--program <PROGRAM>).required(true))
                        .arg(arg!(--kind <KIND> "monthly|manual").required(true))
                        .arg(arg!(--period <PERIOD> "YYYY-MM, required for monthly").required(false))
                        .arg(arg!(--note <NOTE>).required(false)),
                )
                .subcommand(
                    Command::new("list")
                        .about("List snapshots for a pair")
                        .arg(arg!(--account <ACCOUNT>).required(true))
                        .arg(arg!(--program <PROGRAM>).required(true))
                        .arg(arg!(--json "Print as JSON")),
                ),
        )
        .subcommand(
            Command::new("cpm")
                .about("Inspect and adjust the weighted-average CPM")
                .subcommand(
                    Command::new("show")
                        .about("Current position from the latest snapshot plus the delta")
                        .arg(arg!(--account <ACCOUNT>).required(true))
                        .arg(arg!(--program <PROGRAM>).required(true))
                        .arg(arg!(--json "Print as JSON")),
                )
                .subcommand(
                    Command::new("target")
                        .about("Compute what reaching a target CPM would take")
                        .arg(arg!(--account <ACCOUNT>).required(true))
                        .arg(arg!(--program <PROGRAM>).required(true))
                        .arg(arg!(--cpm <TARGET>).required(true)),
                )
                .subcommand(
                    Command::new("adjust")
                        .about("Apply a cost or free-miles adjustment")
                        .arg(arg!(--account <ACCOUNT>).required(true))
                        .arg(arg!(--program <PROGRAM>).required(true))
                        .arg(arg!(--kind <KIND> "cost|miles").required(true))
                        .arg(arg!(--value <VALUE>).required(true))
                        .arg(arg!(--note <NOTE>).required(false)),
                ),
        )
        .subcommand(
            Command::new("report")
                .about("Balance and health reports")
                .subcommand(
                    Command::new("balance")
                        .about("Per-program miles, cost and average CPM")
                        .arg(arg!(--account <ACCOUNT>).required(true))
                        .arg(arg!(--json "Print as JSON")),
                )
                .subcommand(
                    Command::new("overview")
                        .about("Checkpoint health across the account's programs")
                        .arg(arg!(--account <ACCOUNT>).required(true))
                        .arg(arg!(--json "Print as JSON")),
                ),
        )
        .subcommand(
            Command::new("export")
                .about("Export ledger data")
                .subcommand(
                    Command::new("transactions")
                        .arg(arg!(--format <FMT> "csv|json").required(true))
                        .arg(arg!(--out <FILE>).required(true)),
                )
                .subcommand(
                    Command::new("checkpoints")
                        .arg(arg!(--format <FMT> "csv|json").required(true))
                        .arg(arg!(--out <FILE>).required(true)),
                ),
        )
        .subcommand(Command::new("doctor").about("Audit stored derivations and invariants"))
}
