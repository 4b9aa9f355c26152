// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use csv::{ReaderBuilder, Trim, Writer};
use ledger_store_rs::settings::{BUDGET_GOAL, NUMBER_ENTRY_MODE};
use ledger_store_rs::{
    BackupDocument, Engine, EntryKind, LedgerError, LedgerViews, MovementKind, NameKind,
    NewMovement, NumberEntryMode, Settings, Store, StoreOptions,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Ledger Store - keep a personal ledger in a local file
///
/// Records movements against banks and categories, keeps names consistent
/// when they are renamed or removed, and prints balance summaries.
#[derive(Parser, Debug)]
#[command(name = "ledger-store")]
#[command(about = "A local bookkeeping ledger", long_about = None)]
struct Args {
    /// Configuration file, without extension (optional)
    #[arg(long, default_value = "ledger-store", env = "LEDGER_STORE_CONFIG")]
    config: String,

    /// Store snapshot file
    #[arg(long, value_name = "FILE")]
    store: Option<PathBuf>,

    /// Settings file
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Log level used when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,

    /// Longest wait for the store lock, in milliseconds
    #[arg(long)]
    lock_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record a movement
    Add {
        /// income, expense or initial
        kind: EntryKind,
        concept: String,
        /// Amount as typed, read with the configured number entry mode
        amount: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        bank: Option<String>,
        /// Movement date (YYYY-MM-DD), today if omitted
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Print every movement as CSV
    List,
    /// Print per-bank balances as CSV
    Summary,
    /// Rename a category or bank everywhere
    Rename {
        kind: NameArg,
        old: String,
        new: String,
    },
    /// Remove a category or bank, moving its references to the placeholder
    Remove { kind: NameArg, name: String },
    /// Import movements from CSV (date,concept,amount,type,category,bank)
    ImportCsv {
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },
    /// Write a JSON backup to FILE, or stdout
    Export {
        #[arg(value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Replace the whole ledger with a JSON backup
    Import {
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },
    /// Set a configuration value
    Set { key: String, value: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum NameArg {
    Category,
    Bank,
}

impl From<NameArg> for NameKind {
    fn from(arg: NameArg) -> Self {
        match arg {
            NameArg::Category => NameKind::Category,
            NameArg::Bank => NameKind::Bank,
        }
    }
}

/// Layered configuration: defaults, then the optional file, then
/// `LEDGER_STORE_*` variables, then command-line flags.
#[derive(Debug, Deserialize)]
struct AppConfig {
    store: PathBuf,
    settings: PathBuf,
    log_level: String,
    lock_timeout_ms: u64,
}

fn load_config(args: &Args) -> Result<AppConfig, config::ConfigError> {
    let mut app: AppConfig = config::Config::builder()
        .set_default("store", "ledger-store.json")?
        .set_default("settings", "ledger-settings.json")?
        .set_default("log_level", "info")?
        .set_default("lock_timeout_ms", 5_000_i64)?
        .add_source(config::File::with_name(&args.config).required(false))
        .add_source(config::Environment::with_prefix("LEDGER_STORE"))
        .build()?
        .try_deserialize()?;

    if let Some(store) = &args.store {
        app.store = store.clone();
    }
    if let Some(settings) = &args.settings {
        app.settings = settings.clone();
    }
    if let Some(level) = &args.log_level {
        app.log_level = level.clone();
    }
    if let Some(timeout) = args.lock_timeout_ms {
        app.lock_timeout_ms = timeout;
    }
    Ok(app)
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

fn main() {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "ledger_store_rs={level},ledger_store={level}",
                level = config.log_level
            ))
        }))
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run(args.command, &config) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(command: Command, config: &AppConfig) -> Result<(), CliError> {
    let options = StoreOptions::file(&config.store)
        .lock_timeout(Duration::from_millis(config.lock_timeout_ms));
    let store = Arc::new(Store::open(options)?);
    let settings = Arc::new(Settings::load(&config.settings)?);
    let engine = Engine::new(store, Arc::clone(&settings));
    debug!(store = %config.store.display(), "store opened");

    match command {
        Command::Add {
            kind,
            concept,
            amount,
            category,
            bank,
            date,
        } => {
            let date = date.unwrap_or_else(|| engine.now().date());
            let mut movement =
                NewMovement::from_text(concept, &amount, settings.number_entry_mode(), kind, date)?;
            movement.category = category;
            movement.bank = bank;
            let outcome = engine.add_movement(movement)?;
            match outcome.views() {
                Ok(views) => println!(
                    "added movement {} (global balance {})",
                    outcome.value,
                    ledger_store_rs::numeral::format_amount(views.global_balance)
                ),
                Err(error) => println!("added movement {} (balances unavailable: {error})", outcome.value),
            }
        }
        Command::List => write_movements(&engine, io::stdout().lock())?,
        Command::Summary => write_summary(&engine.views()?, io::stdout().lock())?,
        Command::Rename { kind, old, new } => {
            let report = engine.rename(kind.into(), &old, &new)?.value;
            println!(
                "renamed {} \"{}\" to \"{}\": {} movements, {} rules",
                report.kind, report.from, report.to, report.movements, report.rules
            );
        }
        Command::Remove { kind, name } => {
            let report = engine.remove(kind.into(), &name)?.value;
            println!(
                "removed {} \"{}\": {} movements, {} rules moved to \"{}\"",
                report.kind, report.from, report.movements, report.rules, report.to
            );
        }
        Command::ImportCsv { input } => {
            let file = File::open(&input)?;
            let imported = import_csv(&engine, BufReader::new(file))?;
            println!("imported {} movements", imported);
        }
        Command::Export { output } => {
            let json = engine.export_backup()?.to_json()?;
            match output {
                Some(path) => fs::write(path, json)?,
                None => println!("{}", json),
            }
        }
        Command::Import { input } => {
            let document = BackupDocument::from_json(&fs::read_to_string(&input)?)?;
            let summary = engine.import_backup(document)?.value;
            settings.save(&config.settings)?;
            println!(
                "restored {} movements, {} categories, {} banks",
                summary.movements, summary.categories, summary.banks
            );
        }
        Command::Set { key, value } => {
            apply_setting(&settings, key, value)?;
            settings.save(&config.settings)?;
        }
    }

    Ok(())
}

/// Stores a setting, checking the keys the ledger itself reads.
fn apply_setting(settings: &Settings, key: String, value: String) -> Result<(), LedgerError> {
    match key.as_str() {
        NUMBER_ENTRY_MODE => settings.set_number_entry_mode(value.parse::<NumberEntryMode>()?),
        BUDGET_GOAL => {
            let goal = ledger_store_rs::numeral::parse_decimal(&value).ok_or_else(|| {
                LedgerError::Validation(format!("budget goal \"{value}\" is not a number"))
            })?;
            settings.set_budget_goal(goal)?;
        }
        _ => settings.set(key, value),
    }
    Ok(())
}

/// Raw CSV row of a movement import.
///
/// Fields: `date, concept, amount, type, category, bank`
#[derive(Debug, Deserialize)]
struct CsvMovement {
    date: NaiveDate,
    concept: String,
    amount: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    bank: Option<String>,
}

impl CsvMovement {
    fn into_movement(self, mode: NumberEntryMode) -> Result<NewMovement, LedgerError> {
        let kind: EntryKind = self.kind.parse()?;
        let mut movement = NewMovement::from_text(self.concept, &self.amount, mode, kind, self.date)?;
        movement.category = self.category;
        movement.bank = self.bank;
        Ok(movement)
    }
}

/// Imports movements from a CSV reader, one command per row.
///
/// Amounts are read with the configured number entry mode. Malformed rows
/// and rejected movements are logged and skipped.
///
/// # Example
///
/// ```csv
/// date,concept,amount,type,category,bank
/// 2025-03-01,Salary,5000,income,Salary,BankA
/// 2025-03-02,Rent,"1.000,50",expense,Home,BankA
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails.
fn import_csv<R: Read>(engine: &Engine, reader: R) -> Result<usize, csv::Error> {
    let mode = engine.settings().number_entry_mode();
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    let mut imported = 0;
    for (line, result) in rdr.deserialize::<CsvMovement>().enumerate() {
        let row = line + 2;
        let record = match result {
            Ok(record) => record,
            Err(e) if e.is_io_error() => return Err(e),
            Err(e) => {
                warn!(row, error = %e, "skipping malformed row");
                continue;
            }
        };
        match record
            .into_movement(mode)
            .and_then(|movement| engine.add_movement(movement))
        {
            Ok(_) => imported += 1,
            Err(e) => warn!(row, error = %e, "skipping movement"),
        }
    }

    Ok(imported)
}

#[derive(Serialize)]
struct MovementRow<'a> {
    id: u64,
    date: NaiveDate,
    concept: &'a str,
    kind: MovementKind,
    category: &'a str,
    bank: &'a str,
    amount: Decimal,
    commission: Decimal,
}

/// Writes every movement as CSV, oldest first.
fn write_movements<W: Write>(engine: &Engine, writer: W) -> Result<(), CliError> {
    let mut wtr = Writer::from_writer(writer);
    for movement in engine.movements()? {
        wtr.serialize(MovementRow {
            id: movement.id.map(|id| id.0).unwrap_or_default(),
            date: movement.date.date(),
            concept: &movement.concept,
            kind: movement.kind,
            category: &movement.category,
            bank: &movement.bank,
            amount: movement.amount.round_dp(2),
            commission: movement.commission.round_dp(2),
        })?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes per-bank balances as CSV.
///
/// # CSV Format
///
/// Columns: `bank, initial, income, expense, commission, final_balance`
///
/// ```csv
/// bank,initial,income,expense,commission,final_balance
/// BankA,0,5000,1000,3.00,4000
/// ```
fn write_summary<W: Write>(views: &LedgerViews, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for bank in &views.banks {
        wtr.serialize(bank)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_store_rs::settings::EXCHANGE_RATE;
    use rust_decimal_macros::dec;
    use std::io::Cursor;

    const HEADER: &str = "date,concept,amount,type,category,bank\n";

    #[test]
    fn import_simple_rows() {
        let engine = Engine::in_memory();
        let csv = format!(
            "{HEADER}2025-03-01,Salary,5000,income,Salary,BankA\n\
             2025-03-02,Rent,1000,expense,Home,BankA\n"
        );

        let imported = import_csv(&engine, Cursor::new(csv)).unwrap();

        assert_eq!(imported, 2);
        let views = engine.views().unwrap();
        assert_eq!(views.global_balance, dec!(4000));
        assert_eq!(views.total_commission(), dec!(3.00));
    }

    #[test]
    fn import_reads_regional_amounts() {
        let engine = Engine::in_memory();
        let csv = format!("{HEADER}2025-03-02,Rent,\"1.000,50\",expense,Home,BankA\n");

        import_csv(&engine, Cursor::new(csv)).unwrap();

        assert_eq!(engine.movements().unwrap()[0].amount, dec!(1000.50));
    }

    #[test]
    fn import_skips_bad_rows() {
        let engine = Engine::in_memory();
        let csv = format!(
            "{HEADER}2025-03-01,Salary,5000,income,,BankA\n\
             not-a-date,Broken,1,income,,\n\
             2025-03-01,Refund,-5,income,,\n\
             2025-03-01,Gift,10,donation,,\n\
             2025-03-04,Coffee,3,expense,Food,\n"
        );

        let imported = import_csv(&engine, Cursor::new(csv)).unwrap();

        assert_eq!(imported, 2);
        let movements = engine.movements().unwrap();
        assert_eq!(movements[0].category, ledger_store_rs::UNCATEGORIZED);
        assert_eq!(movements[1].bank, ledger_store_rs::NO_BANK);
    }

    #[test]
    fn summary_csv_has_one_row_per_bank() {
        let engine = Engine::in_memory();
        let csv = format!(
            "{HEADER}2025-03-01,Salary,5000,income,Salary,BankA\n\
             2025-03-02,Rent,1000,expense,Home,BankA\n\
             2025-03-03,Bonus,10,income,Salary,BankB\n"
        );
        import_csv(&engine, Cursor::new(csv)).unwrap();

        let mut output = Vec::new();
        write_summary(&engine.views().unwrap(), &mut output).unwrap();

        let output = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], "bank,initial,income,expense,commission,final_balance");
        assert_eq!(lines[1], "BankA,0,5000,1000,3.00,4000");
        assert_eq!(lines[2], "BankB,0,10,0,0,10");
    }

    #[test]
    fn list_writes_movements_in_date_order() {
        let engine = Engine::in_memory();
        let csv = format!(
            "{HEADER}2025-03-09,Late,1,income,,A\n\
             2025-03-01,Early,2,income,,A\n"
        );
        import_csv(&engine, Cursor::new(csv)).unwrap();

        let mut output = Vec::new();
        write_movements(&engine, &mut output).unwrap();

        let output = String::from_utf8(output).unwrap();
        let concepts: Vec<&str> = output
            .lines()
            .skip(1)
            .map(|line| line.split(',').nth(2).unwrap())
            .collect();
        assert_eq!(concepts, vec!["Early", "Late"]);
    }

    #[test]
    fn settings_are_checked_for_known_keys() {
        let settings = Settings::new();
        apply_setting(&settings, NUMBER_ENTRY_MODE.into(), "literal".into()).unwrap();
        assert_eq!(settings.number_entry_mode(), NumberEntryMode::Literal);

        assert!(apply_setting(&settings, BUDGET_GOAL.into(), "lots".into()).is_err());
        apply_setting(&settings, BUDGET_GOAL.into(), "1500".into()).unwrap();
        assert_eq!(settings.budget_goal(), Some(dec!(1500)));

        apply_setting(&settings, EXCHANGE_RATE.into(), "36,5".into()).unwrap();
        assert_eq!(settings.exchange_rate().as_deref(), Some("36,5"));
    }
}
