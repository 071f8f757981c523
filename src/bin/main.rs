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

use clap::{Parser, Subcommand, ValueEnum};
use csv::{ReaderBuilder, Trim, Writer};
use loyalty_ledger::{CustomerId, Ledger, LedgerConfig, TransactionKind, api};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Loyalty Points Service - Track and move customer point balances
///
/// Serves the ledger over HTTP, or applies a CSV batch of accruals and
/// redemptions and prints the resulting balances.
#[derive(Parser, Debug)]
#[command(name = "loyalty-ledger")]
#[command(about = "A loyalty points ledger service", long_about = None)]
struct Args {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "LOYALTY_LOG_FORMAT", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the JSON API
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0:8081", env = "LOYALTY_BIND")]
        bind: String,

        /// Require accounts to exist before accruing or redeeming
        #[arg(long, env = "LOYALTY_STRICT_ACCOUNTS")]
        strict_accounts: bool,
    },
    /// Apply a CSV batch and print final balances
    ///
    /// Expected format: customer,kind,points,reason
    /// Example: loyalty-ledger import batch.csv > balances.csv
    Import {
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Initialize tracing with the LOYALTY_LOG environment variable.
///
/// Defaults to "info" if LOYALTY_LOG is not set. Logs go to stderr so the
/// import output on stdout stays clean.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_env("LOYALTY_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

fn main() {
    let args = Args::parse();
    init_tracing(args.log_format);

    let result = match args.command {
        Command::Serve {
            bind,
            strict_accounts,
        } => serve(&bind, strict_accounts),
        Command::Import { input } => import(&input),
    };

    if let Err(e) = result {
        error!("{e}");
        process::exit(1);
    }
}

fn serve(bind: &str, strict_accounts: bool) -> Result<(), String> {
    let config = LedgerConfig {
        auto_create_accounts: !strict_accounts,
    };
    let ledger = Arc::new(Ledger::with_config(config));

    let runtime = tokio::runtime::Runtime::new().map_err(|e| format!("Error starting runtime: {e}"))?;
    runtime.block_on(async {
        let listener = TcpListener::bind(bind)
            .await
            .map_err(|e| format!("Error binding '{bind}': {e}"))?;
        info!(%bind, strict_accounts, "loyalty points service listening");
        axum::serve(listener, api::router(ledger))
            .await
            .map_err(|e| format!("Server error: {e}"))
    })
}

fn import(input: &Path) -> Result<(), String> {
    let file = File::open(input).map_err(|e| format!("Error opening file '{}': {}", input.display(), e))?;
    let ledger = process_batch(BufReader::new(file)).map_err(|e| format!("Error processing batch: {e}"))?;
    write_balances(&ledger, std::io::stdout()).map_err(|e| format!("Error writing output: {e}"))
}

/// Raw CSV record matching the batch format.
///
/// Fields: `customer, kind, points, reason`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    customer: String,
    kind: String,
    points: i64,
    #[serde(default)]
    reason: Option<String>,
}

impl CsvRecord {
    fn kind(&self) -> Option<TransactionKind> {
        match self.kind.to_lowercase().as_str() {
            "accrual" | "accrue" | "add" => Some(TransactionKind::Accrual),
            "redemption" | "redeem" => Some(TransactionKind::Redemption),
            _ => None,
        }
    }
}

/// Output row.
#[derive(Debug, Serialize)]
struct BalanceRecord<'a> {
    customer: &'a str,
    points: u64,
}

/// Applies a CSV batch to a fresh ledger.
///
/// Rows are streamed, so arbitrarily large files are fine. Malformed rows and
/// rejected operations (invalid amount, insufficient balance) are skipped and
/// logged at debug level.
///
/// # CSV Format
///
/// ```csv
/// customer,kind,points,reason
/// cust-001,accrual,100,signup
/// cust-001,redemption,30,reward
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the header is unreadable.
pub fn process_batch<R: Read>(reader: R) -> Result<Ledger, csv::Error> {
    let ledger = Ledger::new();

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true) // reason column may be absent
        .has_headers(true)
        .from_reader(reader);

    let mut applied = 0usize;
    let mut skipped = 0usize;
    for (row, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                debug!(row, error = %e, "skipping malformed row");
                skipped += 1;
                continue;
            }
        };
        let Some(kind) = record.kind() else {
            debug!(row, kind = %record.kind, "skipping unknown transaction kind");
            skipped += 1;
            continue;
        };

        let customer_id = CustomerId::from(record.customer.as_str());
        let reason = record.reason.as_deref().filter(|r| !r.is_empty());
        let outcome = match kind {
            TransactionKind::Accrual => ledger.accrue(&customer_id, record.points, reason),
            TransactionKind::Redemption => ledger.redeem(&customer_id, record.points, reason),
        };
        match outcome {
            Ok(_) => applied += 1,
            Err(e) => {
                debug!(row, customer = %customer_id, error = %e, "skipping rejected transaction");
                skipped += 1;
            }
        }
    }

    info!(applied, skipped, "batch applied");
    Ok(ledger)
}

/// Writes `customer,points` rows for every account, sorted by customer.
pub fn write_balances<W: Write>(ledger: &Ledger, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for customer_id in ledger.customers() {
        let balance = ledger.get_balance(&customer_id);
        wtr.serialize(BalanceRecord {
            customer: customer_id.as_str(),
            points: balance.points,
        })?;
    }

    wtr.flush()?;
    Ok(())
}
