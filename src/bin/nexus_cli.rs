//! Thin file-based caller for the nexus engine. The core takes no I/O
//! of its own. Reads a transactions CSV, a rules JSON file, and an
//! optional physical-nexus JSON file; calls `normalize` then `compute`;
//! prints the resulting `YearResult` table and validation report.
//! Initializes tracing (`tracing_subscriber::registry()...init()`)
//! before any other work.

use std::collections::HashMap;
use std::fs;

use chrono::NaiveDate;
use clap::Parser;
use nexus_engine::config::Config;
use nexus_engine::engine::{self, PhysicalNexusDeclaration, YearRange};
use nexus_engine::errors::ValidationReport;
use nexus_engine::rules::{RuleEntry, RuleRegistry};
use nexus_engine::transactions::RawRow;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "nexus-cli", about = "Computes SALT nexus and liability from a transaction CSV")]
struct Args {
    /// Path to the transactions CSV (overrides NEXUS_TRANSACTIONS_CSV).
    #[arg(long)]
    transactions: Option<String>,

    /// Path to the per-jurisdiction rules JSON file (overrides NEXUS_RULES_PATH).
    #[arg(long)]
    rules: Option<String>,

    /// Path to an optional physical-nexus declarations JSON file.
    #[arg(long)]
    physical_nexus: Option<String>,

    /// Path to write the resulting YearResult table as JSON; stdout if omitted.
    #[arg(long)]
    output: Option<String>,

    /// Calculation-as-of date (YYYY-MM-DD); defaults to today.
    #[arg(long)]
    as_of: Option<String>,
}

fn main() {
    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("warning: {e}, falling back to CLI arguments only");
        Config {
            transactions_csv_path: String::new(),
            rules_path: String::new(),
            physical_nexus_path: None,
            output_path: None,
            log_level: "info".to_string(),
            as_of_date: None,
            year_range_start: None,
            year_range_end: None,
        }
    });

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(config) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(config: Config) -> Result<(), String> {
    let args = Args::parse();

    let transactions_path = args.transactions.unwrap_or(config.transactions_csv_path);
    let rules_path = args.rules.unwrap_or(config.rules_path);
    let physical_nexus_path = args.physical_nexus.or(config.physical_nexus_path);
    let output_path = args.output.or(config.output_path);

    if transactions_path.is_empty() || rules_path.is_empty() {
        return Err("both --transactions and --rules (or their NEXUS_* env equivalents) are required".to_string());
    }

    let as_of_date = match args.as_of {
        Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| format!("invalid --as-of: {e}"))?,
        None => config.as_of_date.unwrap_or_else(today),
    };

    info!(%transactions_path, %rules_path, %as_of_date, "loading engine inputs");

    let registry = load_registry(&rules_path)?;
    let raw_rows = load_transactions(&transactions_path)?;
    let physical = match &physical_nexus_path {
        Some(path) => load_physical_nexus(path)?,
        None => HashMap::new(),
    };

    let mut report = ValidationReport::default();
    let transactions = nexus_engine::normalize(raw_rows, as_of_date, &mut report);

    let year_range = match (config.year_range_start, config.year_range_end) {
        (Some(start), Some(end)) => YearRange { start, end },
        _ => YearRange::from_transactions(&transactions, as_of_date),
    };

    let results = engine::compute(&transactions, &registry, &physical, as_of_date, year_range, None, &mut report);

    info!(result_count = results.len(), error_count = report.error_count(), "computation complete");

    let output = serde_json::json!({
        "results": results,
        "validation": report,
    });
    let rendered = serde_json::to_string_pretty(&output).map_err(|e| format!("failed to serialize results: {e}"))?;

    match output_path {
        Some(path) => fs::write(&path, rendered).map_err(|e| format!("failed to write {path}: {e}"))?,
        None => println!("{rendered}"),
    }

    Ok(())
}

fn today() -> NaiveDate {
    // The core never reads the wall clock; this is the one place the CLI
    // harness is allowed to, since it is outside the core and only used
    // as a default.
    chrono::Local::now().date_naive()
}

fn load_registry(path: &str) -> Result<RuleRegistry, String> {
    let raw = fs::read_to_string(path).map_err(|e| format!("failed to read {path}: {e}"))?;
    let entries: HashMap<String, RuleEntry> =
        serde_json::from_str(&raw).map_err(|e| format!("failed to parse {path}: {e}"))?;
    RuleRegistry::load(entries).map_err(|e| format!("invalid rule configuration: {e}"))
}

fn load_physical_nexus(path: &str) -> Result<HashMap<String, PhysicalNexusDeclaration>, String> {
    let raw = fs::read_to_string(path).map_err(|e| format!("failed to read {path}: {e}"))?;
    serde_json::from_str(&raw).map_err(|e| format!("failed to parse {path}: {e}"))
}

fn load_transactions(path: &str) -> Result<Vec<RawRow>, String> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| format!("failed to open {path}: {e}"))?;
    reader
        .deserialize()
        .collect::<Result<Vec<RawRow>, csv::Error>>()
        .map_err(|e| format!("failed to parse {path}: {e}"))
}
