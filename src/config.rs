//! Configuration for the `nexus-cli` demo harness. The engine core itself
//! takes no environment or network settings; this is ambient CLI config
//! only. `dotenv` first, then `std::env` reads with a `thiserror`-derived
//! error for missing or malformed values.

use std::env;

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("environment variable not found: {0}")]
    NotFound(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// CLI harness configuration: where to read input from, where to write
/// results, and the handful of overrides the engine's analysis context
/// exposes (`as_of_date` and the year range).
#[derive(Debug, Clone)]
pub struct Config {
    pub transactions_csv_path: String,
    pub rules_path: String,
    pub physical_nexus_path: Option<String>,
    pub output_path: Option<String>,
    pub log_level: String,
    pub as_of_date: Option<NaiveDate>,
    pub year_range_start: Option<i32>,
    pub year_range_end: Option<i32>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let as_of_date = match env::var("NEXUS_AS_OF_DATE") {
            Ok(raw) => Some(
                NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                    .map_err(|_| ConfigError::Invalid(format!("invalid NEXUS_AS_OF_DATE {raw:?}")))?,
            ),
            Err(_) => None,
        };

        let year_range_start = parse_optional_year("NEXUS_YEAR_RANGE_START")?;
        let year_range_end = parse_optional_year("NEXUS_YEAR_RANGE_END")?;

        Ok(Self {
            transactions_csv_path: env::var("NEXUS_TRANSACTIONS_CSV")
                .map_err(|_| ConfigError::NotFound("NEXUS_TRANSACTIONS_CSV".to_string()))?,
            rules_path: env::var("NEXUS_RULES_PATH")
                .map_err(|_| ConfigError::NotFound("NEXUS_RULES_PATH".to_string()))?,
            physical_nexus_path: env::var("NEXUS_PHYSICAL_NEXUS_PATH").ok(),
            output_path: env::var("NEXUS_OUTPUT_PATH").ok(),
            log_level: env::var("NEXUS_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            as_of_date,
            year_range_start,
            year_range_end,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transactions_csv_path.is_empty() {
            return Err(ConfigError::Invalid("NEXUS_TRANSACTIONS_CSV is empty".to_string()));
        }
        if self.rules_path.is_empty() {
            return Err(ConfigError::Invalid("NEXUS_RULES_PATH is empty".to_string()));
        }
        if let (Some(start), Some(end)) = (self.year_range_start, self.year_range_end) {
            if start > end {
                return Err(ConfigError::Invalid(
                    "NEXUS_YEAR_RANGE_START is after NEXUS_YEAR_RANGE_END".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn parse_optional_year(var: &str) -> Result<Option<i32>, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("invalid {var} {raw:?}"))),
        Err(_) => Ok(None),
    }
}
