//! Transaction normalization.
//!
//! Cleans and types one raw row stream into [`Transaction`] values,
//! accumulating row-level problems into a [`ValidationReport`] instead of
//! aborting the whole run.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{RowError, ValidationReport};
use crate::jurisdictions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SalesChannel {
    Direct,
    Marketplace,
}

/// A loosely-typed row as received from the caller's column-mapped CSV
/// ingestion. The engine never parses raw CSV itself.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRow {
    #[serde(default)]
    pub transaction_date: Option<String>,
    #[serde(default)]
    pub jurisdiction_code: Option<String>,
    #[serde(default)]
    pub sales_amount: Option<String>,
    #[serde(default)]
    pub sales_channel: Option<String>,
    #[serde(default)]
    pub is_taxable: Option<bool>,
    #[serde(default)]
    pub exempt_amount: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

/// A normalized, immutable transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_date: NaiveDate,
    pub jurisdiction_code: String,
    pub sales_amount: Decimal,
    pub sales_channel: SalesChannel,
    pub is_taxable: bool,
    pub exempt_amount: Decimal,
    pub transaction_id: Option<String>,
    /// Position in the original input stream; used for deterministic
    /// tie-breaking among same-day transactions and for stable result
    /// ordering.
    pub input_index: usize,
}

impl Transaction {
    /// Exempt-amount-adjusted taxable portion of this transaction.
    pub fn taxable_amount(&self) -> Decimal {
        self.sales_amount - self.exempt_amount
    }
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

fn parse_date(raw: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// Normalizes a finite, restartable sequence of raw rows into
/// [`Transaction`]s, dropping and reporting invalid rows rather than
/// aborting the run.
///
/// `as_of_date` bounds future-dated rows (`FutureDateError`).
pub fn normalize<I>(raw_rows: I, as_of_date: NaiveDate, report: &mut ValidationReport) -> Vec<Transaction>
where
    I: IntoIterator<Item = RawRow>,
{
    let mut out = Vec::new();
    for (index, row) in raw_rows.into_iter().enumerate() {
        match normalize_row(&row, as_of_date, index) {
            Ok((txn, warnings)) => {
                for w in warnings {
                    report.push_warning(index, w.0, w.1);
                }
                out.push(txn);
            }
            Err(err) => report.push_error(index, field_for(&err), &err),
        }
    }
    out
}

fn field_for(err: &RowError) -> &'static str {
    match err {
        RowError::MissingField(_, f) => f,
        RowError::UnknownJurisdiction(..) => "jurisdiction_code",
        RowError::FutureDate(..) => "transaction_date",
        RowError::NegativeAmount(_) => "sales_amount",
        RowError::ExemptExceedsSales(_) => "exempt_amount",
        RowError::UnparseableDate(..) => "transaction_date",
        RowError::InvalidNumber(_, f) => f,
    }
}

fn normalize_row(
    row: &RawRow,
    as_of_date: NaiveDate,
    index: usize,
) -> Result<(Transaction, Vec<(&'static str, String)>), RowError> {
    let mut warnings = Vec::new();

    let date_str = row
        .transaction_date
        .as_deref()
        .ok_or(RowError::MissingField(index, "transaction_date"))?;
    let jurisdiction_raw = row
        .jurisdiction_code
        .as_deref()
        .ok_or(RowError::MissingField(index, "jurisdiction_code"))?;
    let amount_str = row
        .sales_amount
        .as_deref()
        .ok_or(RowError::MissingField(index, "sales_amount"))?;
    let channel_raw = row
        .sales_channel
        .as_deref()
        .ok_or(RowError::MissingField(index, "sales_channel"))?;

    let transaction_date = parse_date(date_str)
        .ok_or_else(|| RowError::UnparseableDate(index, date_str.to_string()))?;
    if transaction_date > as_of_date {
        return Err(RowError::FutureDate(index, transaction_date));
    }

    let jurisdiction_code = jurisdiction_raw.to_uppercase();
    if !jurisdictions::is_known(&jurisdiction_code) {
        return Err(RowError::UnknownJurisdiction(index, jurisdiction_code));
    }

    let sales_amount: Decimal = amount_str
        .parse()
        .map_err(|_| RowError::InvalidNumber(index, "sales_amount"))?;
    if sales_amount < Decimal::ZERO {
        return Err(RowError::NegativeAmount(index));
    }
    if sales_amount == Decimal::ZERO {
        warnings.push(("sales_amount", "zero-amount transaction".to_string()));
    }

    let sales_channel = if channel_raw.eq_ignore_ascii_case("marketplace") {
        SalesChannel::Marketplace
    } else {
        if !channel_raw.eq_ignore_ascii_case("direct") {
            warnings.push((
                "sales_channel",
                format!("unrecognized channel {:?}, treated as direct", channel_raw),
            ));
        }
        SalesChannel::Direct
    };

    let is_taxable = row.is_taxable.unwrap_or(true);

    // Three-tier taxability resolution: explicit
    // exempt_amount wins; else is_taxable=false exempts the whole amount;
    // else fully taxable.
    let exempt_amount: Decimal = match row.exempt_amount.as_deref() {
        Some(raw) if !raw.is_empty() => raw
            .parse()
            .map_err(|_| RowError::InvalidNumber(index, "exempt_amount"))?,
        _ => {
            if is_taxable {
                Decimal::ZERO
            } else {
                sales_amount
            }
        }
    };
    if exempt_amount > sales_amount {
        return Err(RowError::ExemptExceedsSales(index));
    }

    Ok((
        Transaction {
            transaction_date,
            jurisdiction_code,
            sales_amount,
            sales_channel,
            is_taxable,
            exempt_amount,
            transaction_id: row.transaction_id.clone(),
            input_index: index,
        },
        warnings,
    ))
}
