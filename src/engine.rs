//! Engine orchestration.
//!
//! Wires rule lookup, threshold detection, exposure aggregation, and
//! interest/penalty calculation into `compute`: groups normalized
//! transactions by jurisdiction, runs the threshold detector once per
//! jurisdiction, then resolves nexus, exposure, and liability for each
//! year in the analysis window. A fixed pipeline of independently
//! testable steps against explicit arguments, not ambient state, with no
//! single calculator class holding it all together.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::{EngineError, ValidationReport};
use crate::exposure::{self, Exposure};
use crate::interest::{self, LiabilityCharges};
use crate::nexus::{self, NexusType, YearNexus};
use crate::rules::{InterestMethod, RuleRegistry};
use crate::transactions::Transaction;

/// A user-supplied physical-nexus declaration for one jurisdiction. The
/// presence flags are informational only. They do not feed any
/// computation, only the emitted audit trail a caller may render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalNexusDeclaration {
    pub nexus_date: NaiveDate,
    #[serde(default)]
    pub has_employees: bool,
    #[serde(default)]
    pub has_inventory: bool,
    #[serde(default)]
    pub has_office: bool,
    #[serde(default)]
    pub has_representatives: bool,
}

/// One (jurisdiction, year) result record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearResult {
    pub jurisdiction: String,
    pub year: i32,
    pub nexus_type: NexusTypeOut,
    pub nexus_date: Option<NaiveDate>,
    pub obligation_start_date: Option<NaiveDate>,
    pub first_nexus_year: Option<i32>,

    pub gross_sales: Decimal,
    pub direct_sales: Decimal,
    pub marketplace_sales: Decimal,
    pub taxable_sales: Decimal,
    pub exempt_sales: Decimal,
    pub exposure_sales: Decimal,

    pub base_tax: Decimal,
    pub interest: Decimal,
    pub penalties: Decimal,
    pub estimated_liability: Decimal,
    pub transaction_count: usize,

    // Audit fields.
    pub interest_method: Option<InterestMethod>,
    pub days_outstanding: i64,
    pub penalty_rate: Option<Decimal>,
    pub first_taxable_sale_date: Option<NaiveDate>,
}

/// Serializable mirror of [`NexusType`] (kept distinct so `nexus.rs` stays
/// free of `serde` concerns it doesn't otherwise need).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NexusTypeOut {
    None,
    Economic,
    Physical,
    Both,
}

impl From<NexusType> for NexusTypeOut {
    fn from(value: NexusType) -> Self {
        match value {
            NexusType::None => NexusTypeOut::None,
            NexusType::Economic => NexusTypeOut::Economic,
            NexusType::Physical => NexusTypeOut::Physical,
            NexusType::Both => NexusTypeOut::Both,
        }
    }
}

impl YearResult {
    fn none(jurisdiction: &str, year: i32) -> Self {
        Self {
            jurisdiction: jurisdiction.to_string(),
            year,
            nexus_type: NexusTypeOut::None,
            nexus_date: None,
            obligation_start_date: None,
            first_nexus_year: None,
            gross_sales: Decimal::ZERO,
            direct_sales: Decimal::ZERO,
            marketplace_sales: Decimal::ZERO,
            taxable_sales: Decimal::ZERO,
            exempt_sales: Decimal::ZERO,
            exposure_sales: Decimal::ZERO,
            base_tax: Decimal::ZERO,
            interest: Decimal::ZERO,
            penalties: Decimal::ZERO,
            estimated_liability: Decimal::ZERO,
            transaction_count: 0,
            interest_method: None,
            days_outstanding: 0,
            penalty_rate: None,
            first_taxable_sale_date: None,
        }
    }
}

/// Inclusive calendar-year range to emit results for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    pub fn years(&self) -> impl Iterator<Item = i32> {
        self.start..=self.end
    }

    /// Derives a range from the transactions present, spanning from the
    /// earliest transaction year through the as-of year, for callers that
    /// don't override the range explicitly.
    pub fn from_transactions(txns: &[Transaction], as_of_date: NaiveDate) -> Self {
        let min_year = txns.iter().map(|t| t.transaction_date.year()).min().unwrap_or(as_of_date.year());
        Self { start: min_year, end: as_of_date.year() }
    }
}

/// Optional cooperative cancellation signal, checked between jurisdictions
/// and before each year's result is emitted.
pub type CancellationCheck<'a> = &'a dyn Fn() -> bool;

/// Computes nexus, exposure, and liability for every (jurisdiction, year)
/// pair in `year_range`.
///
/// `transactions` must already be normalized. A cancelled run (the
/// `cancelled` callback returning `true`) returns whatever jurisdictions
/// were completed so far; the in-progress jurisdiction's partial results
/// are discarded.
///
/// A jurisdiction referenced by a transaction or a physical-nexus
/// declaration but absent from `rules` is skipped and recorded in
/// `report` as an `EngineError::RuleMissing` entry rather than silently
/// dropped; the caller decides, from the report, whether to halt or
/// accept the partial result set.
pub fn compute(
    transactions: &[Transaction],
    rules: &RuleRegistry,
    physical: &HashMap<String, PhysicalNexusDeclaration>,
    as_of_date: NaiveDate,
    year_range: YearRange,
    cancelled: Option<CancellationCheck>,
    report: &mut ValidationReport,
) -> Vec<YearResult> {
    let is_cancelled = |f: Option<CancellationCheck>| f.is_some_and(|f| f());

    let mut by_jurisdiction: HashMap<&str, Vec<&Transaction>> = HashMap::new();
    for txn in transactions {
        by_jurisdiction.entry(txn.jurisdiction_code.as_str()).or_default().push(txn);
    }

    let physical_codes: Vec<&str> = physical.keys().map(|k| k.as_str()).collect();

    let mut jurisdictions: Vec<&str> = rules.jurisdictions().collect();
    for code in by_jurisdiction.keys().copied().chain(physical_codes.iter().copied()) {
        if !jurisdictions.contains(&code) {
            jurisdictions.push(code);
        }
    }
    jurisdictions.sort_unstable();
    jurisdictions.dedup();

    info!(jurisdiction_count = jurisdictions.len(), "starting nexus computation");

    let mut results = Vec::new();
    for jurisdiction in jurisdictions {
        if is_cancelled(cancelled) {
            break;
        }

        let Some(entry) = rules.get(jurisdiction) else {
            // Referenced by a transaction or a physical-nexus declaration
            // but absent from the registry. Surfaced rather than dropped;
            // the caller decides whether this should halt the run.
            let err = EngineError::RuleMissing(jurisdiction.to_string());
            warn!(jurisdiction, "{err}");
            report.push_engine_error(&err);
            continue;
        };

        let mut own: Vec<Transaction> = by_jurisdiction
            .get(jurisdiction)
            .map(|v| v.iter().map(|t| (*t).clone()).collect())
            .unwrap_or_default();
        own.sort_by_key(|t| (t.transaction_date, t.input_index));

        let physical_date = physical.get(jurisdiction).map(|p| p.nexus_date);
        let economic_crossing = nexus::detect_economic_crossing(&entry.rule, &own);

        debug!(jurisdiction, has_economic_crossing = economic_crossing.is_some(), "resolved threshold crossing");

        let mut jurisdiction_results = Vec::new();
        let mut jurisdiction_cancelled = false;
        for year in year_range.years() {
            if is_cancelled(cancelled) {
                jurisdiction_cancelled = true;
                break;
            }
            let year_nexus = nexus::resolve_year(economic_crossing.as_ref(), physical_date, year);
            jurisdiction_results.push(build_year_result(jurisdiction, year, &year_nexus, entry, &own, as_of_date));
        }

        if jurisdiction_cancelled {
            // Partial-jurisdiction results are discarded.
            break;
        }
        results.extend(jurisdiction_results);
    }

    results
}

fn build_year_result(
    jurisdiction: &str,
    year: i32,
    year_nexus: &YearNexus,
    entry: &crate::rules::RuleEntry,
    txns: &[Transaction],
    as_of_date: NaiveDate,
) -> YearResult {
    if year_nexus.nexus_type == NexusType::None {
        return YearResult::none(jurisdiction, year);
    }

    let exposure: Exposure = exposure::aggregate(&entry.rule, year, year_nexus.obligation_start_date, txns);
    let charges: LiabilityCharges = interest::compute_charges(
        &entry.interest_penalty,
        entry.rule.marketplace_excluded_from_liability,
        year_nexus.obligation_start_date,
        year,
        exposure.base_tax,
        as_of_date,
        txns,
    );

    let estimated_liability = exposure.base_tax + charges.interest + charges.penalties;

    YearResult {
        jurisdiction: jurisdiction.to_string(),
        year,
        nexus_type: year_nexus.nexus_type.into(),
        nexus_date: year_nexus.nexus_date,
        obligation_start_date: year_nexus.obligation_start_date,
        first_nexus_year: year_nexus.first_nexus_year,
        gross_sales: exposure.gross_sales,
        direct_sales: exposure.direct_sales,
        marketplace_sales: exposure.marketplace_sales,
        taxable_sales: exposure.taxable_sales,
        exempt_sales: exposure.exempt_sales,
        exposure_sales: exposure.exposure_sales,
        base_tax: exposure.base_tax,
        interest: charges.interest,
        penalties: charges.penalties,
        estimated_liability,
        transaction_count: exposure.transaction_count,
        interest_method: Some(entry.interest_penalty.interest_method),
        days_outstanding: charges.days_outstanding,
        penalty_rate: Some(entry.interest_penalty.penalty_rate),
        first_taxable_sale_date: charges.first_taxable_sale_date,
    }
}
