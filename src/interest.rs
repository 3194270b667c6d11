//! Interest and penalty accrual.
//!
//! Accrues interest from the first taxable, non-excluded sale on or after
//! the obligation start through `as_of_date`, then derives a bounded
//! penalty. Computes a holding-period-gated rate against a `Decimal`
//! base and applies a jurisdiction-specific `InterestPenaltyConfig`.

use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::exposure::round_cents;
use crate::rules::{InterestMethod, InterestPenaltyConfig, PenaltyBase};
use crate::transactions::{SalesChannel, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiabilityCharges {
    pub interest: Decimal,
    pub penalties: Decimal,
    pub days_outstanding: i64,
    pub first_taxable_sale_date: Option<NaiveDate>,
}

/// Finds the first taxable, liability-counted sale on or after
/// `obligation_start_date` within calendar year `year`.
fn first_taxable_sale(
    marketplace_excluded: bool,
    obligation_start_date: NaiveDate,
    year: i32,
    txns: &[Transaction],
) -> Option<NaiveDate> {
    txns.iter()
        .filter(|t| t.transaction_date.year() == year)
        .filter(|t| t.transaction_date >= obligation_start_date)
        .filter(|t| t.taxable_amount() > Decimal::ZERO)
        .filter(|t| !(marketplace_excluded && t.sales_channel == SalesChannel::Marketplace))
        .map(|t| t.transaction_date)
        .min()
}

/// Whole months between `start` and `end`, with any partial final month
/// expressed as a fraction of that month's length.
fn whole_months_between(start: NaiveDate, end: NaiveDate) -> Decimal {
    if end <= start {
        return Decimal::ZERO;
    }
    let raw_months = (end.year() - start.year()) * 12 + (end.month() as i32 - start.month() as i32);
    let whole = if add_months(start, raw_months) <= end { raw_months } else { raw_months - 1 }.max(0);
    let anniversary = add_months(start, whole);
    let remainder_days = (end - anniversary).num_days().max(0);
    let partial_month_length = (add_months(start, whole + 1) - anniversary).num_days().max(1);
    Decimal::from(whole) + Decimal::from(remainder_days) / Decimal::from(partial_month_length)
}

fn add_months(date: NaiveDate, months: i32) -> NaiveDate {
    let zero_based = (date.month() as i32 - 1) + months;
    let year = date.year() + zero_based.div_euclid(12);
    let month = zero_based.rem_euclid(12) as u32 + 1;
    let day = date.day();
    // Clamp to the last valid day of the target month (e.g. Jan 31 + 1mo).
    let mut d = day;
    loop {
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, d) {
            return date;
        }
        d -= 1;
    }
}

/// Computes accrued interest on `base_tax` using `method`, from `start` to
/// `as_of_date`.
pub fn compute_interest(
    method: InterestMethod,
    annual_rate: Decimal,
    base_tax: Decimal,
    start: NaiveDate,
    as_of_date: NaiveDate,
) -> (Decimal, i64) {
    if base_tax <= Decimal::ZERO || as_of_date <= start {
        return (Decimal::ZERO, 0);
    }
    let days = (as_of_date - start).num_days();
    let interest = match method {
        InterestMethod::Simple => base_tax * annual_rate * Decimal::from(days) / Decimal::from(365),
        InterestMethod::CompoundMonthly => {
            let months = whole_months_between(start, as_of_date);
            let monthly_rate = annual_rate / Decimal::from(12);
            base_tax * (pow_decimal(Decimal::ONE + monthly_rate, months) - Decimal::ONE)
        }
        InterestMethod::CompoundDaily => {
            let daily_rate = annual_rate / Decimal::from(365);
            base_tax * (pow_decimal(Decimal::ONE + daily_rate, Decimal::from(days)) - Decimal::ONE)
        }
    };
    (round_cents(interest), days)
}

/// `Decimal` has no fractional-exponent `powf`; compound-monthly needs one
/// because a partial final month contributes a fractional exponent, so we
/// fall back to `f64` for the exponentiation only, then convert back.
fn pow_decimal(base: Decimal, exponent: Decimal) -> Decimal {
    let base_f64 = base.to_f64().unwrap_or(1.0);
    let exponent_f64 = exponent.to_f64().unwrap_or(0.0);
    let result = base_f64.powf(exponent_f64);
    Decimal::from_f64(result).unwrap_or(Decimal::ONE)
}

/// Computes the penalty given the configured base, rate, and min/max
/// bounds. Zero `base_tax` always yields a zero penalty, regardless of
/// bounds.
pub fn compute_penalty(config: &InterestPenaltyConfig, base_tax: Decimal, interest: Decimal) -> Decimal {
    if base_tax <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let penalty_base = match config.penalty_applies_to {
        PenaltyBase::BaseTax => base_tax,
        PenaltyBase::BaseTaxPlusInterest => base_tax + interest,
    };
    let mut penalty = round_cents(penalty_base * config.penalty_rate);
    if let Some(min) = config.penalty_min {
        penalty = penalty.max(min);
    }
    if let Some(max) = config.penalty_max {
        penalty = penalty.min(max);
    }
    penalty
}

/// Full interest-and-penalty pass for one jurisdiction-year: finds the
/// accrual start date, then computes interest and penalties against
/// `base_tax`.
pub fn compute_charges(
    config: &InterestPenaltyConfig,
    marketplace_excluded: bool,
    obligation_start_date: Option<NaiveDate>,
    year: i32,
    base_tax: Decimal,
    as_of_date: NaiveDate,
    txns: &[Transaction],
) -> LiabilityCharges {
    let Some(obligation_start_date) = obligation_start_date else {
        return LiabilityCharges::default();
    };
    let first_taxable_sale_date = first_taxable_sale(marketplace_excluded, obligation_start_date, year, txns);
    let Some(start) = first_taxable_sale_date else {
        return LiabilityCharges::default();
    };

    let (interest, days_outstanding) =
        compute_interest(config.interest_method, config.annual_interest_rate, base_tax, start, as_of_date);
    let penalties = compute_penalty(config, base_tax, interest);

    LiabilityCharges {
        interest,
        penalties,
        days_outstanding,
        first_taxable_sale_date: Some(start),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn simple_interest_accrues_linearly() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let as_of = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        let (interest, days) = compute_interest(InterestMethod::Simple, dec!(0.06), dec!(10000), start, as_of);
        assert_eq!(days, 365);
        assert_eq!(interest, round_cents(dec!(10000) * dec!(0.06) * dec!(365) / dec!(365)));
    }

    #[test]
    fn doubling_as_of_distance_increases_simple_interest() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let as_of_a = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        let as_of_b = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let (a, _) = compute_interest(InterestMethod::Simple, dec!(0.06), dec!(10000), start, as_of_a);
        let (b, _) = compute_interest(InterestMethod::Simple, dec!(0.06), dec!(10000), start, as_of_b);
        assert!(b >= a);
    }

    #[test]
    fn compound_methods_exceed_simple_for_long_windows() {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let as_of = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let (simple, _) = compute_interest(InterestMethod::Simple, dec!(0.18), dec!(10000), start, as_of);
        let (monthly, _) = compute_interest(InterestMethod::CompoundMonthly, dec!(0.18), dec!(10000), start, as_of);
        let (daily, _) = compute_interest(InterestMethod::CompoundDaily, dec!(0.18), dec!(10000), start, as_of);
        assert!(monthly > simple);
        assert!(daily > simple);
    }

    #[test]
    fn zero_base_tax_means_zero_penalty_even_with_bounds() {
        let config = InterestPenaltyConfig {
            annual_interest_rate: dec!(0.06),
            interest_method: InterestMethod::Simple,
            penalty_rate: dec!(0.10),
            penalty_applies_to: PenaltyBase::BaseTax,
            penalty_min: Some(dec!(50)),
            penalty_max: Some(dec!(5000)),
        };
        assert_eq!(compute_penalty(&config, Decimal::ZERO, Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn penalty_clamped_to_bounds() {
        let config = InterestPenaltyConfig {
            annual_interest_rate: dec!(0.06),
            interest_method: InterestMethod::Simple,
            penalty_rate: dec!(0.10),
            penalty_applies_to: PenaltyBase::BaseTax,
            penalty_min: Some(dec!(500)),
            penalty_max: Some(dec!(1000)),
        };
        // 10% of $100 = $10, clamped up to the $500 minimum.
        assert_eq!(compute_penalty(&config, dec!(100), Decimal::ZERO), dec!(500));
        // 10% of $50,000 = $5,000, clamped down to the $1,000 maximum.
        assert_eq!(compute_penalty(&config, dec!(50000), Decimal::ZERO), dec!(1000));
    }
}
