//! Threshold crossing detection and obligation scheduling.
//!
//! Dispatches on [`LookbackMethod`] to find the single earliest date a
//! jurisdiction's economic-nexus threshold is crossed, then combines that
//! with a physical-nexus date and propagates "sticky" nexus across years.
//! The five lookback methods are a tagged variant; each is a small pure
//! function sharing the same `(transactions, rule) -> Option<Crossing>`
//! shape, dispatched on `lookback_method` rather than through a trait
//! object.

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;

use crate::rules::{JurisdictionRule, LookbackMethod, ThresholdOperator};
use crate::transactions::{SalesChannel, Transaction};

/// The point at which some nexus condition (economic or physical) was
/// first met, and the date tax collection begins as a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crossing {
    pub establishing_year: i32,
    pub nexus_date: NaiveDate,
    pub obligation_start_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NexusType {
    None,
    Economic,
    Physical,
    Both,
}

/// Resolved nexus state for one (jurisdiction, year), consumed downstream
/// to compute exposure and liability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearNexus {
    pub nexus_type: NexusType,
    pub nexus_date: Option<NaiveDate>,
    pub obligation_start_date: Option<NaiveDate>,
    pub first_nexus_year: Option<i32>,
}

impl YearNexus {
    fn none() -> Self {
        Self {
            nexus_type: NexusType::None,
            nexus_date: None,
            obligation_start_date: None,
            first_nexus_year: None,
        }
    }
}

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid calendar date")
}

fn first_of_next_month(date: NaiveDate) -> NaiveDate {
    if date.month() == 12 {
        ymd(date.year() + 1, 1, 1)
    } else {
        ymd(date.year(), date.month() + 1, 1)
    }
}

fn qualifies_for_metric(rule: &JurisdictionRule, txn: &Transaction) -> bool {
    match txn.sales_channel {
        SalesChannel::Direct => true,
        SalesChannel::Marketplace => rule.marketplace_counts_toward_threshold,
    }
}

/// Gross-sales-based threshold metric: always gross `sales_amount`, never
/// taxable sales.
fn sum_metric(rule: &JurisdictionRule, txns: &[Transaction], start: NaiveDate, end: NaiveDate) -> (Decimal, u32) {
    let mut revenue = Decimal::ZERO;
    let mut count: u32 = 0;
    for t in txns {
        if t.transaction_date < start || t.transaction_date > end {
            continue;
        }
        if !qualifies_for_metric(rule, t) {
            continue;
        }
        revenue += t.sales_amount;
        count += 1;
    }
    (revenue, count)
}

fn meets_threshold(rule: &JurisdictionRule, revenue: Decimal, count: u32) -> bool {
    let revenue_met = rule.revenue_threshold.map(|t| revenue >= t);
    let count_met = rule.transaction_threshold.map(|t| count >= t);
    match rule.operator {
        ThresholdOperator::Or => revenue_met.unwrap_or(false) || count_met.unwrap_or(false),
        ThresholdOperator::And => revenue_met.unwrap_or(false) && count_met.unwrap_or(false),
    }
}

/// Walks `ordered` (already date/input-order sorted) accumulating the
/// threshold metric, returning the first transaction whose inclusion
/// meets-or-exceeds the threshold.
fn scan_cumulative_crossing<'a>(
    rule: &JurisdictionRule,
    ordered: impl Iterator<Item = &'a Transaction>,
) -> Option<&'a Transaction> {
    let mut revenue = Decimal::ZERO;
    let mut count: u32 = 0;
    for txn in ordered {
        if !qualifies_for_metric(rule, txn) {
            continue;
        }
        revenue += txn.sales_amount;
        count += 1;
        if meets_threshold(rule, revenue, count) {
            return Some(txn);
        }
    }
    None
}

fn candidate_years(txns: &[Transaction]) -> std::ops::RangeInclusive<i32> {
    let min_year = txns.iter().map(|t| t.transaction_date.year()).min().unwrap();
    let max_year = txns.iter().map(|t| t.transaction_date.year()).max().unwrap();
    // +1 covers the year immediately after the last transaction, which can
    // still be established purely from a trailing prior-year sum (Methods
    // A/B) with no transactions of its own.
    min_year..=(max_year + 1)
}

fn detect_calendar_previous(rule: &JurisdictionRule, txns: &[Transaction]) -> Option<Crossing> {
    for y in candidate_years(txns) {
        let prior_start = ymd(y - 1, 1, 1);
        let prior_end = ymd(y - 1, 12, 31);
        let (revenue, count) = sum_metric(rule, txns, prior_start, prior_end);
        if meets_threshold(rule, revenue, count) {
            return Some(Crossing {
                establishing_year: y,
                nexus_date: prior_end,
                obligation_start_date: ymd(y, 1, 1),
            });
        }
    }
    None
}

fn detect_calendar_current_or_previous(rule: &JurisdictionRule, txns: &[Transaction]) -> Option<Crossing> {
    for y in candidate_years(txns) {
        let prior_start = ymd(y - 1, 1, 1);
        let prior_end = ymd(y - 1, 12, 31);
        let (revenue, count) = sum_metric(rule, txns, prior_start, prior_end);
        if meets_threshold(rule, revenue, count) {
            return Some(Crossing {
                establishing_year: y,
                nexus_date: prior_end,
                obligation_start_date: ymd(y, 1, 1),
            });
        }

        let within = txns.iter().filter(|t| t.transaction_date.year() == y);
        if let Some(txn) = scan_cumulative_crossing(rule, within) {
            return Some(Crossing {
                establishing_year: y,
                nexus_date: txn.transaction_date,
                obligation_start_date: first_of_next_month(txn.transaction_date),
            });
        }
    }
    None
}

fn detect_rolling_12_month(rule: &JurisdictionRule, txns: &[Transaction]) -> Option<Crossing> {
    let min_date = txns.iter().map(|t| t.transaction_date).min().unwrap();
    let max_date = txns.iter().map(|t| t.transaction_date).max().unwrap();
    let mut y = min_date.year();
    let mut m = min_date.month();
    loop {
        let window_end = last_day_of_month(y, m);
        let (wy, wm) = offset_months(y, m, -11);
        let window_start = ymd(wy, wm, 1);
        let (revenue, count) = sum_metric(rule, txns, window_start, window_end);
        if meets_threshold(rule, revenue, count) {
            return Some(Crossing {
                establishing_year: y,
                nexus_date: window_end,
                obligation_start_date: first_of_next_month(window_end),
            });
        }
        if y > max_date.year() || (y == max_date.year() && m >= max_date.month()) {
            break;
        }
        let (ny, nm) = offset_months(y, m, 1);
        y = ny;
        m = nm;
    }
    None
}

fn offset_months(year: i32, month: u32, delta: i32) -> (i32, u32) {
    let zero_based = (month as i32 - 1) + delta;
    let y = year + zero_based.div_euclid(12);
    let m = zero_based.rem_euclid(12) + 1;
    (y, m as u32)
}

fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let (ny, nm) = offset_months(year, month, 1);
    ymd(ny, nm, 1).pred_opt().expect("valid calendar date")
}

fn quarter_index(date: NaiveDate) -> i32 {
    date.year() * 4 + (date.month() as i32 - 1) / 3
}

fn quarter_start(qidx: i32) -> NaiveDate {
    let year = qidx.div_euclid(4);
    let q = qidx.rem_euclid(4);
    ymd(year, (q * 3 + 1) as u32, 1)
}

fn quarter_end(qidx: i32) -> NaiveDate {
    quarter_start(qidx + 1).pred_opt().expect("valid calendar date")
}

fn detect_quarterly_4q_preceding(rule: &JurisdictionRule, txns: &[Transaction]) -> Option<Crossing> {
    let min_q = quarter_index(txns.iter().map(|t| t.transaction_date).min().unwrap());
    let max_q = quarter_index(txns.iter().map(|t| t.transaction_date).max().unwrap()) + 1;
    for qidx in min_q..=max_q {
        let preceding_start = qidx - 4;
        let preceding_end = qidx - 1;
        let start = quarter_start(preceding_start);
        let end = quarter_end(preceding_end);
        let (revenue, count) = sum_metric(rule, txns, start, end);
        if meets_threshold(rule, revenue, count) {
            let year = qidx.div_euclid(4);
            return Some(Crossing {
                establishing_year: year,
                nexus_date: end,
                obligation_start_date: quarter_start(qidx),
            });
        }
    }
    None
}

fn detect_ct_fiscal(rule: &JurisdictionRule, txns: &[Transaction]) -> Option<Crossing> {
    for y in candidate_years(txns) {
        let start = ymd(y - 1, 10, 1);
        let end = ymd(y, 9, 30);
        let within: Vec<&Transaction> = txns
            .iter()
            .filter(|t| t.transaction_date >= start && t.transaction_date <= end)
            .collect();
        let (revenue, count) = sum_metric(rule, txns, start, end);
        if meets_threshold(rule, revenue, count) {
            if let Some(txn) = scan_cumulative_crossing(rule, within.into_iter()) {
                let obligation_start_date = if txn.transaction_date.year() == y - 1 {
                    ymd(y, 1, 1)
                } else {
                    first_of_next_month(txn.transaction_date)
                };
                return Some(Crossing {
                    establishing_year: y,
                    nexus_date: end,
                    obligation_start_date,
                });
            }
        }
    }
    None
}

/// `txns` must already be restricted to one jurisdiction and sorted by
/// `(date, input_index)`.
pub fn detect_economic_crossing(rule: &JurisdictionRule, txns: &[Transaction]) -> Option<Crossing> {
    if txns.is_empty() {
        return None;
    }
    if rule.revenue_threshold.is_none() && rule.transaction_threshold.is_none() {
        return None;
    }
    match rule.lookback_method {
        LookbackMethod::CalendarPrevious => detect_calendar_previous(rule, txns),
        LookbackMethod::CalendarCurrentOrPrevious => detect_calendar_current_or_previous(rule, txns),
        LookbackMethod::Rolling12Month => detect_rolling_12_month(rule, txns),
        LookbackMethod::Quarterly4qPreceding => detect_quarterly_4q_preceding(rule, txns),
        LookbackMethod::CtOctSepFiscal => detect_ct_fiscal(rule, txns),
    }
}

/// Resolves the nexus state for one calendar year, given the
/// jurisdiction's economic crossing (if any) and physical-nexus
/// declaration (if any). Physical nexus is modeled as an instantaneous
/// crossing: `obligation_start_date == nexus_date`, with no
/// month-following delay.
pub fn resolve_year(
    economic: Option<&Crossing>,
    physical_date: Option<NaiveDate>,
    year: i32,
) -> YearNexus {
    let physical = physical_date.map(|d| Crossing {
        establishing_year: d.year(),
        nexus_date: d,
        obligation_start_date: d,
    });

    let p_rel = physical.filter(|p| p.establishing_year <= year);
    let e_rel = economic.copied().filter(|e| e.establishing_year <= year);

    let first_nexus_year = [p_rel.map(|p| p.establishing_year), e_rel.map(|e| e.establishing_year)]
        .into_iter()
        .flatten()
        .min();

    let Some(first_nexus_year) = first_nexus_year else {
        return YearNexus::none();
    };

    let nexus_type = match (p_rel.is_some(), e_rel.is_some()) {
        (true, true) => NexusType::Both,
        (true, false) => NexusType::Physical,
        (false, true) => NexusType::Economic,
        (false, false) => unreachable!("first_nexus_year implies at least one relevant crossing"),
    };

    let nexus_date = [p_rel.map(|p| p.nexus_date), e_rel.map(|e| e.nexus_date)]
        .into_iter()
        .flatten()
        .min()
        .expect("at least one crossing is relevant");

    let obligation_start_date = if year > first_nexus_year {
        ymd(year, 1, 1)
    } else {
        [p_rel.map(|p| p.obligation_start_date), e_rel.map(|e| e.obligation_start_date)]
            .into_iter()
            .flatten()
            .min()
            .expect("at least one crossing is relevant")
    };

    YearNexus {
        nexus_type,
        nexus_date: Some(nexus_date),
        obligation_start_date: Some(obligation_start_date),
        first_nexus_year: Some(first_nexus_year),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn direct(date: &str, amount: &str) -> Transaction {
        Transaction {
            transaction_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            jurisdiction_code: "CA".to_string(),
            sales_amount: amount.parse().unwrap(),
            sales_channel: SalesChannel::Direct,
            is_taxable: true,
            exempt_amount: Decimal::ZERO,
            transaction_id: None,
            input_index: 0,
        }
    }

    fn or_revenue_rule(threshold: Decimal, method: LookbackMethod) -> JurisdictionRule {
        JurisdictionRule {
            revenue_threshold: Some(threshold),
            transaction_threshold: None,
            operator: ThresholdOperator::Or,
            lookback_method: method,
            marketplace_counts_toward_threshold: true,
            marketplace_excluded_from_liability: true,
            combined_tax_rate: dec!(0.08),
        }
    }

    #[test]
    fn s1_calendar_current_or_previous_december_crossing() {
        let rule = or_revenue_rule(dec!(500000), LookbackMethod::CalendarCurrentOrPrevious);
        let txns = vec![
            direct("2022-01-15", "125000"),
            direct("2022-04-05", "125000"),
            direct("2022-09-20", "125000"),
            direct("2022-12-02", "125000"),
        ];
        let crossing = detect_economic_crossing(&rule, &txns).unwrap();
        assert_eq!(crossing.establishing_year, 2022);
        assert_eq!(crossing.nexus_date, NaiveDate::from_ymd_opt(2022, 12, 2).unwrap());
        assert_eq!(crossing.obligation_start_date, NaiveDate::from_ymd_opt(2023, 1, 1).unwrap());
    }

    #[test]
    fn s2_rolling_12_month() {
        // $40k/month keeps every trailing-12-month window at $480k until the
        // $90k May 2024 sale pushes the window ending 2024-05 to $530k.
        let rule = or_revenue_rule(dec!(500000), LookbackMethod::Rolling12Month);
        let mut txns = Vec::new();
        let mut y = 2023;
        let mut m = 1;
        while (y, m) <= (2024, 4) {
            txns.push(direct(&format!("{y:04}-{m:02}-01"), "40000"));
            let (ny, nm) = offset_months(y, m, 1);
            y = ny;
            m = nm;
        }
        txns.push(direct("2024-05-01", "90000"));
        let crossing = detect_economic_crossing(&rule, &txns).unwrap();
        assert_eq!(crossing.establishing_year, 2024);
        assert_eq!(crossing.nexus_date, NaiveDate::from_ymd_opt(2024, 5, 31).unwrap());
        assert_eq!(crossing.obligation_start_date, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
    }

    #[test]
    fn s3_quarterly_and_operator() {
        let rule = JurisdictionRule {
            revenue_threshold: Some(dec!(500000)),
            transaction_threshold: Some(100),
            operator: ThresholdOperator::And,
            lookback_method: LookbackMethod::Quarterly4qPreceding,
            marketplace_counts_toward_threshold: true,
            marketplace_excluded_from_liability: true,
            combined_tax_rate: dec!(0.08),
        };
        // 30 transactions per quarter of $5000 = $150k/quarter, $600k for the year.
        let mut txns = Vec::new();
        for month in [1, 4, 7, 10] {
            for i in 0..30 {
                let day = (i % 28) + 1;
                txns.push(direct(&format!("2023-{:02}-{:02}", month, day), "5000"));
            }
        }
        let crossing = detect_economic_crossing(&rule, &txns).unwrap();
        assert_eq!(crossing.establishing_year, 2024);
        assert_eq!(crossing.nexus_date, NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());
        assert_eq!(crossing.obligation_start_date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    }

    #[test]
    fn s4_marketplace_excluded_from_threshold_metric() {
        let mut rule = or_revenue_rule(dec!(100000), LookbackMethod::CalendarCurrentOrPrevious);
        rule.marketplace_counts_toward_threshold = false;
        let mut marketplace_txn = direct("2024-03-01", "30000");
        marketplace_txn.sales_channel = SalesChannel::Marketplace;
        let txns = vec![direct("2024-01-01", "80000"), marketplace_txn];
        assert!(detect_economic_crossing(&rule, &txns).is_none());
    }

    #[test]
    fn sticky_propagation_promotes_to_both() {
        let economic = Crossing {
            establishing_year: 2024,
            nexus_date: NaiveDate::from_ymd_opt(2024, 5, 31).unwrap(),
            obligation_start_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        };
        let physical_date = NaiveDate::from_ymd_opt(2022, 3, 1).unwrap();

        let y2022 = resolve_year(Some(&economic), Some(physical_date), 2022);
        assert_eq!(y2022.nexus_type, NexusType::Physical);
        assert_eq!(y2022.first_nexus_year, Some(2022));
        assert_eq!(y2022.obligation_start_date, Some(physical_date));

        let y2023 = resolve_year(Some(&economic), Some(physical_date), 2023);
        assert_eq!(y2023.nexus_type, NexusType::Physical);
        assert_eq!(y2023.obligation_start_date, Some(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()));

        let y2024 = resolve_year(Some(&economic), Some(physical_date), 2024);
        assert_eq!(y2024.nexus_type, NexusType::Both);
        assert_eq!(y2024.first_nexus_year, Some(2022));
        assert_eq!(y2024.obligation_start_date, Some(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()));
    }

    #[test]
    fn none_when_neither_crossing_applies() {
        let y = resolve_year(None, None, 2024);
        assert_eq!(y.nexus_type, NexusType::None);
        assert_eq!(y.first_nexus_year, None);
    }
}
