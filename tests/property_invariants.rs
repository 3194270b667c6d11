//! Property-based tests for the engine's universal invariants, run
//! against the full `compute` pipeline for a single synthetic
//! jurisdiction.

use std::collections::HashMap;

use chrono::NaiveDate;
use nexus_engine::engine::{self, NexusTypeOut, YearRange};
use nexus_engine::errors::ValidationReport;
use nexus_engine::rules::{
    InterestMethod, InterestPenaltyConfig, JurisdictionRule, LookbackMethod, PenaltyBase, RuleEntry, RuleRegistry,
    ThresholdOperator,
};
use nexus_engine::transactions::{normalize, RawRow};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const AS_OF: &str = "2024-12-31";

fn row(day_of_year: u32, amount: u32, marketplace: bool, exempt_fraction: u32) -> RawRow {
    let date = NaiveDate::from_yo_opt(2023, day_of_year.clamp(1, 365)).unwrap();
    let exempt = (amount * exempt_fraction) / 100;
    RawRow {
        transaction_date: Some(date.format("%Y-%m-%d").to_string()),
        jurisdiction_code: Some("CA".to_string()),
        sales_amount: Some(amount.to_string()),
        sales_channel: Some(if marketplace { "marketplace".to_string() } else { "direct".to_string() }),
        is_taxable: None,
        exempt_amount: Some(exempt.to_string()),
        transaction_id: None,
    }
}

fn registry(revenue_threshold: u32, penalty_min: Option<u32>, penalty_max: Option<u32>) -> RuleRegistry {
    let rule = JurisdictionRule {
        revenue_threshold: Some(Decimal::from(revenue_threshold)),
        transaction_threshold: None,
        operator: ThresholdOperator::Or,
        lookback_method: LookbackMethod::CalendarCurrentOrPrevious,
        marketplace_counts_toward_threshold: true,
        marketplace_excluded_from_liability: true,
        combined_tax_rate: dec!(0.08),
    };
    let interest_penalty = InterestPenaltyConfig {
        annual_interest_rate: dec!(0.06),
        interest_method: InterestMethod::Simple,
        penalty_rate: dec!(0.10),
        penalty_applies_to: PenaltyBase::BaseTax,
        penalty_min: penalty_min.map(Decimal::from),
        penalty_max: penalty_max.map(Decimal::from),
    };
    let mut entries = HashMap::new();
    entries.insert("CA".to_string(), RuleEntry { rule, interest_penalty });
    RuleRegistry::load(entries).unwrap()
}

fn row_strategy() -> impl Strategy<Value = (u32, u32, bool, u32)> {
    (1u32..365, 0u32..20_000, any::<bool>(), 0u32..=100)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn structural_invariants_hold(
        rows in prop::collection::vec(row_strategy(), 0..40),
        revenue_threshold in 1_000u32..200_000,
        penalty_min in prop::option::of(0u32..500),
        penalty_max in prop::option::of(500u32..5000),
    ) {
        let raw_rows: Vec<RawRow> = rows.into_iter().map(|(d, a, m, e)| row(d, a, m, e)).collect();
        let registry = registry(revenue_threshold, penalty_min, penalty_max);
        let as_of = NaiveDate::parse_from_str(AS_OF, "%Y-%m-%d").unwrap();

        let mut report = ValidationReport::default();
        let txns = normalize(raw_rows, as_of, &mut report);
        let range = YearRange { start: 2023, end: 2024 };
        let results = engine::compute(&txns, &registry, &HashMap::new(), as_of, range, None, &mut report);

        for r in &results {
            // Invariant 1: gross = direct + marketplace.
            prop_assert_eq!(r.gross_sales, r.direct_sales + r.marketplace_sales);
            // Invariant 2: taxable <= gross; exempt = gross - taxable.
            prop_assert!(r.taxable_sales <= r.gross_sales);
            prop_assert_eq!(r.exempt_sales, r.gross_sales - r.taxable_sales);
            // Invariant 3: exposure <= taxable.
            prop_assert!(r.exposure_sales <= r.taxable_sales);
            // Invariant 4: no nexus implies zeroed monetary fields.
            if r.nexus_type == NexusTypeOut::None {
                prop_assert_eq!(r.base_tax, Decimal::ZERO);
                prop_assert_eq!(r.interest, Decimal::ZERO);
                prop_assert_eq!(r.penalties, Decimal::ZERO);
            }
            // Invariant 6: penalty bounds respected once base_tax > 0.
            if r.base_tax > Decimal::ZERO {
                if let Some(min) = penalty_min {
                    prop_assert!(r.penalties >= Decimal::from(min));
                }
                if let Some(max) = penalty_max {
                    prop_assert!(r.penalties <= Decimal::from(max));
                }
            }
        }

        // Invariant 7: sticky monotonicity across ascending years.
        let mut sorted = results.clone();
        sorted.sort_by_key(|r| r.year);
        let mut left_nexus = false;
        for r in &sorted {
            let has_nexus = r.nexus_type != NexusTypeOut::None;
            if left_nexus {
                prop_assert!(has_nexus, "nexus reverted to none after being established");
            }
            left_nexus = has_nexus;
        }
    }

    #[test]
    fn doubling_as_of_distance_never_decreases_simple_interest(
        amount in 1_000u32..50_000,
    ) {
        // First row crosses the (trivial) threshold on day 1, pushing the
        // obligation start to Feb 1; the second row is the actual taxable
        // sale whose interest window we're comparing.
        let raw_rows = vec![row(1, 100, false, 0), row(60, amount, false, 0)];
        let registry = registry(1, None, None);

        let short = NaiveDate::from_ymd_opt(2023, 6, 1).unwrap();
        let long = NaiveDate::from_ymd_opt(2023, 12, 1).unwrap();

        let mut report_a = ValidationReport::default();
        let txns_a = normalize(raw_rows.clone(), short, &mut report_a);
        let mut report_b = ValidationReport::default();
        let txns_b = normalize(raw_rows, long, &mut report_b);

        let range = YearRange { start: 2023, end: 2023 };
        let short_results = engine::compute(&txns_a, &registry, &HashMap::new(), short, range, None, &mut report_a);
        let long_results = engine::compute(&txns_b, &registry, &HashMap::new(), long, range, None, &mut report_b);

        prop_assert!(long_results[0].interest >= short_results[0].interest);
    }
}
