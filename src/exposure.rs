//! Exposure aggregation.
//!
//! Splits one jurisdiction-year's transactions into gross/taxable/exempt/
//! exposure buckets, applying the marketplace-liability policy before
//! computing `base_tax`. Folds the transaction list into running
//! `Decimal` totals in a single pass.

use chrono::{Datelike, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::rules::JurisdictionRule;
use crate::transactions::{SalesChannel, Transaction};

/// Full-year sums plus the obligation-period exposure base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Exposure {
    pub gross_sales: Decimal,
    pub direct_sales: Decimal,
    pub marketplace_sales: Decimal,
    pub taxable_sales: Decimal,
    pub exempt_sales: Decimal,
    pub exposure_sales: Decimal,
    pub base_tax: Decimal,
    pub transaction_count: usize,
}

/// Aggregates one jurisdiction's transactions for calendar year `year`,
/// given the obligation start date (`None` when there is no nexus at all
/// for the year).
pub fn aggregate(
    rule: &JurisdictionRule,
    year: i32,
    obligation_start_date: Option<NaiveDate>,
    txns: &[Transaction],
) -> Exposure {
    let mut exposure = Exposure::default();

    for txn in txns {
        if txn.transaction_date.year() != year {
            continue;
        }

        exposure.gross_sales += txn.sales_amount;
        match txn.sales_channel {
            SalesChannel::Direct => exposure.direct_sales += txn.sales_amount,
            SalesChannel::Marketplace => exposure.marketplace_sales += txn.sales_amount,
        }

        let taxable_amount = txn.taxable_amount();
        exposure.taxable_sales += taxable_amount;
        exposure.exempt_sales += txn.exempt_amount;

        let excluded_from_liability =
            rule.marketplace_excluded_from_liability && txn.sales_channel == SalesChannel::Marketplace;
        let in_obligation_period = obligation_start_date.is_some_and(|start| txn.transaction_date >= start);

        if !excluded_from_liability && in_obligation_period && taxable_amount > Decimal::ZERO {
            exposure.exposure_sales += taxable_amount;
            exposure.transaction_count += 1;
        }
    }

    exposure.base_tax = round_cents(exposure.exposure_sales * rule.combined_tax_rate);
    exposure
}

/// Rounds to cents using banker's rounding (round-half-to-even).
pub fn round_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}
