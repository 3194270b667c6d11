//! Rule loading.
//!
//! Normalizes jurisdiction rule tables into an in-memory registry keyed by
//! jurisdiction code, validating before handing back a usable rule set
//! rather than deferring failures to call time.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdOperator {
    Or,
    And,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookbackMethod {
    CalendarPrevious,
    CalendarCurrentOrPrevious,
    Rolling12Month,
    Quarterly4qPreceding,
    CtOctSepFiscal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterestMethod {
    Simple,
    CompoundMonthly,
    CompoundDaily,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PenaltyBase {
    BaseTax,
    BaseTaxPlusInterest,
}

/// Per-jurisdiction threshold/marketplace/rate policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JurisdictionRule {
    pub revenue_threshold: Option<Decimal>,
    pub transaction_threshold: Option<u32>,
    pub operator: ThresholdOperator,
    pub lookback_method: LookbackMethod,
    #[serde(default = "default_true")]
    pub marketplace_counts_toward_threshold: bool,
    #[serde(default = "default_true")]
    pub marketplace_excluded_from_liability: bool,
    pub combined_tax_rate: Decimal,
}

fn default_true() -> bool {
    true
}

/// Per-jurisdiction interest/penalty policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterestPenaltyConfig {
    pub annual_interest_rate: Decimal,
    pub interest_method: InterestMethod,
    pub penalty_rate: Decimal,
    pub penalty_applies_to: PenaltyBase,
    pub penalty_min: Option<Decimal>,
    pub penalty_max: Option<Decimal>,
}

/// A jurisdiction's full rule entry: the threshold/rate policy plus its
/// interest/penalty configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleEntry {
    pub rule: JurisdictionRule,
    pub interest_penalty: InterestPenaltyConfig,
}

/// Read-only mapping from jurisdiction code to its rule entry. Never
/// mutated once built; rule tables are read-only collaborator data.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    entries: HashMap<String, RuleEntry>,
}

impl RuleRegistry {
    /// Builds a registry from already-parsed entries, validating each one
    /// against internal invariants at load time (e.g. an `and` operator
    /// with only one threshold defined), rather than at first use.
    pub fn load(entries: HashMap<String, RuleEntry>) -> Result<Self, EngineError> {
        for (code, entry) in &entries {
            validate_rule(code, &entry.rule)?;
        }
        Ok(Self { entries })
    }

    pub fn get(&self, jurisdiction: &str) -> Option<&RuleEntry> {
        self.entries.get(jurisdiction)
    }

    /// Jurisdictions present in the registry, in no particular order.
    /// Callers that need stable order should sort.
    pub fn jurisdictions(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn validate_rule(code: &str, rule: &JurisdictionRule) -> Result<(), EngineError> {
    if rule.operator == ThresholdOperator::And
        && (rule.revenue_threshold.is_none() || rule.transaction_threshold.is_none())
    {
        return Err(EngineError::Configuration {
            jurisdiction: code.to_string(),
            reason: "`and` operator requires both revenue and transaction thresholds".to_string(),
        });
    }
    if rule.revenue_threshold.is_none() && rule.transaction_threshold.is_none() {
        // No economic-nexus test is possible for this jurisdiction; this is
        // a valid configuration, not an error.
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ca_entry() -> RuleEntry {
        RuleEntry {
            rule: JurisdictionRule {
                revenue_threshold: Some(dec!(500000)),
                transaction_threshold: None,
                operator: ThresholdOperator::Or,
                lookback_method: LookbackMethod::CalendarCurrentOrPrevious,
                marketplace_counts_toward_threshold: true,
                marketplace_excluded_from_liability: true,
                combined_tax_rate: dec!(0.0825),
            },
            interest_penalty: InterestPenaltyConfig {
                annual_interest_rate: dec!(0.06),
                interest_method: InterestMethod::Simple,
                penalty_rate: dec!(0.10),
                penalty_applies_to: PenaltyBase::BaseTax,
                penalty_min: None,
                penalty_max: None,
            },
        }
    }

    #[test]
    fn loads_valid_registry() {
        let mut entries = HashMap::new();
        entries.insert("CA".to_string(), ca_entry());
        let registry = RuleRegistry::load(entries).unwrap();
        assert!(registry.get("CA").is_some());
        assert!(registry.get("TX").is_none());
    }

    #[test]
    fn rejects_and_with_missing_threshold() {
        let mut entry = ca_entry();
        entry.rule.operator = ThresholdOperator::And;
        entry.rule.transaction_threshold = None;
        let mut entries = HashMap::new();
        entries.insert("CA".to_string(), entry);
        assert!(RuleRegistry::load(entries).is_err());
    }
}
