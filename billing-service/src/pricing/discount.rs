//! Discount rules and code-over-plan precedence.

use crate::models::{normalize_code, Discount};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    PercentFirstMonth,
    Fixed,
}

impl DiscountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountKind::PercentFirstMonth => "percent_first_month",
            DiscountKind::Fixed => "fixed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "percent_first_month" => Some(DiscountKind::PercentFirstMonth),
            "fixed" => Some(DiscountKind::Fixed),
            _ => None,
        }
    }
}

/// Type and value of a discount as stored. The type stays a string so that
/// unknown types survive a round trip and simply discount nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscountRule {
    pub discount_type: String,
    pub value: Decimal,
}

impl DiscountRule {
    pub fn new(discount_type: impl Into<String>, value: Decimal) -> Self {
        Self {
            discount_type: discount_type.into(),
            value,
        }
    }

    pub fn kind(&self) -> Option<DiscountKind> {
        DiscountKind::parse(&self.discount_type)
    }

    /// Monetary discount on `base`. Never negative and never more than `base`.
    pub fn amount(&self, base: Decimal) -> Decimal {
        let raw = match self.kind() {
            Some(DiscountKind::PercentFirstMonth) => base * self.value / Decimal::ONE_HUNDRED,
            Some(DiscountKind::Fixed) => self.value,
            None => Decimal::ZERO,
        };
        raw.max(Decimal::ZERO).min(base.max(Decimal::ZERO))
    }
}

/// Where an applied discount came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscountSource {
    PlanDefault(DiscountRule),
    CodeOverride { code: String, rule: DiscountRule },
}

impl DiscountSource {
    pub fn rule(&self) -> &DiscountRule {
        match self {
            DiscountSource::PlanDefault(rule) => rule,
            DiscountSource::CodeOverride { rule, .. } => rule,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            DiscountSource::PlanDefault(_) => None,
            DiscountSource::CodeOverride { code, .. } => Some(code),
        }
    }

    /// Label printed on the invoice discount line.
    pub fn label(&self) -> String {
        self.code().unwrap_or("Applied").to_string()
    }
}

/// Resolved discount with its exact amount.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedDiscount {
    pub source: DiscountSource,
    pub amount: Decimal,
}

/// Pick the discount for a subscription.
///
/// A supplied code that matches an active company discount replaces the
/// plan default outright; the two never stack. An unmatched code leaves the
/// plan default in place.
pub fn resolve_discount(
    base: Decimal,
    plan_default: Option<DiscountRule>,
    code: Option<&str>,
    company_discounts: &[Discount],
) -> Option<AppliedDiscount> {
    let from_code = code
        .map(normalize_code)
        .filter(|c| !c.is_empty())
        .and_then(|c| {
            company_discounts
                .iter()
                .find(|d| d.active && normalize_code(&d.name) == c)
                .map(|d| DiscountSource::CodeOverride {
                    code: c,
                    rule: DiscountRule::new(d.discount_type.clone(), d.value),
                })
        });

    let source = from_code.or_else(|| plan_default.map(DiscountSource::PlanDefault))?;
    let amount = source.rule().amount(base);

    Some(AppliedDiscount { source, amount })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn fixed_discount_is_capped_at_base() {
        let rule = DiscountRule::new("fixed", dec!(50));
        assert_eq!(rule.amount(dec!(30)), dec!(30));
        assert_eq!(rule.amount(dec!(80)), dec!(50));
    }

    #[test]
    fn unknown_type_discounts_nothing() {
        let rule = DiscountRule::new("bogo", dec!(50));
        assert_eq!(rule.amount(dec!(80)), Decimal::ZERO);
    }

    #[test]
    fn no_sources_resolves_to_none() {
        assert_eq!(resolve_discount(dec!(100), None, None, &[]), None);
        assert_eq!(resolve_discount(dec!(100), None, Some("  "), &[]), None);
    }
}
