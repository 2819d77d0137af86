//! Base price, tax and the rounding boundary.

use crate::models::ProductVariant;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;
use std::collections::BTreeMap;

/// Quantity used for pricing. Absent, non-numeric and sub-1 input bills one
/// unit; fractional input is truncated.
pub fn normalize_quantity(raw: Option<&Value>) -> i32 {
    let parsed = match raw {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(q) if q.is_finite() && q >= 1.0 => q.trunc().min(i32::MAX as f64) as i32,
        _ => 1,
    }
}

/// Sum of surcharges for the selected `(attribute, value)` pairs.
///
/// Selections that match no product variant contribute nothing.
pub fn variant_extra(variants: &[ProductVariant], selected: &BTreeMap<String, String>) -> Decimal {
    selected
        .iter()
        .filter_map(|(attribute, value)| {
            variants
                .iter()
                .find(|v| &v.attribute == attribute && &v.value == value)
        })
        .map(|v| v.extra_price)
        .sum()
}

/// `(plan price + variant extra) * quantity`, unrounded.
pub fn base_price(plan_price: Decimal, extra: Decimal, quantity: i32) -> Decimal {
    (plan_price + extra) * Decimal::from(quantity)
}

/// `subtotal * percent / 100`, unrounded.
pub fn tax_amount(subtotal: Decimal, tax_percent: Decimal) -> Decimal {
    subtotal * tax_percent / Decimal::ONE_HUNDRED
}

/// Round to cents, half away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Exact price of one billing event.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceBreakdown {
    pub base: Decimal,
    pub discount: Decimal,
    pub subtotal: Decimal,
    pub tax_percent: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

impl PriceBreakdown {
    pub fn compute(base: Decimal, discount: Decimal, tax_percent: Decimal) -> Self {
        let subtotal = base - discount;
        let tax = tax_amount(subtotal, tax_percent);
        Self {
            base,
            discount,
            subtotal,
            tax_percent,
            tax,
            total: subtotal + tax,
        }
    }

    /// Freeze into persisted cents.
    ///
    /// `base`, `subtotal` and `total` are rounded from their exact values and
    /// the discount and tax are derived from them, so the snapshot balances:
    /// `subtotal == base - discount` and `total == subtotal + tax`.
    pub fn snapshot(&self) -> PriceSnapshot {
        let base = round_money(self.base);
        let subtotal = round_money(self.subtotal);
        let total = round_money(self.total);
        PriceSnapshot {
            base,
            discount: base - subtotal,
            subtotal,
            tax_percent: self.tax_percent,
            tax: total - subtotal,
            total,
        }
    }
}

/// Rounded, balanced money fields as stored on subscriptions and invoices.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSnapshot {
    pub base: Decimal,
    pub discount: Decimal,
    pub subtotal: Decimal,
    pub tax_percent: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn quantity_is_lenient() {
        assert_eq!(normalize_quantity(None), 1);
        assert_eq!(normalize_quantity(Some(&json!("abc"))), 1);
        assert_eq!(normalize_quantity(Some(&json!(0))), 1);
        assert_eq!(normalize_quantity(Some(&json!(-3))), 1);
        assert_eq!(normalize_quantity(Some(&json!("4"))), 4);
        assert_eq!(normalize_quantity(Some(&json!(2.7))), 2);
        assert_eq!(normalize_quantity(Some(&json!(null))), 1);
    }

    #[test]
    fn unmatched_variant_selection_is_ignored() {
        let variants = vec![
            ProductVariant {
                attribute: "Storage".into(),
                value: "2TB".into(),
                extra_price: dec!(5.50),
            },
            ProductVariant {
                attribute: "Region".into(),
                value: "EU".into(),
                extra_price: dec!(1),
            },
        ];
        let selected = BTreeMap::from([
            ("Storage".to_string(), "2TB".to_string()),
            ("Region".to_string(), "US".to_string()),
        ]);

        assert_eq!(variant_extra(&variants, &selected), dec!(5.50));
    }

    #[test]
    fn rounding_happens_once_and_balances() {
        let breakdown = PriceBreakdown::compute(dec!(15.99), dec!(0), dec!(18));
        assert_eq!(breakdown.tax, dec!(2.8782));

        let snap = breakdown.snapshot();
        assert_eq!(snap.subtotal, dec!(15.99));
        assert_eq!(snap.tax, dec!(2.88));
        assert_eq!(snap.total, dec!(18.87));
        assert_eq!(snap.subtotal + snap.tax, snap.total);
    }

    #[test]
    fn midpoint_rounds_away_from_zero() {
        assert_eq!(round_money(dec!(0.125)), dec!(0.13));
        assert_eq!(round_money(dec!(-0.125)), dec!(-0.13));
    }
}
