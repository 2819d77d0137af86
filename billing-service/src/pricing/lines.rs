//! Invoice line composition shared by first and renewal invoices.

use super::calculator::PriceSnapshot;
use crate::models::InvoiceLine;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// `"Product - Plan xN"`, followed by `" (Attr: Val, ...)"` when variants were chosen.
pub fn line_description(
    product_name: &str,
    plan_name: &str,
    quantity: i32,
    selected_variants: &BTreeMap<String, String>,
) -> String {
    let mut desc = format!("{} - {} x{}", product_name, plan_name, quantity);
    if !selected_variants.is_empty() {
        let variants = selected_variants
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<_>>()
            .join(", ");
        desc.push_str(&format!(" ({})", variants));
    }
    desc
}

/// Lines plus header totals for one invoice.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedInvoice {
    pub lines: Vec<InvoiceLine>,
    pub subtotal: Decimal,
    pub discount_amount: Option<Decimal>,
    pub discount_label: Option<String>,
    pub tax_percent: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
}

/// Itemize a priced event: base line, then a negative discount line and a
/// tax line when those are non-zero. Lines always sum to `total`.
pub fn compose_lines(
    description: &str,
    price: &PriceSnapshot,
    discount_label: Option<&str>,
) -> ComposedInvoice {
    let mut lines = vec![InvoiceLine {
        description: description.to_string(),
        amount: price.base,
    }];

    let has_discount = price.discount > Decimal::ZERO;
    let label = discount_label.unwrap_or("Applied");
    if has_discount {
        lines.push(InvoiceLine {
            description: format!("Discount: {}", label),
            amount: -price.discount,
        });
    }

    if price.tax > Decimal::ZERO {
        lines.push(InvoiceLine {
            description: format!("Tax ({}%)", price.tax_percent.normalize()),
            amount: price.tax,
        });
    }

    ComposedInvoice {
        lines,
        subtotal: price.subtotal,
        discount_amount: has_discount.then_some(price.discount),
        discount_label: has_discount.then(|| label.to_string()),
        tax_percent: price.tax_percent,
        tax_amount: price.tax,
        total: price.total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::PriceBreakdown;
    use rust_decimal_macros::dec;

    #[test]
    fn description_lists_variants_in_order() {
        let variants = BTreeMap::from([
            ("Storage".to_string(), "2TB".to_string()),
            ("Region".to_string(), "EU".to_string()),
        ]);
        assert_eq!(
            line_description("Cloud Drive", "Monthly", 2, &variants),
            "Cloud Drive - Monthly x2 (Region: EU, Storage: 2TB)"
        );
        assert_eq!(
            line_description("Netflix Premium", "Monthly Standard", 1, &BTreeMap::new()),
            "Netflix Premium - Monthly Standard x1"
        );
    }

    #[test]
    fn lines_sum_to_total() {
        let snap = PriceBreakdown::compute(dec!(33.33), dec!(3.333), dec!(18)).snapshot();
        let composed = compose_lines("Thing - Plan x1", &snap, Some("FIRST10"));

        let sum: Decimal = composed.lines.iter().map(|l| l.amount).sum();
        assert_eq!(sum, composed.total);
        assert_eq!(composed.lines.len(), 3);
        assert_eq!(composed.lines[1].description, "Discount: FIRST10");
        assert_eq!(composed.lines[2].description, "Tax (18%)");
    }

    #[test]
    fn zero_tax_and_discount_yield_single_line() {
        let snap = PriceBreakdown::compute(dec!(10), dec!(0), dec!(0)).snapshot();
        let composed = compose_lines("Thing - Plan x1", &snap, None);

        assert_eq!(composed.lines.len(), 1);
        assert_eq!(composed.discount_amount, None);
        assert_eq!(composed.discount_label, None);
        assert_eq!(composed.total, dec!(10));
    }
}
