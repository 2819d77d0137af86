//! Pure pricing: base price, discounts, tax and invoice lines. No I/O.

mod calculator;
mod discount;
mod lines;

pub use calculator::{
    base_price, normalize_quantity, round_money, tax_amount, variant_extra, PriceBreakdown,
    PriceSnapshot,
};
pub use discount::{resolve_discount, AppliedDiscount, DiscountKind, DiscountRule, DiscountSource};
pub use lines::{compose_lines, line_description, ComposedInvoice};
