//! Company discount codes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Named promotional code owned by a company.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Discount {
    pub discount_id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub discount_type: String,
    pub value: Decimal,
    pub active: bool,
    pub created_utc: DateTime<Utc>,
}

/// Canonical form of a discount code: trimmed and upper-cased.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Input for creating a discount code.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateDiscount {
    #[validate(length(min = 1, message = "Discount name is required"))]
    pub name: String,
    #[validate(custom(function = "validate_discount_type"))]
    pub discount_type: String,
    #[validate(custom(function = "validate_discount_value"))]
    pub value: Decimal,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

fn validate_discount_type(kind: &str) -> Result<(), ValidationError> {
    crate::pricing::DiscountKind::parse(kind)
        .map(|_| ())
        .ok_or_else(|| ValidationError::new("unknown_discount_type"))
}

fn validate_discount_value(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() {
        return Err(ValidationError::new("negative_discount"));
    }
    Ok(())
}
