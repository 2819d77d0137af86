//! Plan and product models.

use chrono::{DateTime, Days, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::pricing::DiscountRule;

/// Billing period for plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingPeriod {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl BillingPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingPeriod::Daily => "daily",
            BillingPeriod::Weekly => "weekly",
            BillingPeriod::Monthly => "monthly",
            BillingPeriod::Yearly => "yearly",
        }
    }

    /// Parse a stored period. Unknown values yield `None` so callers can skip
    /// the plan rather than bill it on a guessed cadence.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(BillingPeriod::Daily),
            "weekly" => Some(BillingPeriod::Weekly),
            "monthly" => Some(BillingPeriod::Monthly),
            "yearly" => Some(BillingPeriod::Yearly),
            _ => None,
        }
    }

    /// Advance `date` by one period.
    ///
    /// Month and year steps are calendar steps: the day of month is kept and
    /// clamped to the last day of a shorter target month (Jan 31 -> Feb 28).
    pub fn advance(&self, date: NaiveDate) -> NaiveDate {
        let next = match self {
            BillingPeriod::Daily => date.checked_add_days(Days::new(1)),
            BillingPeriod::Weekly => date.checked_add_days(Days::new(7)),
            BillingPeriod::Monthly => date.checked_add_months(Months::new(1)),
            BillingPeriod::Yearly => date.checked_add_months(Months::new(12)),
        };
        next.unwrap_or(NaiveDate::MAX)
    }
}

/// Priced, recurring billing option of a product.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Plan {
    pub plan_id: Uuid,
    pub company_id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub billing_period: String,
    pub min_quantity: i32,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub pausable: bool,
    pub renewable: bool,
    pub closable: bool,
    pub auto_close: bool,
    pub discount_type: Option<String>,
    pub discount_value: Option<Decimal>,
    pub tax_percent: Option<Decimal>,
    pub created_utc: DateTime<Utc>,
}

impl Plan {
    pub fn period(&self) -> Option<BillingPeriod> {
        BillingPeriod::parse(&self.billing_period)
    }

    /// Tax percent of the plan, or `default` when the plan has none.
    pub fn tax_percent_or(&self, default: Decimal) -> Decimal {
        self.tax_percent.unwrap_or(default)
    }

    /// Built-in discount. Only set when both a type and a non-zero value exist.
    pub fn built_in_discount(&self) -> Option<DiscountRule> {
        match (&self.discount_type, self.discount_value) {
            (Some(kind), Some(value)) if !kind.trim().is_empty() && !value.is_zero() => {
                Some(DiscountRule::new(kind.trim(), value))
            }
            _ => None,
        }
    }
}

/// Product option carrying an optional surcharge, e.g. "Storage: 2TB".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductVariant {
    pub attribute: String,
    pub value: String,
    #[serde(default)]
    pub extra_price: Decimal,
}

/// Review state of a product.
///
/// ```text
/// draft -> pending_internal (admin assigns a reviewer)
/// pending_internal -> published (assigned reviewer approves)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Draft,
    PendingInternal,
    Published,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Draft => "draft",
            ProductStatus::PendingInternal => "pending_internal",
            ProductStatus::Published => "published",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(ProductStatus::Draft),
            "pending_internal" => Some(ProductStatus::PendingInternal),
            "published" => Some(ProductStatus::Published),
            _ => None,
        }
    }
}

/// Product of a company, reviewed by an internal user before plain users see it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub product_id: Uuid,
    pub company_id: Uuid,
    pub admin_id: Uuid,
    pub name: String,
    pub status: String,
    pub assigned_internal_id: Option<Uuid>,
    pub variants: Json<Vec<ProductVariant>>,
    pub created_utc: DateTime<Utc>,
}

impl Product {
    pub fn status(&self) -> Option<ProductStatus> {
        ProductStatus::parse(&self.status)
    }

    pub fn is_published(&self) -> bool {
        self.status() == Some(ProductStatus::Published)
    }
}

/// Partial update of a product's review state.
#[derive(Debug, Clone, Default)]
pub struct ProductPatch {
    pub status: Option<ProductStatus>,
    pub assigned_internal_id: Option<Uuid>,
}

impl ProductPatch {
    pub fn apply_to(&self, product: &mut Product) {
        if let Some(status) = self.status {
            product.status = status.as_str().to_string();
        }
        if let Some(reviewer) = self.assigned_internal_id {
            product.assigned_internal_id = Some(reviewer);
        }
    }
}

/// Input for creating a plan.
#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_plan_discount"))]
pub struct CreatePlan {
    pub product_id: Uuid,
    #[validate(length(min = 1, message = "Plan name is required"))]
    pub name: String,
    #[validate(custom(function = "validate_price"))]
    pub price: Decimal,
    #[validate(custom(function = "validate_billing_period"))]
    pub billing_period: String,
    #[validate(range(min = 1, message = "Minimum quantity must be at least 1"))]
    #[serde(default = "default_min_quantity")]
    pub min_quantity: i32,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub pausable: bool,
    #[serde(default = "default_true")]
    pub renewable: bool,
    #[serde(default = "default_true")]
    pub closable: bool,
    #[serde(default)]
    pub auto_close: bool,
    pub discount_type: Option<String>,
    pub discount_value: Option<Decimal>,
    #[validate(custom(function = "validate_tax_percent"))]
    pub tax_percent: Option<Decimal>,
}

fn default_min_quantity() -> i32 {
    1
}

fn default_true() -> bool {
    true
}

fn validate_price(price: &Decimal) -> Result<(), ValidationError> {
    if price.is_sign_negative() {
        return Err(ValidationError::new("negative_price"));
    }
    Ok(())
}

fn validate_billing_period(period: &str) -> Result<(), ValidationError> {
    BillingPeriod::parse(period)
        .map(|_| ())
        .ok_or_else(|| ValidationError::new("unknown_billing_period"))
}

fn validate_tax_percent(tax: &Decimal) -> Result<(), ValidationError> {
    if tax.is_sign_negative() || *tax > Decimal::ONE_HUNDRED {
        return Err(ValidationError::new("tax_percent_out_of_range"));
    }
    Ok(())
}

fn validate_plan_discount(plan: &CreatePlan) -> Result<(), ValidationError> {
    match (&plan.discount_type, plan.discount_value) {
        (None, None) => Ok(()),
        (Some(_), None) | (None, Some(_)) => Err(ValidationError::new("discount_type_and_value")),
        (Some(kind), Some(value)) => {
            if value.is_sign_negative() {
                return Err(ValidationError::new("negative_discount"));
            }
            if crate::pricing::DiscountKind::parse(kind).is_none() {
                return Err(ValidationError::new("unknown_discount_type"));
            }
            Ok(())
        }
    }
}

/// Input for creating a product.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateProduct {
    #[validate(length(min = 1, message = "Product name is required"))]
    pub name: String,
    #[serde(default)]
    pub variants: Vec<ProductVariant>,
}
