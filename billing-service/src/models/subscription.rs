//! Subscription model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;
use validator::Validate;

/// Subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Draft,
    Active,
    Quotation,
    Closed,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Draft => "draft",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Quotation => "quotation",
            SubscriptionStatus::Closed => "closed",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    /// Parse a stored status. Unknown values yield `None`; such a record is
    /// neither billed nor moved through the lifecycle.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(SubscriptionStatus::Draft),
            "active" => Some(SubscriptionStatus::Active),
            "quotation" => Some(SubscriptionStatus::Quotation),
            "closed" => Some(SubscriptionStatus::Closed),
            "cancelled" => Some(SubscriptionStatus::Cancelled),
            _ => None,
        }
    }

    /// Allowed lifecycle moves:
    ///
    /// ```text
    /// draft -> active | quotation
    /// active -> quotation | closed
    /// quotation -> active
    /// any open state -> cancelled
    /// ```
    pub fn can_transition_to(&self, next: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (*self, next),
            (Draft, Active)
                | (Draft, Quotation)
                | (Active, Quotation)
                | (Active, Closed)
                | (Quotation, Active)
                | (Draft, Cancelled)
                | (Active, Cancelled)
                | (Quotation, Cancelled)
        )
    }
}

/// Subscription with its cached pricing snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub subscription_id: Uuid,
    pub subscription_number: String,
    pub company_id: Uuid,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub plan_id: Uuid,
    pub quantity: i32,
    pub status: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub selected_variants: Json<BTreeMap<String, String>>,
    pub discount_type: Option<String>,
    pub discount_value: Option<Decimal>,
    pub discount_code: Option<String>,
    pub discount_amount: Decimal,
    pub base_price: Decimal,
    pub subtotal: Decimal,
    pub tax_percent: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Subscription {
    pub fn status(&self) -> Option<SubscriptionStatus> {
        SubscriptionStatus::parse(&self.status)
    }
}

/// Input for creating a subscription record. The id is minted by the caller
/// so the first invoice can reference it inside the same unit of work.
#[derive(Debug, Clone)]
pub struct CreateSubscription {
    pub subscription_id: Uuid,
    pub subscription_number: String,
    pub company_id: Uuid,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub plan_id: Uuid,
    pub quantity: i32,
    pub status: SubscriptionStatus,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub selected_variants: BTreeMap<String, String>,
    pub discount_type: Option<String>,
    pub discount_value: Option<Decimal>,
    pub discount_code: Option<String>,
    pub discount_amount: Decimal,
    pub base_price: Decimal,
    pub subtotal: Decimal,
    pub tax_percent: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
}

/// Pricing fields written together when a subscription is re-priced.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingPatch {
    pub discount_type: Option<String>,
    pub discount_value: Option<Decimal>,
    pub discount_code: Option<String>,
    pub discount_amount: Decimal,
    pub base_price: Decimal,
    pub subtotal: Decimal,
    pub tax_percent: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
}

/// Partial update of a subscription. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionPatch {
    pub plan_id: Option<Uuid>,
    pub status: Option<SubscriptionStatus>,
    pub start_date: Option<NaiveDate>,
    pub pricing: Option<PricingPatch>,
}

impl SubscriptionPatch {
    pub fn status(status: SubscriptionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Apply the patch to an in-memory record.
    pub fn apply_to(&self, sub: &mut Subscription, now: DateTime<Utc>) {
        if let Some(plan_id) = self.plan_id {
            sub.plan_id = plan_id;
        }
        if let Some(status) = self.status {
            sub.status = status.as_str().to_string();
        }
        if let Some(start_date) = self.start_date {
            sub.start_date = start_date;
        }
        if let Some(p) = &self.pricing {
            sub.discount_type = p.discount_type.clone();
            sub.discount_value = p.discount_value;
            sub.discount_code = p.discount_code.clone();
            sub.discount_amount = p.discount_amount;
            sub.base_price = p.base_price;
            sub.subtotal = p.subtotal;
            sub.tax_percent = p.tax_percent;
            sub.tax_amount = p.tax_amount;
            sub.total = p.total;
        }
        sub.updated_utc = now;
    }
}

/// Subscribe request as received from the route layer.
///
/// `quantity` is kept loose: absent, non-numeric or sub-1 values bill a single unit.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct SubscribeRequest {
    #[validate(required(message = "Product ID is required"))]
    pub product_id: Option<Uuid>,
    #[validate(required(message = "Plan ID is required"))]
    pub plan_id: Option<Uuid>,
    #[serde(default)]
    pub quantity: Option<serde_json::Value>,
    pub discount_code: Option<String>,
    #[serde(default)]
    pub selected_variants: BTreeMap<String, String>,
    pub end_date: Option<NaiveDate>,
    /// Save as a draft without an invoice; confirmation issues the first invoice.
    #[serde(default)]
    pub draft: bool,
}
