//! Invoice and payment models.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice status. `Overdue` is derived on read and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Confirmed,
    Sent,
    Printed,
    Paid,
    Cancelled,
    Overdue,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Confirmed => "confirmed",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Printed => "printed",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
            InvoiceStatus::Overdue => "overdue",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "confirmed" => InvoiceStatus::Confirmed,
            "sent" => InvoiceStatus::Sent,
            "printed" => InvoiceStatus::Printed,
            "paid" => InvoiceStatus::Paid,
            "cancelled" => InvoiceStatus::Cancelled,
            "overdue" => InvoiceStatus::Overdue,
            _ => InvoiceStatus::Pending,
        }
    }

    /// Paid and cancelled invoices are final.
    pub fn is_final(&self) -> bool {
        matches!(self, InvoiceStatus::Paid | InvoiceStatus::Cancelled)
    }
}

/// One presentational invoice line. Discount lines carry a negative amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub description: String,
    pub amount: Decimal,
}

/// Invoice issued for one billing cycle of a subscription.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub company_id: Uuid,
    pub subscription_id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub status: String,
    pub due_date: NaiveDate,
    pub paid_date: Option<NaiveDate>,
    pub lines: Json<Vec<InvoiceLine>>,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub tax_percent: Decimal,
    pub discount_amount: Option<Decimal>,
    pub discount_label: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Invoice {
    pub fn stored_status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }

    /// Status as shown to callers: pending invoices past their due date are overdue.
    pub fn effective_status(&self, today: NaiveDate) -> InvoiceStatus {
        match self.stored_status() {
            InvoiceStatus::Pending if self.due_date < today => InvoiceStatus::Overdue,
            status => status,
        }
    }
}

/// Input for creating an invoice.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub invoice_number: String,
    pub company_id: Uuid,
    pub subscription_id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub due_date: NaiveDate,
    pub lines: Vec<InvoiceLine>,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub tax_percent: Decimal,
    pub discount_amount: Option<Decimal>,
    pub discount_label: Option<String>,
}

/// Status change for an invoice.
#[derive(Debug, Clone, Default)]
pub struct InvoicePatch {
    pub status: Option<InvoiceStatus>,
    pub paid_date: Option<NaiveDate>,
}

impl InvoicePatch {
    pub fn apply_to(&self, invoice: &mut Invoice, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            invoice.status = status.as_str().to_string();
        }
        if let Some(paid_date) = self.paid_date {
            invoice.paid_date = Some(paid_date);
        }
        invoice.updated_utc = now;
    }
}

/// Invoice as listed to callers, with the derived status applied.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceView {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub effective_status: InvoiceStatus,
}

/// Payment recorded against an invoice.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub payment_id: Uuid,
    pub company_id: Uuid,
    pub invoice_id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub method: String,
    pub paid_date: NaiveDate,
    pub created_utc: DateTime<Utc>,
}

/// Input for recording a payment.
#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub company_id: Uuid,
    pub invoice_id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub method: String,
    pub paid_date: NaiveDate,
}
