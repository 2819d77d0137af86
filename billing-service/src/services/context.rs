//! Collaborators shared by the billing services.

use super::clock::Clock;
use super::metrics::record_invoice_generated;
use super::notifier::Notifier;
use super::store::BillingStore;
use crate::config::BillingSettings;
use crate::models::{BillingActor, Invoice};
use chrono::{Days, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct BillingContext {
    pub store: Arc<dyn BillingStore>,
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn Notifier>,
    pub settings: BillingSettings,
}

impl BillingContext {
    pub fn new(
        store: Arc<dyn BillingStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        settings: BillingSettings,
    ) -> Self {
        Self {
            store,
            clock,
            notifier,
            settings,
        }
    }

    /// Due date of subscribe-time and confirmation invoices.
    pub(crate) fn first_invoice_due(&self, today: NaiveDate) -> NaiveDate {
        today
            .checked_add_days(Days::new(u64::from(self.settings.invoice_due_days)))
            .unwrap_or(NaiveDate::MAX)
    }

    /// Count the invoice and tell its recipient. Delivery problems are logged
    /// and never surface to the caller.
    pub(crate) async fn invoice_issued(&self, invoice: &Invoice, source: &str) {
        record_invoice_generated(
            &invoice.company_id.to_string(),
            source,
            invoice.amount.to_f64().unwrap_or_default(),
        );

        let contact = match self.store.get_user(invoice.user_id).await {
            Ok(Some(user)) => user.contact(),
            Ok(None) => {
                tracing::warn!(
                    user_id = %invoice.user_id,
                    invoice_number = %invoice.invoice_number,
                    "Invoice recipient not found, notification skipped"
                );
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, invoice_number = %invoice.invoice_number, "Recipient lookup failed");
                return;
            }
        };

        if let Err(e) = self.notifier.invoice_issued(&contact, invoice).await {
            tracing::warn!(
                error = %e,
                to = %contact.email,
                invoice_number = %invoice.invoice_number,
                "Invoice notification failed"
            );
        }
    }
}

/// Records of another company are reported as missing.
pub(crate) fn ensure_company(
    actor: &BillingActor,
    company_id: Uuid,
    what: &str,
) -> Result<(), AppError> {
    if actor.company_id != company_id {
        return Err(AppError::NotFound(anyhow::anyhow!("{} not found", what)));
    }
    Ok(())
}
