//! Company revenue report.

use super::context::BillingContext;
use crate::models::{BillingActor, InvoiceStatus, SubscriptionStatus};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use std::collections::BTreeMap;
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevenueSummary {
    pub active_subscriptions: usize,
    /// Sum of all recorded payments.
    pub total_revenue: Decimal,
    /// Sum of pending invoices already past their due date.
    pub overdue_amount: Decimal,
    /// Payments grouped by `YYYY-MM` of the paid date.
    pub monthly_revenue: BTreeMap<String, Decimal>,
}

#[derive(Clone)]
pub struct ReportService {
    ctx: BillingContext,
}

impl ReportService {
    pub fn new(ctx: BillingContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self), fields(company_id = %actor.company_id))]
    pub async fn revenue_summary(&self, actor: &BillingActor) -> Result<RevenueSummary, AppError> {
        if !actor.is_admin() {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Only admins can view reports"
            )));
        }

        let store = self.ctx.store.as_ref();
        let today = self.ctx.clock.today();

        let subs = store.get_subscriptions(Some(actor.company_id)).await?;
        let invoices = store.get_invoices(Some(actor.company_id)).await?;
        let payments = store.get_payments(actor.company_id).await?;

        let active_subscriptions = subs
            .iter()
            .filter(|s| s.status() == Some(SubscriptionStatus::Active))
            .count();

        let overdue_amount: Decimal = invoices
            .iter()
            .filter(|i| i.effective_status(today) == InvoiceStatus::Overdue)
            .map(|i| i.amount)
            .sum();

        let mut total_revenue = Decimal::ZERO;
        let mut monthly_revenue = BTreeMap::new();
        for payment in &payments {
            total_revenue += payment.amount;
            *monthly_revenue
                .entry(payment.paid_date.format("%Y-%m").to_string())
                .or_insert(Decimal::ZERO) += payment.amount;
        }

        Ok(RevenueSummary {
            active_subscriptions,
            total_revenue,
            overdue_amount,
            monthly_revenue,
        })
    }
}
