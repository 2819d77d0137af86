//! Daily recurring billing sweep.
//!
//! Two passes over active subscriptions:
//!
//! 1. close subscriptions whose end date has passed;
//! 2. issue one renewal invoice for every subscription whose next cycle
//!    boundary (last invoice due date plus one billing period) is today or
//!    earlier.
//!
//! Each subscription is processed on its own. A failure is recorded in the
//! [`SweepSummary`] and the sweep moves on to the next record. Running the
//! sweep again on the same day issues nothing new, since the fresh invoice
//! pushes the next boundary past today.

use super::context::BillingContext;
use super::metrics::{record_error, record_subscription_closed, record_sweep};
use super::sequence::{next_number, SequenceKind};
use crate::config::RenewalAnchor;
use crate::models::{
    BillingPeriod, CreateInvoice, Invoice, Subscription, SubscriptionPatch, SubscriptionStatus,
};
use crate::pricing::{
    base_price, compose_lines, line_description, variant_extra, PriceBreakdown,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct SweepFailure {
    pub subscription_id: Uuid,
    pub error: String,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepSummary {
    pub closed: usize,
    pub generated: usize,
    pub skipped: usize,
    pub failures: Vec<SweepFailure>,
}

enum Renewal {
    Issued(Invoice),
    NotDue,
    Skipped(&'static str),
}

#[derive(Clone)]
pub struct BillingSweep {
    ctx: BillingContext,
}

impl BillingSweep {
    pub fn new(ctx: BillingContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self))]
    pub async fn run_daily_billing_sweep(&self) -> Result<SweepSummary, AppError> {
        let today = self.ctx.clock.today();
        let mut summary = SweepSummary::default();

        info!(%today, "Billing sweep started");

        let expiring = self
            .ctx
            .store
            .get_active_subscriptions()
            .await
            .inspect_err(|_| record_sweep("failed"))?;
        for sub in expiring
            .iter()
            .filter(|s| s.end_date.is_some_and(|end| end < today))
        {
            match self.close(sub).await {
                Ok(true) => summary.closed += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => summary.fail(sub.subscription_id, "close_subscription", e),
            }
        }
        info!(closed = summary.closed, "Expired subscriptions closed");

        let active = self
            .ctx
            .store
            .get_active_subscriptions()
            .await
            .inspect_err(|_| record_sweep("failed"))?;
        for sub in &active {
            match self.renew(sub, today).await {
                Ok(Renewal::Issued(invoice)) => {
                    summary.generated += 1;
                    self.ctx.invoice_issued(&invoice, "renewal").await;
                }
                Ok(Renewal::NotDue) => {}
                Ok(Renewal::Skipped(reason)) => {
                    summary.skipped += 1;
                    warn!(subscription_id = %sub.subscription_id, reason, "Renewal skipped");
                }
                Err(e) => summary.fail(sub.subscription_id, "renew_subscription", e),
            }
        }

        record_sweep(if summary.failures.is_empty() {
            "completed"
        } else {
            "partial"
        });
        info!(
            closed = summary.closed,
            generated = summary.generated,
            skipped = summary.skipped,
            failed = summary.failures.len(),
            "Billing sweep finished"
        );

        Ok(summary)
    }

    /// Close one expired subscription. `false` when it no longer exists.
    async fn close(&self, sub: &Subscription) -> Result<bool, AppError> {
        let patch = SubscriptionPatch::status(SubscriptionStatus::Closed);
        let Some(closed) = self
            .ctx
            .store
            .update_subscription(sub.subscription_id, &patch)
            .await?
        else {
            return Ok(false);
        };

        record_subscription_closed(&closed.company_id.to_string());
        info!(
            subscription_id = %closed.subscription_id,
            subscription_number = %closed.subscription_number,
            "Subscription closed"
        );
        Ok(true)
    }

    async fn renew(&self, sub: &Subscription, today: NaiveDate) -> Result<Renewal, AppError> {
        let store = self.ctx.store.as_ref();

        let Some(plan) = store.get_plan(sub.plan_id).await? else {
            return Ok(Renewal::Skipped("plan no longer exists"));
        };
        let Some(period) = plan.period() else {
            return Ok(Renewal::Skipped("unknown billing period"));
        };

        let invoices = store
            .list_invoices_for_subscription(sub.subscription_id)
            .await?;
        let Some(last) = invoices.iter().max_by_key(|i| i.due_date) else {
            return Ok(Renewal::Skipped("no invoice issued yet"));
        };

        let next_due = period.advance(last.due_date);
        if today < next_due {
            return Ok(Renewal::NotDue);
        }

        let product = store.get_product(sub.product_id).await?;
        let extra = product
            .as_ref()
            .map_or(Decimal::ZERO, |p| variant_extra(&p.variants, &sub.selected_variants));
        let base = base_price(plan.price, extra, sub.quantity);
        let tax_percent = plan.tax_percent_or(self.ctx.settings.default_tax_percent);
        let price = PriceBreakdown::compute(base, Decimal::ZERO, tax_percent).snapshot();

        let product_name = product.as_ref().map_or("Product", |p| p.name.as_str());
        let description =
            line_description(product_name, &plan.name, sub.quantity, &sub.selected_variants);
        let composed = compose_lines(&description, &price, None);

        let due_date = match self.ctx.settings.renewal_anchor {
            RenewalAnchor::Sweep => period.advance(today),
            RenewalAnchor::Cadence => cadence_due_date(period, next_due, today),
        };

        let input = CreateInvoice {
            invoice_number: next_number(store, SequenceKind::Invoice, today).await?,
            company_id: sub.company_id,
            subscription_id: sub.subscription_id,
            user_id: sub.user_id,
            amount: composed.total,
            due_date,
            lines: composed.lines,
            subtotal: composed.subtotal,
            tax_amount: composed.tax_amount,
            tax_percent: composed.tax_percent,
            discount_amount: composed.discount_amount,
            discount_label: composed.discount_label,
        };
        let invoice = store.create_invoice(&input).await?;

        info!(
            subscription_id = %sub.subscription_id,
            invoice_number = %invoice.invoice_number,
            amount = %invoice.amount,
            due_date = %invoice.due_date,
            "Renewal invoice issued"
        );

        Ok(Renewal::Issued(invoice))
    }
}

/// Due date of a cadence-anchored renewal.
///
/// Cycles missed while the sweep was not running collapse into this one
/// invoice: the due date moves along the cadence until the following
/// boundary lies after `today`, so a re-run on the same day finds nothing due.
fn cadence_due_date(period: BillingPeriod, next_due: NaiveDate, today: NaiveDate) -> NaiveDate {
    let mut due = period.advance(next_due);
    loop {
        let following = period.advance(due);
        if following > today || following == due {
            return due;
        }
        due = following;
    }
}

impl SweepSummary {
    fn fail(&mut self, subscription_id: Uuid, operation: &str, error: AppError) {
        record_error(error.kind(), operation);
        warn!(%subscription_id, error = %error, operation, "Sweep step failed");
        self.failures.push(SweepFailure {
            subscription_id,
            error: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::cadence_due_date;
    use crate::models::BillingPeriod;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn on_time_renewal_is_due_one_period_after_the_boundary() {
        let due = cadence_due_date(BillingPeriod::Monthly, date(2025, 2, 15), date(2025, 2, 15));
        assert_eq!(due, date(2025, 3, 15));
    }

    #[test]
    fn missed_cycles_collapse_into_one_due_date() {
        // last invoice due 01-10, next boundary 01-11, sweep resumes on 01-15
        let due = cadence_due_date(BillingPeriod::Daily, date(2025, 1, 11), date(2025, 1, 15));
        assert_eq!(due, date(2025, 1, 15));
        assert!(BillingPeriod::Daily.advance(due) > date(2025, 1, 15));

        let due = cadence_due_date(BillingPeriod::Monthly, date(2025, 2, 15), date(2025, 5, 1));
        assert_eq!(due, date(2025, 4, 15));
    }
}
