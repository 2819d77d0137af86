//! Invoice review, payment and listing.

use super::context::{ensure_company, BillingContext};
use super::metrics::record_error;
use crate::models::{
    BillingActor, CreatePayment, Invoice, InvoicePatch, InvoiceStatus, InvoiceView, Payment, Role,
};
use rust_decimal::Decimal;
use service_core::error::AppError;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct InvoiceService {
    ctx: BillingContext,
}

impl InvoiceService {
    pub fn new(ctx: BillingContext) -> Self {
        Self { ctx }
    }

    async fn load(&self, actor: &BillingActor, invoice_id: Uuid) -> Result<Invoice, AppError> {
        let invoice = self
            .ctx
            .store
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;
        ensure_company(actor, invoice.company_id, "Invoice")?;
        Ok(invoice)
    }

    /// Pay an invoice in full. Only the billed user may pay.
    #[instrument(skip(self), fields(user_id = %actor.user_id))]
    pub async fn pay(
        &self,
        actor: &BillingActor,
        invoice_id: Uuid,
    ) -> Result<(Payment, Invoice), AppError> {
        let invoice = self.load(actor, invoice_id).await?;
        self.settle(actor, invoice, None, "online").await
    }

    /// Record a payment of `amount` by `method` and mark the invoice paid.
    #[instrument(skip(self), fields(user_id = %actor.user_id))]
    pub async fn record_payment(
        &self,
        actor: &BillingActor,
        invoice_id: Uuid,
        amount: Decimal,
        method: &str,
    ) -> Result<(Payment, Invoice), AppError> {
        if amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Payment amount must be positive"
            )));
        }
        let invoice = self.load(actor, invoice_id).await?;
        self.settle(actor, invoice, Some(amount), method).await
    }

    async fn settle(
        &self,
        actor: &BillingActor,
        invoice: Invoice,
        amount: Option<Decimal>,
        method: &str,
    ) -> Result<(Payment, Invoice), AppError> {
        if invoice.user_id != actor.user_id {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Invoice belongs to another user"
            )));
        }
        if invoice.stored_status().is_final() {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Invoice {} is already {}",
                invoice.invoice_number,
                invoice.status
            )));
        }

        let input = CreatePayment {
            company_id: invoice.company_id,
            invoice_id: invoice.invoice_id,
            user_id: actor.user_id,
            amount: amount.unwrap_or(invoice.amount),
            method: method.to_string(),
            paid_date: self.ctx.clock.today(),
        };

        let (payment, paid) = self
            .ctx
            .store
            .create_payment_and_mark_paid(&input)
            .await
            .inspect_err(|e| record_error(e.kind(), "pay_invoice"))?
            .ok_or_else(|| {
                AppError::Conflict(anyhow::anyhow!(
                    "Invoice {} was settled concurrently",
                    invoice.invoice_number
                ))
            })?;

        info!(
            invoice_number = %paid.invoice_number,
            payment_id = %payment.payment_id,
            amount = %payment.amount,
            method = %payment.method,
            "Invoice paid"
        );

        Ok((payment, paid))
    }

    #[instrument(skip(self), fields(user_id = %actor.user_id))]
    pub async fn confirm(&self, actor: &BillingActor, invoice_id: Uuid) -> Result<Invoice, AppError> {
        self.review(actor, invoice_id, InvoiceStatus::Confirmed).await
    }

    #[instrument(skip(self), fields(user_id = %actor.user_id))]
    pub async fn send(&self, actor: &BillingActor, invoice_id: Uuid) -> Result<Invoice, AppError> {
        self.review(actor, invoice_id, InvoiceStatus::Sent).await
    }

    #[instrument(skip(self), fields(user_id = %actor.user_id))]
    pub async fn print(&self, actor: &BillingActor, invoice_id: Uuid) -> Result<Invoice, AppError> {
        self.review(actor, invoice_id, InvoiceStatus::Printed).await
    }

    #[instrument(skip(self), fields(user_id = %actor.user_id))]
    pub async fn cancel(&self, actor: &BillingActor, invoice_id: Uuid) -> Result<Invoice, AppError> {
        self.review(actor, invoice_id, InvoiceStatus::Cancelled).await
    }

    /// Staff-only status change. Paid and cancelled invoices stay as they are.
    async fn review(
        &self,
        actor: &BillingActor,
        invoice_id: Uuid,
        next: InvoiceStatus,
    ) -> Result<Invoice, AppError> {
        if !actor.is_staff() {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Only internal or admin users can {} invoices",
                verb(next)
            )));
        }

        let invoice = self.load(actor, invoice_id).await?;
        let current = invoice.stored_status();
        if current.is_final() {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Invoice {} is already {}",
                invoice.invoice_number,
                current.as_str()
            )));
        }

        let patch = InvoicePatch {
            status: Some(next),
            paid_date: None,
        };
        let updated = self
            .ctx
            .store
            .update_invoice(invoice_id, &patch)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        info!(
            invoice_number = %updated.invoice_number,
            from = current.as_str(),
            to = next.as_str(),
            "Invoice status changed"
        );

        Ok(updated)
    }

    /// Invoices of the caller's company with overdue status derived for today.
    /// Plain users see only invoices billed to them.
    #[instrument(skip(self), fields(user_id = %actor.user_id))]
    pub async fn list_invoices(&self, actor: &BillingActor) -> Result<Vec<InvoiceView>, AppError> {
        let today = self.ctx.clock.today();
        let invoices = self.ctx.store.get_invoices(Some(actor.company_id)).await?;

        Ok(invoices
            .into_iter()
            .filter(|inv| actor.role != Role::User || inv.user_id == actor.user_id)
            .map(|invoice| InvoiceView {
                effective_status: invoice.effective_status(today),
                invoice,
            })
            .collect())
    }
}

fn verb(status: InvoiceStatus) -> &'static str {
    match status {
        InvoiceStatus::Confirmed => "confirm",
        InvoiceStatus::Sent => "send",
        InvoiceStatus::Printed => "print",
        InvoiceStatus::Cancelled => "cancel",
        _ => "update",
    }
}
