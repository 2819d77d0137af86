//! Subscription lifecycle: subscribe, upgrade, confirm, quote and cancel.

use super::context::{ensure_company, BillingContext};
use super::metrics::{record_error, record_subscription_operation};
use super::sequence::{next_number, SequenceKind};
use crate::models::{
    BillingActor, CreateInvoice, CreateSubscription, Invoice, PricingPatch, Role,
    SubscribeRequest, Subscription, SubscriptionPatch, SubscriptionStatus,
};
use crate::pricing::{
    base_price, compose_lines, line_description, normalize_quantity, resolve_discount,
    variant_extra, ComposedInvoice, PriceBreakdown, PriceSnapshot,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::AppError;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// A persisted subscription and, unless it was saved as a draft, its first invoice.
#[derive(Debug, Clone)]
pub struct SubscriptionReceipt {
    pub subscription: Subscription,
    pub invoice: Option<Invoice>,
}

#[derive(Clone)]
pub struct SubscriptionService {
    ctx: BillingContext,
}

impl SubscriptionService {
    pub fn new(ctx: BillingContext) -> Self {
        Self { ctx }
    }

    async fn load(&self, subscription_id: Uuid) -> Result<Subscription, AppError> {
        self.ctx
            .store
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subscription not found")))
    }

    async fn invoice_for(
        &self,
        (company_id, subscription_id, user_id): (Uuid, Uuid, Uuid),
        composed: ComposedInvoice,
        today: NaiveDate,
    ) -> Result<CreateInvoice, AppError> {
        Ok(CreateInvoice {
            invoice_number: next_number(self.ctx.store.as_ref(), SequenceKind::Invoice, today)
                .await?,
            company_id,
            subscription_id,
            user_id,
            amount: composed.total,
            due_date: self.ctx.first_invoice_due(today),
            lines: composed.lines,
            subtotal: composed.subtotal,
            tax_amount: composed.tax_amount,
            tax_percent: composed.tax_percent,
            discount_amount: composed.discount_amount,
            discount_label: composed.discount_label,
        })
    }

    /// Price and persist a new subscription with its first invoice.
    ///
    /// The subscription and invoice are written in one unit of work. With
    /// `request.draft` only the subscription is written, as a draft.
    #[instrument(skip(self, request), fields(user_id = %actor.user_id, company_id = %actor.company_id))]
    pub async fn subscribe(
        &self,
        actor: &BillingActor,
        request: SubscribeRequest,
    ) -> Result<SubscriptionReceipt, AppError> {
        request.validate()?;
        let (Some(product_id), Some(plan_id)) = (request.product_id, request.plan_id) else {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Product ID and plan ID are required"
            )));
        };

        let store = self.ctx.store.as_ref();

        let plan = store
            .get_plan(plan_id)
            .await?
            .filter(|p| p.company_id == actor.company_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Plan not found")))?;
        let product = store
            .get_product(plan.product_id)
            .await?
            .filter(|p| p.product_id == product_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Product not found")))?;

        let quantity = normalize_quantity(request.quantity.as_ref());
        let extra = variant_extra(&product.variants, &request.selected_variants);
        let base = base_price(plan.price, extra, quantity);

        let code = request
            .discount_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());
        let company_discounts = match code {
            Some(_) => store.get_discounts(actor.company_id).await?,
            None => Vec::new(),
        };
        let applied = resolve_discount(base, plan.built_in_discount(), code, &company_discounts);

        let tax_percent = plan.tax_percent_or(self.ctx.settings.default_tax_percent);
        let discount_amount = applied.as_ref().map_or(Decimal::ZERO, |a| a.amount);
        let price = PriceBreakdown::compute(base, discount_amount, tax_percent).snapshot();

        let today = self.ctx.clock.today();
        let status = if request.draft {
            SubscriptionStatus::Draft
        } else {
            SubscriptionStatus::Active
        };

        let input = CreateSubscription {
            subscription_id: Uuid::new_v4(),
            subscription_number: next_number(store, SequenceKind::Subscription, today).await?,
            company_id: actor.company_id,
            user_id: actor.user_id,
            product_id: product.product_id,
            plan_id: plan.plan_id,
            quantity,
            status,
            start_date: today,
            end_date: request.end_date,
            selected_variants: request.selected_variants.clone(),
            discount_type: applied
                .as_ref()
                .map(|a| a.source.rule().discount_type.clone()),
            discount_value: applied.as_ref().map(|a| a.source.rule().value),
            discount_code: applied
                .as_ref()
                .and_then(|a| a.source.code().map(str::to_string)),
            discount_amount: price.discount,
            base_price: price.base,
            subtotal: price.subtotal,
            tax_percent: price.tax_percent,
            tax_amount: price.tax,
            total: price.total,
        };

        if request.draft {
            let subscription = store.create_subscription(&input).await?;
            record_subscription_operation(&actor.company_id.to_string(), "draft");
            info!(
                subscription_id = %subscription.subscription_id,
                subscription_number = %subscription.subscription_number,
                "Draft subscription saved"
            );
            return Ok(SubscriptionReceipt {
                subscription,
                invoice: None,
            });
        }

        let description = line_description(
            &product.name,
            &plan.name,
            quantity,
            &request.selected_variants,
        );
        let label = applied.as_ref().map(|a| a.source.label());
        let composed = compose_lines(&description, &price, label.as_deref());

        let invoice_input = self
            .invoice_for(
                (input.company_id, input.subscription_id, input.user_id),
                composed,
                today,
            )
            .await?;

        let (subscription, invoice) = store
            .create_subscription_with_invoice(&input, &invoice_input)
            .await
            .inspect_err(|e| record_error(e.kind(), "subscribe"))?;

        record_subscription_operation(&actor.company_id.to_string(), "subscribe");
        info!(
            subscription_id = %subscription.subscription_id,
            subscription_number = %subscription.subscription_number,
            invoice_number = %invoice.invoice_number,
            total = %subscription.total,
            "Subscription created"
        );
        self.ctx.invoice_issued(&invoice, "subscribe").await;

        Ok(SubscriptionReceipt {
            subscription,
            invoice: Some(invoice),
        })
    }

    /// Move an owned subscription to another plan of the same product.
    ///
    /// The pricing snapshot is recomputed from the new plan price alone:
    /// variant surcharges and any subscribe-time discount are dropped. No
    /// invoice is issued; the next cycle bills the new price.
    #[instrument(skip(self), fields(user_id = %actor.user_id))]
    pub async fn upgrade(
        &self,
        actor: &BillingActor,
        subscription_id: Uuid,
        new_plan_id: Uuid,
    ) -> Result<Subscription, AppError> {
        let sub = self.load(subscription_id).await?;
        ensure_company(actor, sub.company_id, "Subscription")?;
        if sub.user_id != actor.user_id {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Subscription belongs to another user"
            )));
        }
        if !matches!(
            sub.status(),
            Some(
                SubscriptionStatus::Draft
                    | SubscriptionStatus::Active
                    | SubscriptionStatus::Quotation
            )
        ) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Cannot change the plan of a {} subscription",
                sub.status
            )));
        }

        let plan = self
            .ctx
            .store
            .get_plan(new_plan_id)
            .await?
            .filter(|p| p.company_id == actor.company_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Plan not found")))?;
        if plan.product_id != sub.product_id {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Plan {} belongs to a different product",
                plan.plan_id
            )));
        }

        let base = base_price(plan.price, Decimal::ZERO, sub.quantity);
        let tax_percent = plan.tax_percent_or(self.ctx.settings.default_tax_percent);
        let price = PriceBreakdown::compute(base, Decimal::ZERO, tax_percent).snapshot();

        let patch = SubscriptionPatch {
            plan_id: Some(plan.plan_id),
            pricing: Some(PricingPatch {
                discount_type: None,
                discount_value: None,
                discount_code: None,
                discount_amount: price.discount,
                base_price: price.base,
                subtotal: price.subtotal,
                tax_percent: price.tax_percent,
                tax_amount: price.tax,
                total: price.total,
            }),
            ..Default::default()
        };

        let updated = self
            .ctx
            .store
            .update_subscription(subscription_id, &patch)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subscription not found")))?;

        record_subscription_operation(&actor.company_id.to_string(), "upgrade");
        info!(
            subscription_id = %updated.subscription_id,
            plan_id = %plan.plan_id,
            total = %updated.total,
            "Subscription plan changed"
        );

        Ok(updated)
    }

    /// Activate a draft or quotation, starting it today and issuing its first
    /// invoice from the stored pricing snapshot.
    #[instrument(skip(self), fields(user_id = %actor.user_id))]
    pub async fn confirm(
        &self,
        actor: &BillingActor,
        subscription_id: Uuid,
    ) -> Result<SubscriptionReceipt, AppError> {
        let sub = self.load(subscription_id).await?;
        ensure_company(actor, sub.company_id, "Subscription")?;
        if !actor.is_admin() && sub.user_id != actor.user_id {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Only the subscriber or a company admin can confirm"
            )));
        }
        if !sub
            .status()
            .is_some_and(|s| s.can_transition_to(SubscriptionStatus::Active))
        {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Cannot confirm a {} subscription",
                sub.status
            )));
        }

        let store = self.ctx.store.as_ref();
        let product_name = store
            .get_product(sub.product_id)
            .await?
            .map_or_else(|| "Product".to_string(), |p| p.name);
        let plan_name = store
            .get_plan(sub.plan_id)
            .await?
            .map_or_else(|| "Plan".to_string(), |p| p.name);

        let price = PriceSnapshot {
            base: sub.base_price,
            discount: sub.discount_amount,
            subtotal: sub.subtotal,
            tax_percent: sub.tax_percent,
            tax: sub.tax_amount,
            total: sub.total,
        };
        let description =
            line_description(&product_name, &plan_name, sub.quantity, &sub.selected_variants);
        let composed = compose_lines(&description, &price, sub.discount_code.as_deref());

        let today = self.ctx.clock.today();
        let invoice_input = self
            .invoice_for((sub.company_id, sub.subscription_id, sub.user_id), composed, today)
            .await?;

        let (subscription, invoice) = store
            .activate_subscription_with_invoice(subscription_id, today, &invoice_input)
            .await?
            .ok_or_else(|| {
                AppError::Conflict(anyhow::anyhow!(
                    "Subscription {} was confirmed concurrently",
                    subscription_id
                ))
            })?;

        record_subscription_operation(&actor.company_id.to_string(), "confirm");
        info!(
            subscription_id = %subscription.subscription_id,
            invoice_number = %invoice.invoice_number,
            "Subscription confirmed"
        );
        self.ctx.invoice_issued(&invoice, "confirm").await;

        Ok(SubscriptionReceipt {
            subscription,
            invoice: Some(invoice),
        })
    }

    /// Turn a subscription into a quotation awaiting confirmation. Admins only.
    #[instrument(skip(self), fields(user_id = %actor.user_id))]
    pub async fn send_quote(
        &self,
        actor: &BillingActor,
        subscription_id: Uuid,
    ) -> Result<Subscription, AppError> {
        if !actor.is_admin() {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Only admins can send quotations"
            )));
        }
        self.transition(actor, subscription_id, SubscriptionStatus::Quotation, "send_quote")
            .await
    }

    /// Cancel a subscription. Allowed for its subscriber and company admins.
    #[instrument(skip(self), fields(user_id = %actor.user_id))]
    pub async fn cancel(
        &self,
        actor: &BillingActor,
        subscription_id: Uuid,
    ) -> Result<Subscription, AppError> {
        let sub = self.load(subscription_id).await?;
        ensure_company(actor, sub.company_id, "Subscription")?;
        if !actor.is_admin() && sub.user_id != actor.user_id {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Only the subscriber or a company admin can cancel"
            )));
        }
        self.transition(actor, subscription_id, SubscriptionStatus::Cancelled, "cancel")
            .await
    }

    async fn transition(
        &self,
        actor: &BillingActor,
        subscription_id: Uuid,
        next: SubscriptionStatus,
        operation: &str,
    ) -> Result<Subscription, AppError> {
        let sub = self.load(subscription_id).await?;
        ensure_company(actor, sub.company_id, "Subscription")?;

        let Some(current) = sub.status().filter(|s| s.can_transition_to(next)) else {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Cannot move subscription from {} to {}",
                sub.status,
                next.as_str()
            )));
        };

        let updated = self
            .ctx
            .store
            .update_subscription(subscription_id, &SubscriptionPatch::status(next))
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subscription not found")))?;

        record_subscription_operation(&actor.company_id.to_string(), operation);
        info!(
            subscription_id = %subscription_id,
            from = current.as_str(),
            to = next.as_str(),
            "Subscription status changed"
        );

        Ok(updated)
    }

    /// Subscriptions of the caller's company; plain users see only their own.
    #[instrument(skip(self), fields(user_id = %actor.user_id))]
    pub async fn list_subscriptions(
        &self,
        actor: &BillingActor,
    ) -> Result<Vec<Subscription>, AppError> {
        let subs = self
            .ctx
            .store
            .get_subscriptions(Some(actor.company_id))
            .await?;

        Ok(match actor.role {
            Role::User => subs
                .into_iter()
                .filter(|s| s.user_id == actor.user_id)
                .collect(),
            Role::Admin | Role::Internal => subs,
        })
    }
}
