//! In-memory store for tests and database-less local runs.

use super::store::BillingStore;
use crate::models::{
    normalize_code, CreateDiscount, CreateInvoice, CreatePayment, CreatePlan, CreateProduct,
    CreateSubscription, CreateUser, Discount, Invoice, InvoicePatch, InvoiceStatus, Payment, Plan,
    Product, ProductPatch, ProductStatus, Subscription, SubscriptionPatch, SubscriptionStatus,
    User,
};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use service_core::error::AppError;
use sqlx::types::Json;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    products: HashMap<Uuid, Product>,
    plans: HashMap<Uuid, Plan>,
    discounts: HashMap<Uuid, Discount>,
    users: HashMap<Uuid, User>,
    subscriptions: HashMap<Uuid, Subscription>,
    invoices: HashMap<Uuid, Invoice>,
    payments: Vec<Payment>,
    sequences: HashMap<(String, NaiveDate), i64>,
}

impl Tables {
    fn insert_subscription(&mut self, input: &CreateSubscription) -> Result<Subscription, AppError> {
        if self.subscriptions.contains_key(&input.subscription_id) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Subscription {} already exists",
                input.subscription_id
            )));
        }
        let now = Utc::now();
        let sub = Subscription {
            subscription_id: input.subscription_id,
            subscription_number: input.subscription_number.clone(),
            company_id: input.company_id,
            user_id: input.user_id,
            product_id: input.product_id,
            plan_id: input.plan_id,
            quantity: input.quantity,
            status: input.status.as_str().to_string(),
            start_date: input.start_date,
            end_date: input.end_date,
            selected_variants: Json(input.selected_variants.clone()),
            discount_type: input.discount_type.clone(),
            discount_value: input.discount_value,
            discount_code: input.discount_code.clone(),
            discount_amount: input.discount_amount,
            base_price: input.base_price,
            subtotal: input.subtotal,
            tax_percent: input.tax_percent,
            tax_amount: input.tax_amount,
            total: input.total,
            created_utc: now,
            updated_utc: now,
        };
        self.subscriptions.insert(sub.subscription_id, sub.clone());
        Ok(sub)
    }

    fn build_invoice(input: &CreateInvoice) -> Invoice {
        let now = Utc::now();
        Invoice {
            invoice_id: Uuid::new_v4(),
            invoice_number: input.invoice_number.clone(),
            company_id: input.company_id,
            subscription_id: input.subscription_id,
            user_id: input.user_id,
            amount: input.amount,
            status: InvoiceStatus::Pending.as_str().to_string(),
            due_date: input.due_date,
            paid_date: None,
            lines: Json(input.lines.clone()),
            subtotal: input.subtotal,
            tax_amount: input.tax_amount,
            tax_percent: input.tax_percent,
            discount_amount: input.discount_amount,
            discount_label: input.discount_label.clone(),
            created_utc: now,
            updated_utc: now,
        }
    }
}

/// `BillingStore` over `RwLock`-guarded maps. Every method takes the lock
/// once, so multi-record writes are atomic.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_by_created<T, F>(mut rows: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> chrono::DateTime<Utc>,
{
    rows.sort_by_key(|r| std::cmp::Reverse(key(r)));
    rows
}

#[async_trait]
impl BillingStore for InMemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn create_product(
        &self,
        company_id: Uuid,
        admin_id: Uuid,
        input: &CreateProduct,
    ) -> Result<Product, AppError> {
        let product = Product {
            product_id: Uuid::new_v4(),
            company_id,
            admin_id,
            name: input.name.clone(),
            status: ProductStatus::Draft.as_str().to_string(),
            assigned_internal_id: None,
            variants: Json(input.variants.clone()),
            created_utc: Utc::now(),
        };
        let mut tables = self.tables.write().await;
        tables.products.insert(product.product_id, product.clone());
        Ok(product)
    }

    async fn get_product(&self, product_id: Uuid) -> Result<Option<Product>, AppError> {
        Ok(self.tables.read().await.products.get(&product_id).cloned())
    }

    async fn get_products(&self, company_id: Uuid) -> Result<Vec<Product>, AppError> {
        let tables = self.tables.read().await;
        let products = tables
            .products
            .values()
            .filter(|p| p.company_id == company_id)
            .cloned()
            .collect();
        Ok(sorted_by_created(products, |p: &Product| p.created_utc))
    }

    async fn update_product(
        &self,
        product_id: Uuid,
        patch: &ProductPatch,
    ) -> Result<Option<Product>, AppError> {
        let mut tables = self.tables.write().await;
        Ok(tables.products.get_mut(&product_id).map(|product| {
            patch.apply_to(product);
            product.clone()
        }))
    }

    async fn create_plan(&self, company_id: Uuid, input: &CreatePlan) -> Result<Plan, AppError> {
        let plan = Plan {
            plan_id: Uuid::new_v4(),
            company_id,
            product_id: input.product_id,
            name: input.name.clone(),
            price: input.price,
            billing_period: input.billing_period.clone(),
            min_quantity: input.min_quantity,
            start_date: input.start_date,
            end_date: input.end_date,
            pausable: input.pausable,
            renewable: input.renewable,
            closable: input.closable,
            auto_close: input.auto_close,
            discount_type: input.discount_type.clone(),
            discount_value: input.discount_value,
            tax_percent: input.tax_percent,
            created_utc: Utc::now(),
        };
        let mut tables = self.tables.write().await;
        tables.plans.insert(plan.plan_id, plan.clone());
        Ok(plan)
    }

    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<Plan>, AppError> {
        Ok(self.tables.read().await.plans.get(&plan_id).cloned())
    }

    async fn get_plans(&self, company_id: Uuid) -> Result<Vec<Plan>, AppError> {
        let tables = self.tables.read().await;
        let plans = tables
            .plans
            .values()
            .filter(|p| p.company_id == company_id)
            .cloned()
            .collect();
        Ok(sorted_by_created(plans, |p: &Plan| p.created_utc))
    }

    async fn create_discount(
        &self,
        company_id: Uuid,
        input: &CreateDiscount,
    ) -> Result<Discount, AppError> {
        let mut tables = self.tables.write().await;
        let duplicate = tables
            .discounts
            .values()
            .any(|d| d.company_id == company_id && normalize_code(&d.name) == normalize_code(&input.name));
        if duplicate {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Discount {} already exists",
                input.name
            )));
        }

        let discount = Discount {
            discount_id: Uuid::new_v4(),
            company_id,
            name: input.name.clone(),
            discount_type: input.discount_type.clone(),
            value: input.value,
            active: input.active,
            created_utc: Utc::now(),
        };
        tables.discounts.insert(discount.discount_id, discount.clone());
        Ok(discount)
    }

    async fn get_discounts(&self, company_id: Uuid) -> Result<Vec<Discount>, AppError> {
        let tables = self.tables.read().await;
        let discounts = tables
            .discounts
            .values()
            .filter(|d| d.company_id == company_id)
            .cloned()
            .collect();
        Ok(sorted_by_created(discounts, |d: &Discount| d.created_utc))
    }

    async fn create_user(&self, input: &CreateUser) -> Result<User, AppError> {
        let user = User {
            user_id: Uuid::new_v4(),
            company_id: input.company_id,
            name: input.name.clone(),
            email: input.email.clone(),
            role: input.role.as_str().to_string(),
            created_utc: Utc::now(),
        };
        let mut tables = self.tables.write().await;
        tables.users.insert(user.user_id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.tables.read().await.users.get(&user_id).cloned())
    }

    async fn get_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        Ok(self
            .tables
            .read()
            .await
            .subscriptions
            .get(&subscription_id)
            .cloned())
    }

    async fn get_subscriptions(
        &self,
        company_id: Option<Uuid>,
    ) -> Result<Vec<Subscription>, AppError> {
        let tables = self.tables.read().await;
        let subs = tables
            .subscriptions
            .values()
            .filter(|s| company_id.map_or(true, |c| s.company_id == c))
            .cloned()
            .collect();
        Ok(sorted_by_created(subs, |s: &Subscription| s.created_utc))
    }

    async fn get_active_subscriptions(&self) -> Result<Vec<Subscription>, AppError> {
        let tables = self.tables.read().await;
        let subs = tables
            .subscriptions
            .values()
            .filter(|s| s.status() == Some(SubscriptionStatus::Active))
            .cloned()
            .collect();
        Ok(sorted_by_created(subs, |s: &Subscription| s.created_utc))
    }

    async fn create_subscription(
        &self,
        input: &CreateSubscription,
    ) -> Result<Subscription, AppError> {
        self.tables.write().await.insert_subscription(input)
    }

    async fn update_subscription(
        &self,
        subscription_id: Uuid,
        patch: &SubscriptionPatch,
    ) -> Result<Option<Subscription>, AppError> {
        let mut tables = self.tables.write().await;
        Ok(tables.subscriptions.get_mut(&subscription_id).map(|sub| {
            patch.apply_to(sub, Utc::now());
            sub.clone()
        }))
    }

    async fn create_subscription_with_invoice(
        &self,
        subscription: &CreateSubscription,
        invoice: &CreateInvoice,
    ) -> Result<(Subscription, Invoice), AppError> {
        let mut tables = self.tables.write().await;
        let sub = tables.insert_subscription(subscription)?;
        let invoice = Tables::build_invoice(invoice);
        tables.invoices.insert(invoice.invoice_id, invoice.clone());
        Ok((sub, invoice))
    }

    async fn activate_subscription_with_invoice(
        &self,
        subscription_id: Uuid,
        start_date: NaiveDate,
        invoice: &CreateInvoice,
    ) -> Result<Option<(Subscription, Invoice)>, AppError> {
        let mut tables = self.tables.write().await;
        let Some(sub) = tables.subscriptions.get_mut(&subscription_id) else {
            return Ok(None);
        };
        if !matches!(
            sub.status(),
            Some(SubscriptionStatus::Draft | SubscriptionStatus::Quotation)
        ) {
            return Ok(None);
        }

        let patch = SubscriptionPatch {
            status: Some(SubscriptionStatus::Active),
            start_date: Some(start_date),
            ..Default::default()
        };
        patch.apply_to(sub, Utc::now());
        let sub = sub.clone();

        let invoice = Tables::build_invoice(invoice);
        tables.invoices.insert(invoice.invoice_id, invoice.clone());
        Ok(Some((sub, invoice)))
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        Ok(self.tables.read().await.invoices.get(&invoice_id).cloned())
    }

    async fn get_invoices(&self, company_id: Option<Uuid>) -> Result<Vec<Invoice>, AppError> {
        let tables = self.tables.read().await;
        let invoices = tables
            .invoices
            .values()
            .filter(|i| company_id.map_or(true, |c| i.company_id == c))
            .cloned()
            .collect();
        Ok(sorted_by_created(invoices, |i: &Invoice| i.created_utc))
    }

    async fn list_invoices_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Vec<Invoice>, AppError> {
        let tables = self.tables.read().await;
        let mut invoices: Vec<Invoice> = tables
            .invoices
            .values()
            .filter(|i| i.subscription_id == subscription_id)
            .cloned()
            .collect();
        invoices.sort_by(|a, b| b.due_date.cmp(&a.due_date));
        Ok(invoices)
    }

    async fn create_invoice(&self, input: &CreateInvoice) -> Result<Invoice, AppError> {
        let invoice = Tables::build_invoice(input);
        let mut tables = self.tables.write().await;
        tables.invoices.insert(invoice.invoice_id, invoice.clone());
        Ok(invoice)
    }

    async fn update_invoice(
        &self,
        invoice_id: Uuid,
        patch: &InvoicePatch,
    ) -> Result<Option<Invoice>, AppError> {
        let mut tables = self.tables.write().await;
        Ok(tables.invoices.get_mut(&invoice_id).map(|invoice| {
            patch.apply_to(invoice, Utc::now());
            invoice.clone()
        }))
    }

    async fn create_payment_and_mark_paid(
        &self,
        input: &CreatePayment,
    ) -> Result<Option<(Payment, Invoice)>, AppError> {
        let mut tables = self.tables.write().await;
        let Some(invoice) = tables.invoices.get_mut(&input.invoice_id) else {
            return Ok(None);
        };
        if invoice.stored_status().is_final() {
            return Ok(None);
        }

        let patch = InvoicePatch {
            status: Some(InvoiceStatus::Paid),
            paid_date: Some(input.paid_date),
        };
        patch.apply_to(invoice, Utc::now());
        let invoice = invoice.clone();

        let payment = Payment {
            payment_id: Uuid::new_v4(),
            company_id: input.company_id,
            invoice_id: input.invoice_id,
            user_id: input.user_id,
            amount: input.amount,
            method: input.method.clone(),
            paid_date: input.paid_date,
            created_utc: Utc::now(),
        };
        tables.payments.push(payment.clone());
        Ok(Some((payment, invoice)))
    }

    async fn get_payments(&self, company_id: Uuid) -> Result<Vec<Payment>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .iter()
            .filter(|p| p.company_id == company_id)
            .cloned()
            .collect())
    }

    async fn next_sequence(&self, prefix: &str, day: NaiveDate) -> Result<i64, AppError> {
        let mut tables = self.tables.write().await;
        let counter = tables
            .sequences
            .entry((prefix.to_string(), day))
            .or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}
