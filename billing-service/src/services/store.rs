//! Persistence capability consumed by the billing engine.

use crate::models::{
    CreateDiscount, CreateInvoice, CreatePayment, CreatePlan, CreateProduct, CreateSubscription,
    CreateUser, Discount, Invoice, InvoicePatch, Payment, Plan, Product, ProductPatch,
    Subscription, SubscriptionPatch, User,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use service_core::error::AppError;
use uuid::Uuid;

/// Record store behind the billing engine.
///
/// Methods that write more than one record are single units of work: either
/// every record is persisted or none is.
#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    // Catalogue

    async fn create_product(
        &self,
        company_id: Uuid,
        admin_id: Uuid,
        input: &CreateProduct,
    ) -> Result<Product, AppError>;

    async fn get_product(&self, product_id: Uuid) -> Result<Option<Product>, AppError>;

    async fn get_products(&self, company_id: Uuid) -> Result<Vec<Product>, AppError>;

    async fn update_product(
        &self,
        product_id: Uuid,
        patch: &ProductPatch,
    ) -> Result<Option<Product>, AppError>;

    async fn create_plan(&self, company_id: Uuid, input: &CreatePlan) -> Result<Plan, AppError>;

    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<Plan>, AppError>;

    async fn get_plans(&self, company_id: Uuid) -> Result<Vec<Plan>, AppError>;

    /// `input.name` is stored as given; callers normalize it.
    async fn create_discount(
        &self,
        company_id: Uuid,
        input: &CreateDiscount,
    ) -> Result<Discount, AppError>;

    async fn get_discounts(&self, company_id: Uuid) -> Result<Vec<Discount>, AppError>;

    async fn create_user(&self, input: &CreateUser) -> Result<User, AppError>;

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, AppError>;

    // Subscriptions

    async fn get_subscription(&self, subscription_id: Uuid)
        -> Result<Option<Subscription>, AppError>;

    /// All subscriptions, or those of one company.
    async fn get_subscriptions(&self, company_id: Option<Uuid>)
        -> Result<Vec<Subscription>, AppError>;

    async fn get_active_subscriptions(&self) -> Result<Vec<Subscription>, AppError>;

    async fn create_subscription(
        &self,
        input: &CreateSubscription,
    ) -> Result<Subscription, AppError>;

    /// Returns `None` when the subscription does not exist.
    async fn update_subscription(
        &self,
        subscription_id: Uuid,
        patch: &SubscriptionPatch,
    ) -> Result<Option<Subscription>, AppError>;

    /// Persist a subscription together with its first invoice.
    async fn create_subscription_with_invoice(
        &self,
        subscription: &CreateSubscription,
        invoice: &CreateInvoice,
    ) -> Result<(Subscription, Invoice), AppError>;

    /// Move a draft or quotation to active with `start_date` and persist its
    /// invoice. Returns `None`, writing nothing, when the subscription is
    /// missing or in any other state.
    async fn activate_subscription_with_invoice(
        &self,
        subscription_id: Uuid,
        start_date: NaiveDate,
        invoice: &CreateInvoice,
    ) -> Result<Option<(Subscription, Invoice)>, AppError>;

    // Invoices

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError>;

    /// All invoices, or those of one company.
    async fn get_invoices(&self, company_id: Option<Uuid>) -> Result<Vec<Invoice>, AppError>;

    async fn list_invoices_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Vec<Invoice>, AppError>;

    async fn create_invoice(&self, input: &CreateInvoice) -> Result<Invoice, AppError>;

    async fn update_invoice(
        &self,
        invoice_id: Uuid,
        patch: &InvoicePatch,
    ) -> Result<Option<Invoice>, AppError>;

    // Payments

    /// Record a payment and mark its invoice paid on `input.paid_date`.
    /// Returns `None`, writing nothing, when the invoice is missing, paid or
    /// cancelled.
    async fn create_payment_and_mark_paid(
        &self,
        input: &CreatePayment,
    ) -> Result<Option<(Payment, Invoice)>, AppError>;

    async fn get_payments(&self, company_id: Uuid) -> Result<Vec<Payment>, AppError>;

    // Sequences

    /// Atomically increment and return the counter for `(prefix, day)`,
    /// starting at 1.
    async fn next_sequence(&self, prefix: &str, day: NaiveDate) -> Result<i64, AppError>;
}
