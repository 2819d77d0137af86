//! Test helper module for billing-service integration tests.
//!
//! Wires the billing services over the in-memory store, a fixed clock and a
//! notifier that records what it was asked to send.

#![allow(dead_code)]

use async_trait::async_trait;
use billing_service::config::BillingSettings;
use billing_service::models::{
    BillingActor, CreateDiscount, CreateInvoice, CreatePayment, CreatePlan, CreateProduct,
    CreateSubscription, CreateUser, Discount, Invoice, InvoicePatch, Payment, Plan, Product,
    ProductPatch, ProductVariant, Role, SubscribeRequest, Subscription, SubscriptionPatch, User,
    UserContact,
};
use billing_service::services::{
    init_metrics, BillingContext, BillingStore, BillingSweep, CatalogService, FixedClock,
    InMemoryStore, InvoiceService, Notifier, ReportService, SubscriptionReceipt,
    SubscriptionService,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use uuid::Uuid;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Notification captured by [`RecordingNotifier`].
#[derive(Debug, Clone)]
pub struct SentNotice {
    pub to: String,
    pub invoice_number: String,
    pub amount: Decimal,
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotice>>,
    failing: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<SentNotice> {
        self.sent.lock().unwrap().clone()
    }

    /// Make every following delivery fail.
    pub fn fail_deliveries(&self) {
        *self.failing.lock().unwrap() = true;
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn invoice_issued(&self, to: &UserContact, invoice: &Invoice) -> Result<(), AppError> {
        if *self.failing.lock().unwrap() {
            return Err(AppError::EmailError("SMTP relay refused".to_string()));
        }
        self.sent.lock().unwrap().push(SentNotice {
            to: to.email.clone(),
            invoice_number: invoice.invoice_number.clone(),
            amount: invoice.amount,
        });
        Ok(())
    }
}

/// Billing services over an in-memory store pinned to a fixed day.
pub struct TestBilling {
    pub store: Arc<dyn BillingStore>,
    pub clock: Arc<FixedClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub context: BillingContext,
    pub subscriptions: SubscriptionService,
    pub invoices: InvoiceService,
    pub catalog: CatalogService,
    pub reports: ReportService,
    pub sweep: BillingSweep,
}

/// A company with one admin and one subscriber.
#[derive(Debug, Clone, Copy)]
pub struct Company {
    pub company_id: Uuid,
    pub admin: BillingActor,
    pub user: BillingActor,
}

impl TestBilling {
    pub fn on(today: NaiveDate) -> Self {
        Self::with_settings(today, BillingSettings::default())
    }

    pub fn with_settings(today: NaiveDate, settings: BillingSettings) -> Self {
        Self::with_store(today, settings, Arc::new(InMemoryStore::new()))
    }

    pub fn with_store(
        today: NaiveDate,
        settings: BillingSettings,
        store: Arc<dyn BillingStore>,
    ) -> Self {
        init_metrics();

        let clock = Arc::new(FixedClock::on(today));
        let notifier = Arc::new(RecordingNotifier::default());
        let context = BillingContext::new(store.clone(), clock.clone(), notifier.clone(), settings);

        Self {
            store,
            clock,
            notifier,
            subscriptions: SubscriptionService::new(context.clone()),
            invoices: InvoiceService::new(context.clone()),
            catalog: CatalogService::new(context.clone()),
            reports: ReportService::new(context.clone()),
            sweep: BillingSweep::new(context.clone()),
            context,
        }
    }

    pub fn set_today(&self, day: NaiveDate) {
        self.clock.set_today(day);
    }

    pub async fn user(&self, company_id: Uuid, name: &str, role: Role) -> User {
        self.store
            .create_user(&CreateUser {
                company_id,
                name: name.to_string(),
                email: format!("{}@example.com", name.to_lowercase()),
                role,
            })
            .await
            .expect("Failed to create user")
    }

    pub async fn company(&self) -> Company {
        let company_id = Uuid::new_v4();
        let admin = self.user(company_id, "Admin", Role::Admin).await.actor();
        let user = self.user(company_id, "Alice", Role::User).await.actor();
        Company {
            company_id,
            admin,
            user,
        }
    }

    pub async fn product(&self, company: &Company, name: &str, variants: Vec<ProductVariant>) -> Product {
        self.catalog
            .create_product(
                &company.admin,
                CreateProduct {
                    name: name.to_string(),
                    variants,
                },
            )
            .await
            .expect("Failed to create product")
    }

    pub async fn plan(&self, company: &Company, input: CreatePlan) -> Plan {
        self.catalog
            .create_plan(&company.admin, input)
            .await
            .expect("Failed to create plan")
    }

    pub async fn discount(&self, company: &Company, name: &str, kind: &str, value: Decimal) -> Discount {
        self.catalog
            .create_discount(
                &company.admin,
                CreateDiscount {
                    name: name.to_string(),
                    discount_type: kind.to_string(),
                    value,
                    active: true,
                },
            )
            .await
            .expect("Failed to create discount")
    }

    /// Subscribe `actor` to `plan` with quantity 1 and no extras.
    pub async fn subscribe(&self, actor: &BillingActor, plan: &Plan) -> SubscriptionReceipt {
        self.subscriptions
            .subscribe(actor, subscribe_request(plan))
            .await
            .expect("Failed to subscribe")
    }
}

pub fn plan_input(product_id: Uuid, name: &str, price: Decimal, period: &str) -> CreatePlan {
    CreatePlan {
        product_id,
        name: name.to_string(),
        price,
        billing_period: period.to_string(),
        min_quantity: 1,
        start_date: None,
        end_date: None,
        pausable: false,
        renewable: true,
        closable: true,
        auto_close: false,
        discount_type: None,
        discount_value: None,
        tax_percent: None,
    }
}

pub fn subscribe_request(plan: &Plan) -> SubscribeRequest {
    SubscribeRequest {
        product_id: Some(plan.product_id),
        plan_id: Some(plan.plan_id),
        ..Default::default()
    }
}

pub fn variant(attribute: &str, value: &str, extra_price: Decimal) -> ProductVariant {
    ProductVariant {
        attribute: attribute.to_string(),
        value: value.to_string(),
        extra_price,
    }
}

pub fn variants(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Store that fails every invoice lookup for one subscription and delegates
/// everything else to an [`InMemoryStore`].
pub struct FaultyStore {
    inner: InMemoryStore,
    broken: Mutex<Option<Uuid>>,
    held: Mutex<Option<SweepHold>>,
    offline: Mutex<bool>,
}

/// Pauses the next sweep when it first lists active subscriptions.
#[derive(Clone, Default)]
pub struct SweepHold {
    /// Notified once the sweep is paused.
    pub entered: Arc<Notify>,
    /// Notify to let the sweep continue.
    pub release: Arc<Notify>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            broken: Mutex::new(None),
            held: Mutex::new(None),
            offline: Mutex::new(false),
        }
    }

    /// Make health checks fail as if the database went away.
    pub fn take_offline(&self) {
        *self.offline.lock().unwrap() = true;
    }

    pub fn hold_next_sweep(&self) -> SweepHold {
        let hold = SweepHold::default();
        *self.held.lock().unwrap() = Some(hold.clone());
        hold
    }

    pub fn break_subscription(&self, subscription_id: Uuid) {
        *self.broken.lock().unwrap() = Some(subscription_id);
    }
}

#[async_trait]
impl BillingStore for FaultyStore {
    async fn health_check(&self) -> Result<(), AppError> {
        if *self.offline.lock().unwrap() {
            return Err(AppError::DatabaseError(anyhow::anyhow!("connection refused")));
        }
        self.inner.health_check().await
    }

    async fn create_product(
        &self,
        company_id: Uuid,
        admin_id: Uuid,
        input: &CreateProduct,
    ) -> Result<Product, AppError> {
        self.inner.create_product(company_id, admin_id, input).await
    }

    async fn get_product(&self, product_id: Uuid) -> Result<Option<Product>, AppError> {
        self.inner.get_product(product_id).await
    }

    async fn get_products(&self, company_id: Uuid) -> Result<Vec<Product>, AppError> {
        self.inner.get_products(company_id).await
    }

    async fn update_product(
        &self,
        product_id: Uuid,
        patch: &ProductPatch,
    ) -> Result<Option<Product>, AppError> {
        self.inner.update_product(product_id, patch).await
    }

    async fn create_plan(&self, company_id: Uuid, input: &CreatePlan) -> Result<Plan, AppError> {
        self.inner.create_plan(company_id, input).await
    }

    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<Plan>, AppError> {
        self.inner.get_plan(plan_id).await
    }

    async fn get_plans(&self, company_id: Uuid) -> Result<Vec<Plan>, AppError> {
        self.inner.get_plans(company_id).await
    }

    async fn create_discount(
        &self,
        company_id: Uuid,
        input: &CreateDiscount,
    ) -> Result<Discount, AppError> {
        self.inner.create_discount(company_id, input).await
    }

    async fn get_discounts(&self, company_id: Uuid) -> Result<Vec<Discount>, AppError> {
        self.inner.get_discounts(company_id).await
    }

    async fn create_user(&self, input: &CreateUser) -> Result<User, AppError> {
        self.inner.create_user(input).await
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        self.inner.get_user(user_id).await
    }

    async fn get_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        self.inner.get_subscription(subscription_id).await
    }

    async fn get_subscriptions(
        &self,
        company_id: Option<Uuid>,
    ) -> Result<Vec<Subscription>, AppError> {
        self.inner.get_subscriptions(company_id).await
    }

    async fn get_active_subscriptions(&self) -> Result<Vec<Subscription>, AppError> {
        let hold = self.held.lock().unwrap().take();
        if let Some(hold) = hold {
            hold.entered.notify_one();
            hold.release.notified().await;
        }
        self.inner.get_active_subscriptions().await
    }

    async fn create_subscription(
        &self,
        input: &CreateSubscription,
    ) -> Result<Subscription, AppError> {
        self.inner.create_subscription(input).await
    }

    async fn update_subscription(
        &self,
        subscription_id: Uuid,
        patch: &SubscriptionPatch,
    ) -> Result<Option<Subscription>, AppError> {
        self.inner.update_subscription(subscription_id, patch).await
    }

    async fn create_subscription_with_invoice(
        &self,
        subscription: &CreateSubscription,
        invoice: &CreateInvoice,
    ) -> Result<(Subscription, Invoice), AppError> {
        self.inner
            .create_subscription_with_invoice(subscription, invoice)
            .await
    }

    async fn activate_subscription_with_invoice(
        &self,
        subscription_id: Uuid,
        start_date: NaiveDate,
        invoice: &CreateInvoice,
    ) -> Result<Option<(Subscription, Invoice)>, AppError> {
        self.inner
            .activate_subscription_with_invoice(subscription_id, start_date, invoice)
            .await
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        self.inner.get_invoice(invoice_id).await
    }

    async fn get_invoices(&self, company_id: Option<Uuid>) -> Result<Vec<Invoice>, AppError> {
        self.inner.get_invoices(company_id).await
    }

    async fn list_invoices_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Vec<Invoice>, AppError> {
        if *self.broken.lock().unwrap() == Some(subscription_id) {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "connection reset while reading invoices"
            )));
        }
        self.inner
            .list_invoices_for_subscription(subscription_id)
            .await
    }

    async fn create_invoice(&self, input: &CreateInvoice) -> Result<Invoice, AppError> {
        self.inner.create_invoice(input).await
    }

    async fn update_invoice(
        &self,
        invoice_id: Uuid,
        patch: &InvoicePatch,
    ) -> Result<Option<Invoice>, AppError> {
        self.inner.update_invoice(invoice_id, patch).await
    }

    async fn create_payment_and_mark_paid(
        &self,
        input: &CreatePayment,
    ) -> Result<Option<(Payment, Invoice)>, AppError> {
        self.inner.create_payment_and_mark_paid(input).await
    }

    async fn get_payments(&self, company_id: Uuid) -> Result<Vec<Payment>, AppError> {
        self.inner.get_payments(company_id).await
    }

    async fn next_sequence(&self, prefix: &str, day: NaiveDate) -> Result<i64, AppError> {
        self.inner.next_sequence(prefix, day).await
    }
}
