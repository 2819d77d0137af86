//! PostgreSQL store for billing-service.

use super::store::BillingStore;
use crate::models::{
    CreateDiscount, CreateInvoice, CreatePayment, CreatePlan, CreateProduct, CreateSubscription,
    CreateUser, Discount, Invoice, InvoicePatch, Payment, Plan, Product, ProductPatch, Subscription,
    SubscriptionPatch, SubscriptionStatus, User,
};
use crate::services::metrics::DB_QUERY_DURATION;
use async_trait::async_trait;
use chrono::NaiveDate;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const PRODUCT_COLUMNS: &str =
    "product_id, company_id, admin_id, name, status, assigned_internal_id, variants, created_utc";

const PLAN_COLUMNS: &str = "plan_id, company_id, product_id, name, price, billing_period, min_quantity, start_date, end_date, pausable, renewable, closable, auto_close, discount_type, discount_value, tax_percent, created_utc";

const DISCOUNT_COLUMNS: &str =
    "discount_id, company_id, name, discount_type, value, active, created_utc";

const USER_COLUMNS: &str = "user_id, company_id, name, email, role, created_utc";

const SUBSCRIPTION_COLUMNS: &str = "subscription_id, subscription_number, company_id, user_id, product_id, plan_id, quantity, status, start_date, end_date, selected_variants, discount_type, discount_value, discount_code, discount_amount, base_price, subtotal, tax_percent, tax_amount, total, created_utc, updated_utc";

const INVOICE_COLUMNS: &str = "invoice_id, invoice_number, company_id, subscription_id, user_id, amount, status, due_date, paid_date, lines, subtotal, tax_amount, tax_percent, discount_amount, discount_label, created_utc, updated_utc";

const PAYMENT_COLUMNS: &str =
    "payment_id, company_id, invoice_id, user_id, amount, method, paid_date, created_utc";

fn db_err(action: &str, e: sqlx::Error) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("Failed to {}: {}", action, e))
}

/// Connection pool wrapper implementing [`BillingStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "billing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'_, Postgres>, AppError> {
        self.pool
            .begin()
            .await
            .map_err(|e| db_err("begin transaction", e))
    }

    async fn insert_subscription(
        tx: &mut Transaction<'_, Postgres>,
        input: &CreateSubscription,
    ) -> Result<Subscription, AppError> {
        sqlx::query_as::<_, Subscription>(&format!(
            r#"
            INSERT INTO subscriptions (subscription_id, subscription_number, company_id, user_id, product_id, plan_id, quantity, status, start_date, end_date, selected_variants, discount_type, discount_value, discount_code, discount_amount, base_price, subtotal, tax_percent, tax_amount, total)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(input.subscription_id)
        .bind(&input.subscription_number)
        .bind(input.company_id)
        .bind(input.user_id)
        .bind(input.product_id)
        .bind(input.plan_id)
        .bind(input.quantity)
        .bind(input.status.as_str())
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(Json(&input.selected_variants))
        .bind(&input.discount_type)
        .bind(input.discount_value)
        .bind(&input.discount_code)
        .bind(input.discount_amount)
        .bind(input.base_price)
        .bind(input.subtotal)
        .bind(input.tax_percent)
        .bind(input.tax_amount)
        .bind(input.total)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| db_err("create subscription", e))
    }

    async fn insert_invoice(
        tx: &mut Transaction<'_, Postgres>,
        input: &CreateInvoice,
    ) -> Result<Invoice, AppError> {
        sqlx::query_as::<_, Invoice>(&format!(
            r#"
            INSERT INTO invoices (invoice_id, invoice_number, company_id, subscription_id, user_id, amount, status, due_date, lines, subtotal, tax_amount, tax_percent, discount_amount, discount_label)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $8, $9, $10, $11, $12, $13)
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&input.invoice_number)
        .bind(input.company_id)
        .bind(input.subscription_id)
        .bind(input.user_id)
        .bind(input.amount)
        .bind(input.due_date)
        .bind(Json(&input.lines))
        .bind(input.subtotal)
        .bind(input.tax_amount)
        .bind(input.tax_percent)
        .bind(input.discount_amount)
        .bind(&input.discount_label)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| db_err("create invoice", e))
    }
}

#[async_trait]
impl BillingStore for PgStore {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    // =========================================================================
    // Catalogue
    // =========================================================================

    #[instrument(skip(self, input), fields(company_id = %company_id))]
    async fn create_product(
        &self,
        company_id: Uuid,
        admin_id: Uuid,
        input: &CreateProduct,
    ) -> Result<Product, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_product"])
            .start_timer();

        let product = sqlx::query_as::<_, Product>(&format!(
            r#"
            INSERT INTO products (product_id, company_id, admin_id, name, variants)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            PRODUCT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(company_id)
        .bind(admin_id)
        .bind(&input.name)
        .bind(Json(&input.variants))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err("create product", e))?;

        timer.observe_duration();
        info!(product_id = %product.product_id, name = %product.name, "Product created");

        Ok(product)
    }

    #[instrument(skip(self), fields(product_id = %product_id))]
    async fn get_product(&self, product_id: Uuid) -> Result<Option<Product>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_product"])
            .start_timer();

        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {} FROM products WHERE product_id = $1",
            PRODUCT_COLUMNS
        ))
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("get product", e))?;

        timer.observe_duration();
        Ok(product)
    }

    #[instrument(skip(self), fields(company_id = %company_id))]
    async fn get_products(&self, company_id: Uuid) -> Result<Vec<Product>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_products"])
            .start_timer();

        let products = sqlx::query_as::<_, Product>(&format!(
            "SELECT {} FROM products WHERE company_id = $1 ORDER BY created_utc DESC",
            PRODUCT_COLUMNS
        ))
        .bind(company_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("list products", e))?;

        timer.observe_duration();
        Ok(products)
    }

    #[instrument(skip(self, patch), fields(product_id = %product_id))]
    async fn update_product(
        &self,
        product_id: Uuid,
        patch: &ProductPatch,
    ) -> Result<Option<Product>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_product"])
            .start_timer();

        let product = sqlx::query_as::<_, Product>(&format!(
            r#"
            UPDATE products SET
                status = COALESCE($2, status),
                assigned_internal_id = COALESCE($3, assigned_internal_id)
            WHERE product_id = $1
            RETURNING {}
            "#,
            PRODUCT_COLUMNS
        ))
        .bind(product_id)
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.assigned_internal_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("update product", e))?;

        timer.observe_duration();
        Ok(product)
    }

    #[instrument(skip(self, input), fields(company_id = %company_id))]
    async fn create_plan(&self, company_id: Uuid, input: &CreatePlan) -> Result<Plan, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_plan"])
            .start_timer();

        let plan = sqlx::query_as::<_, Plan>(&format!(
            r#"
            INSERT INTO plans (plan_id, company_id, product_id, name, price, billing_period, min_quantity, start_date, end_date, pausable, renewable, closable, auto_close, discount_type, discount_value, tax_percent)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING {}
            "#,
            PLAN_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(company_id)
        .bind(input.product_id)
        .bind(&input.name)
        .bind(input.price)
        .bind(&input.billing_period)
        .bind(input.min_quantity)
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(input.pausable)
        .bind(input.renewable)
        .bind(input.closable)
        .bind(input.auto_close)
        .bind(&input.discount_type)
        .bind(input.discount_value)
        .bind(input.tax_percent)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err("create plan", e))?;

        timer.observe_duration();
        info!(plan_id = %plan.plan_id, name = %plan.name, "Plan created");

        Ok(plan)
    }

    #[instrument(skip(self), fields(plan_id = %plan_id))]
    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<Plan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_plan"])
            .start_timer();

        let plan = sqlx::query_as::<_, Plan>(&format!(
            "SELECT {} FROM plans WHERE plan_id = $1",
            PLAN_COLUMNS
        ))
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("get plan", e))?;

        timer.observe_duration();
        Ok(plan)
    }

    #[instrument(skip(self), fields(company_id = %company_id))]
    async fn get_plans(&self, company_id: Uuid) -> Result<Vec<Plan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_plans"])
            .start_timer();

        let plans = sqlx::query_as::<_, Plan>(&format!(
            "SELECT {} FROM plans WHERE company_id = $1 ORDER BY created_utc DESC",
            PLAN_COLUMNS
        ))
        .bind(company_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("list plans", e))?;

        timer.observe_duration();
        Ok(plans)
    }

    #[instrument(skip(self, input), fields(company_id = %company_id, name = %input.name))]
    async fn create_discount(
        &self,
        company_id: Uuid,
        input: &CreateDiscount,
    ) -> Result<Discount, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_discount"])
            .start_timer();

        let discount = sqlx::query_as::<_, Discount>(&format!(
            r#"
            INSERT INTO discounts (discount_id, company_id, name, discount_type, value, active)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            DISCOUNT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(company_id)
        .bind(&input.name)
        .bind(&input.discount_type)
        .bind(input.value)
        .bind(input.active)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => AppError::Conflict(
                anyhow::anyhow!("Discount {} already exists", input.name),
            ),
            e => db_err("create discount", e),
        })?;

        timer.observe_duration();
        Ok(discount)
    }

    #[instrument(skip(self), fields(company_id = %company_id))]
    async fn get_discounts(&self, company_id: Uuid) -> Result<Vec<Discount>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_discounts"])
            .start_timer();

        let discounts = sqlx::query_as::<_, Discount>(&format!(
            "SELECT {} FROM discounts WHERE company_id = $1 ORDER BY created_utc DESC",
            DISCOUNT_COLUMNS
        ))
        .bind(company_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("list discounts", e))?;

        timer.observe_duration();
        Ok(discounts)
    }

    #[instrument(skip(self, input), fields(company_id = %input.company_id))]
    async fn create_user(&self, input: &CreateUser) -> Result<User, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_user"])
            .start_timer();

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (user_id, company_id, name, email, role)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(input.company_id)
        .bind(&input.name)
        .bind(&input.email)
        .bind(input.role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err("create user", e))?;

        timer.observe_duration();
        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_user"])
            .start_timer();

        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE user_id = $1",
            USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("get user", e))?;

        timer.observe_duration();
        Ok(user)
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    async fn get_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_subscription"])
            .start_timer();

        let sub = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {} FROM subscriptions WHERE subscription_id = $1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("get subscription", e))?;

        timer.observe_duration();
        Ok(sub)
    }

    #[instrument(skip(self))]
    async fn get_subscriptions(
        &self,
        company_id: Option<Uuid>,
    ) -> Result<Vec<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_subscriptions"])
            .start_timer();

        let subs = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {} FROM subscriptions
            WHERE ($1::uuid IS NULL OR company_id = $1)
            ORDER BY created_utc DESC
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(company_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("list subscriptions", e))?;

        timer.observe_duration();
        Ok(subs)
    }

    #[instrument(skip(self))]
    async fn get_active_subscriptions(&self) -> Result<Vec<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_active_subscriptions"])
            .start_timer();

        let subs = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {} FROM subscriptions WHERE status = $1 ORDER BY created_utc",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(SubscriptionStatus::Active.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("list active subscriptions", e))?;

        timer.observe_duration();
        Ok(subs)
    }

    #[instrument(skip(self, input), fields(subscription_number = %input.subscription_number))]
    async fn create_subscription(
        &self,
        input: &CreateSubscription,
    ) -> Result<Subscription, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_subscription"])
            .start_timer();

        let mut tx = self.begin().await?;
        let sub = Self::insert_subscription(&mut tx, input).await?;
        tx.commit().await.map_err(|e| db_err("commit subscription", e))?;

        timer.observe_duration();
        info!(subscription_id = %sub.subscription_id, "Subscription created");

        Ok(sub)
    }

    #[instrument(skip(self, patch), fields(subscription_id = %subscription_id))]
    async fn update_subscription(
        &self,
        subscription_id: Uuid,
        patch: &SubscriptionPatch,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_subscription"])
            .start_timer();

        let pricing = patch.pricing.as_ref();
        let sub = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            UPDATE subscriptions SET
                plan_id = COALESCE($2, plan_id),
                status = COALESCE($3, status),
                start_date = COALESCE($4, start_date),
                discount_type = CASE WHEN $5 THEN $6 ELSE discount_type END,
                discount_value = CASE WHEN $5 THEN $7 ELSE discount_value END,
                discount_code = CASE WHEN $5 THEN $8 ELSE discount_code END,
                discount_amount = CASE WHEN $5 THEN $9 ELSE discount_amount END,
                base_price = CASE WHEN $5 THEN $10 ELSE base_price END,
                subtotal = CASE WHEN $5 THEN $11 ELSE subtotal END,
                tax_percent = CASE WHEN $5 THEN $12 ELSE tax_percent END,
                tax_amount = CASE WHEN $5 THEN $13 ELSE tax_amount END,
                total = CASE WHEN $5 THEN $14 ELSE total END,
                updated_utc = NOW()
            WHERE subscription_id = $1
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(subscription_id)
        .bind(patch.plan_id)
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.start_date)
        .bind(pricing.is_some())
        .bind(pricing.and_then(|p| p.discount_type.clone()))
        .bind(pricing.and_then(|p| p.discount_value))
        .bind(pricing.and_then(|p| p.discount_code.clone()))
        .bind(pricing.map(|p| p.discount_amount))
        .bind(pricing.map(|p| p.base_price))
        .bind(pricing.map(|p| p.subtotal))
        .bind(pricing.map(|p| p.tax_percent))
        .bind(pricing.map(|p| p.tax_amount))
        .bind(pricing.map(|p| p.total))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("update subscription", e))?;

        timer.observe_duration();
        Ok(sub)
    }

    #[instrument(
        skip(self, subscription, invoice),
        fields(
            subscription_number = %subscription.subscription_number,
            invoice_number = %invoice.invoice_number
        )
    )]
    async fn create_subscription_with_invoice(
        &self,
        subscription: &CreateSubscription,
        invoice: &CreateInvoice,
    ) -> Result<(Subscription, Invoice), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_subscription_with_invoice"])
            .start_timer();

        let mut tx = self.begin().await?;
        let sub = Self::insert_subscription(&mut tx, subscription).await?;
        let inv = Self::insert_invoice(&mut tx, invoice).await?;
        tx.commit()
            .await
            .map_err(|e| db_err("commit subscription and invoice", e))?;

        timer.observe_duration();
        info!(
            subscription_id = %sub.subscription_id,
            invoice_id = %inv.invoice_id,
            "Subscription and first invoice created"
        );

        Ok((sub, inv))
    }

    #[instrument(skip(self, invoice), fields(subscription_id = %subscription_id))]
    async fn activate_subscription_with_invoice(
        &self,
        subscription_id: Uuid,
        start_date: NaiveDate,
        invoice: &CreateInvoice,
    ) -> Result<Option<(Subscription, Invoice)>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["activate_subscription_with_invoice"])
            .start_timer();

        let mut tx = self.begin().await?;
        let sub = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            UPDATE subscriptions
            SET status = 'active', start_date = $2, updated_utc = NOW()
            WHERE subscription_id = $1 AND status IN ('draft', 'quotation')
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(subscription_id)
        .bind(start_date)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_err("activate subscription", e))?;

        let Some(sub) = sub else {
            tx.rollback()
                .await
                .map_err(|e| db_err("roll back activation", e))?;
            return Ok(None);
        };

        let inv = Self::insert_invoice(&mut tx, invoice).await?;
        tx.commit()
            .await
            .map_err(|e| db_err("commit activation", e))?;

        timer.observe_duration();
        Ok(Some((sub, inv)))
    }

    // =========================================================================
    // Invoices
    // =========================================================================

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {} FROM invoices WHERE invoice_id = $1",
            INVOICE_COLUMNS
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("get invoice", e))?;

        timer.observe_duration();
        Ok(invoice)
    }

    #[instrument(skip(self))]
    async fn get_invoices(&self, company_id: Option<Uuid>) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoices"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {} FROM invoices
            WHERE ($1::uuid IS NULL OR company_id = $1)
            ORDER BY created_utc DESC
            "#,
            INVOICE_COLUMNS
        ))
        .bind(company_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("list invoices", e))?;

        timer.observe_duration();
        Ok(invoices)
    }

    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    async fn list_invoices_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices_for_subscription"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {} FROM invoices WHERE subscription_id = $1 ORDER BY due_date DESC",
            INVOICE_COLUMNS
        ))
        .bind(subscription_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("list subscription invoices", e))?;

        timer.observe_duration();
        Ok(invoices)
    }

    #[instrument(skip(self, input), fields(invoice_number = %input.invoice_number))]
    async fn create_invoice(&self, input: &CreateInvoice) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        let mut tx = self.begin().await?;
        let invoice = Self::insert_invoice(&mut tx, input).await?;
        tx.commit().await.map_err(|e| db_err("commit invoice", e))?;

        timer.observe_duration();
        info!(invoice_id = %invoice.invoice_id, "Invoice created");

        Ok(invoice)
    }

    #[instrument(skip(self, patch), fields(invoice_id = %invoice_id))]
    async fn update_invoice(
        &self,
        invoice_id: Uuid,
        patch: &InvoicePatch,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices SET
                status = COALESCE($2, status),
                paid_date = COALESCE($3, paid_date),
                updated_utc = NOW()
            WHERE invoice_id = $1
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        ))
        .bind(invoice_id)
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.paid_date)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("update invoice", e))?;

        timer.observe_duration();
        Ok(invoice)
    }

    // =========================================================================
    // Payments
    // =========================================================================

    #[instrument(skip(self, input), fields(invoice_id = %input.invoice_id))]
    async fn create_payment_and_mark_paid(
        &self,
        input: &CreatePayment,
    ) -> Result<Option<(Payment, Invoice)>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_payment"])
            .start_timer();

        let mut tx = self.begin().await?;
        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET status = 'paid', paid_date = $2, updated_utc = NOW()
            WHERE invoice_id = $1 AND status NOT IN ('paid', 'cancelled')
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        ))
        .bind(input.invoice_id)
        .bind(input.paid_date)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_err("mark invoice paid", e))?;

        let Some(invoice) = invoice else {
            tx.rollback()
                .await
                .map_err(|e| db_err("roll back payment", e))?;
            return Ok(None);
        };

        let payment = sqlx::query_as::<_, Payment>(&format!(
            r#"
            INSERT INTO payments (payment_id, company_id, invoice_id, user_id, amount, method, paid_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(input.company_id)
        .bind(input.invoice_id)
        .bind(input.user_id)
        .bind(input.amount)
        .bind(&input.method)
        .bind(input.paid_date)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_err("create payment", e))?;

        tx.commit().await.map_err(|e| db_err("commit payment", e))?;

        timer.observe_duration();
        info!(payment_id = %payment.payment_id, "Payment recorded");

        Ok(Some((payment, invoice)))
    }

    #[instrument(skip(self), fields(company_id = %company_id))]
    async fn get_payments(&self, company_id: Uuid) -> Result<Vec<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_payments"])
            .start_timer();

        let payments = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE company_id = $1 ORDER BY paid_date",
            PAYMENT_COLUMNS
        ))
        .bind(company_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("list payments", e))?;

        timer.observe_duration();
        Ok(payments)
    }

    // =========================================================================
    // Sequences
    // =========================================================================

    #[instrument(skip(self))]
    async fn next_sequence(&self, prefix: &str, day: NaiveDate) -> Result<i64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["next_sequence"])
            .start_timer();

        let value = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO number_sequences (prefix, day, last_value)
            VALUES ($1, $2, 1)
            ON CONFLICT (prefix, day)
            DO UPDATE SET last_value = number_sequences.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(prefix)
        .bind(day)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err("advance sequence", e))?;

        timer.observe_duration();
        Ok(value)
    }
}
