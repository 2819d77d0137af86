//! Company catalogue: products, plans and discount codes.

use super::context::{ensure_company, BillingContext};
use crate::models::{
    normalize_code, BillingActor, CreateDiscount, CreatePlan, CreateProduct, Discount, Plan,
    Product, ProductPatch, ProductStatus, Role,
};
use service_core::error::AppError;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Clone)]
pub struct CatalogService {
    ctx: BillingContext,
}

fn require_admin(actor: &BillingActor, action: &str) -> Result<(), AppError> {
    if !actor.is_admin() {
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Only admins can {}",
            action
        )));
    }
    Ok(())
}

impl CatalogService {
    pub fn new(ctx: BillingContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self, input), fields(company_id = %actor.company_id))]
    pub async fn create_product(
        &self,
        actor: &BillingActor,
        input: CreateProduct,
    ) -> Result<Product, AppError> {
        require_admin(actor, "create products")?;
        input.validate()?;

        let product = self
            .ctx
            .store
            .create_product(actor.company_id, actor.user_id, &input)
            .await?;

        info!(product_id = %product.product_id, name = %product.name, "Product created");
        Ok(product)
    }

    /// Products of the caller's company. Plain users only see published ones.
    #[instrument(skip(self), fields(company_id = %actor.company_id))]
    pub async fn list_products(&self, actor: &BillingActor) -> Result<Vec<Product>, AppError> {
        let products = self.ctx.store.get_products(actor.company_id).await?;
        if actor.role != Role::User {
            return Ok(products);
        }
        Ok(products.into_iter().filter(Product::is_published).collect())
    }

    /// Hand a product to an internal reviewer of the same company.
    ///
    /// Only the admin who created the product may assign it. Reassigning a
    /// product that is already pending review replaces the reviewer.
    #[instrument(skip(self), fields(company_id = %actor.company_id))]
    pub async fn assign_product(
        &self,
        actor: &BillingActor,
        product_id: Uuid,
        reviewer_id: Uuid,
    ) -> Result<Product, AppError> {
        require_admin(actor, "assign products")?;
        let product = self.load_product(actor, product_id).await?;
        if product.admin_id != actor.user_id {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Product was created by another admin"
            )));
        }
        if product.is_published() {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Product is already published"
            )));
        }

        let reviewer = self
            .ctx
            .store
            .get_user(reviewer_id)
            .await?
            .filter(|u| u.company_id == actor.company_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Reviewer not found")))?;
        if reviewer.actor().role != Role::Internal {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Reviewer must be an internal user"
            )));
        }

        let patch = ProductPatch {
            status: Some(ProductStatus::PendingInternal),
            assigned_internal_id: Some(reviewer_id),
        };
        let product = self.update_product(product_id, &patch).await?;

        info!(product_id = %product_id, reviewer_id = %reviewer_id, "Product sent for review");
        Ok(product)
    }

    /// Publish a product. Only the assigned internal reviewer may do this.
    #[instrument(skip(self), fields(company_id = %actor.company_id))]
    pub async fn publish_product(
        &self,
        actor: &BillingActor,
        product_id: Uuid,
    ) -> Result<Product, AppError> {
        if actor.role != Role::Internal {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Only internal reviewers can publish products"
            )));
        }
        let product = self.load_product(actor, product_id).await?;
        if product.assigned_internal_id != Some(actor.user_id) {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Product is not assigned to you"
            )));
        }
        if product.status() != Some(ProductStatus::PendingInternal) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Cannot publish a {} product",
                product.status
            )));
        }

        let patch = ProductPatch {
            status: Some(ProductStatus::Published),
            ..Default::default()
        };
        let product = self.update_product(product_id, &patch).await?;

        info!(product_id = %product_id, "Product published");
        Ok(product)
    }

    async fn load_product(&self, actor: &BillingActor, product_id: Uuid) -> Result<Product, AppError> {
        let product = self
            .ctx
            .store
            .get_product(product_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Product not found")))?;
        ensure_company(actor, product.company_id, "Product")?;
        Ok(product)
    }

    async fn update_product(
        &self,
        product_id: Uuid,
        patch: &ProductPatch,
    ) -> Result<Product, AppError> {
        self.ctx
            .store
            .update_product(product_id, patch)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Product not found")))
    }

    #[instrument(skip(self, input), fields(company_id = %actor.company_id))]
    pub async fn create_plan(
        &self,
        actor: &BillingActor,
        input: CreatePlan,
    ) -> Result<Plan, AppError> {
        require_admin(actor, "create plans")?;
        input.validate()?;

        let product = self
            .ctx
            .store
            .get_product(input.product_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Product not found")))?;
        ensure_company(actor, product.company_id, "Product")?;

        let plan = self.ctx.store.create_plan(actor.company_id, &input).await?;

        info!(
            plan_id = %plan.plan_id,
            product_id = %plan.product_id,
            price = %plan.price,
            billing_period = %plan.billing_period,
            "Plan created"
        );
        Ok(plan)
    }

    #[instrument(skip(self), fields(company_id = %actor.company_id))]
    pub async fn list_plans(&self, actor: &BillingActor) -> Result<Vec<Plan>, AppError> {
        self.ctx.store.get_plans(actor.company_id).await
    }

    /// Create a discount code. The name is stored trimmed and upper-cased so
    /// lookups at subscribe time are case-insensitive.
    #[instrument(skip(self, input), fields(company_id = %actor.company_id))]
    pub async fn create_discount(
        &self,
        actor: &BillingActor,
        mut input: CreateDiscount,
    ) -> Result<Discount, AppError> {
        require_admin(actor, "create discounts")?;
        input.name = normalize_code(&input.name);
        input.validate()?;

        let discount = self
            .ctx
            .store
            .create_discount(actor.company_id, &input)
            .await?;

        info!(
            discount_id = %discount.discount_id,
            code = %discount.name,
            discount_type = %discount.discount_type,
            "Discount created"
        );
        Ok(discount)
    }

    #[instrument(skip(self), fields(company_id = %actor.company_id))]
    pub async fn list_discounts(&self, actor: &BillingActor) -> Result<Vec<Discount>, AppError> {
        require_admin(actor, "list discounts")?;
        self.ctx.store.get_discounts(actor.company_id).await
    }
}
