//! Domain models for billing-service.

mod discount;
mod invoice;
mod plan;
mod subscription;
mod user;

pub use discount::{normalize_code, CreateDiscount, Discount};
pub use invoice::{
    CreateInvoice, CreatePayment, Invoice, InvoiceLine, InvoicePatch, InvoiceStatus, InvoiceView,
    Payment,
};
pub use plan::{
    BillingPeriod, CreatePlan, CreateProduct, Plan, Product, ProductPatch, ProductStatus,
    ProductVariant,
};
pub use subscription::{
    CreateSubscription, PricingPatch, SubscribeRequest, Subscription, SubscriptionPatch,
    SubscriptionStatus,
};
pub use user::{BillingActor, CreateUser, Role, User, UserContact};
