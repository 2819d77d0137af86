//! Services module for billing-service.

pub mod catalog;
pub mod clock;
pub mod context;
pub mod database;
pub mod invoices;
pub mod memory;
pub mod metrics;
pub mod notifier;
pub mod reports;
pub mod scheduler;
pub mod sequence;
pub mod store;
pub mod subscriptions;
pub mod sweep;

pub use catalog::CatalogService;
pub use clock::{Clock, FixedClock, SystemClock};
pub use context::BillingContext;
pub use database::PgStore;
pub use invoices::InvoiceService;
pub use memory::InMemoryStore;
pub use metrics::{
    get_metrics, init_metrics, record_error, record_http_request, record_invoice_generated,
    record_subscription_closed, record_subscription_operation, record_sweep,
};
pub use notifier::{EmailNotifier, LogNotifier, Notifier};
pub use reports::{ReportService, RevenueSummary};
pub use scheduler::BillingScheduler;
pub use sequence::{format_number, next_number, SequenceKind};
pub use store::BillingStore;
pub use subscriptions::{SubscriptionReceipt, SubscriptionService};
pub use sweep::{BillingSweep, SweepFailure, SweepSummary};
