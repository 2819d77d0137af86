//! Subscription billing engine: pricing, discounts, invoicing, lifecycle and
//! the daily recurring billing sweep.

pub mod config;
pub mod models;
pub mod pricing;
pub mod services;
pub mod startup;
