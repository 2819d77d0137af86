//! Configuration module for billing-service.

use chrono::NaiveTime;
use rust_decimal::Decimal;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub store: StoreBackend,
    pub database: DatabaseConfig,
    pub billing: BillingSettings,
    pub scheduler: SchedulerConfig,
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}

/// Which date a renewal invoice is due on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenewalAnchor {
    /// One period after the day the sweep runs.
    #[default]
    Sweep,
    /// One period after the cycle boundary that triggered the renewal,
    /// regardless of how late the sweep ran.
    Cadence,
}

impl FromStr for RenewalAnchor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sweep" => Ok(RenewalAnchor::Sweep),
            "cadence" => Ok(RenewalAnchor::Cadence),
            _ => Err(format!("Invalid renewal anchor: {}", s)),
        }
    }
}

/// Invoice terms shared by every billing path.
#[derive(Debug, Clone)]
pub struct BillingSettings {
    pub invoice_due_days: u32,
    pub default_tax_percent: Decimal,
    pub renewal_anchor: RenewalAnchor,
}

impl Default for BillingSettings {
    fn default() -> Self {
        Self {
            invoice_due_days: 30,
            default_tax_percent: Decimal::from(18),
            renewal_anchor: RenewalAnchor::Sweep,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// UTC wall-clock time of the daily sweep.
    pub run_at: NaiveTime,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            run_at: NaiveTime::MIN,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from: String,
}

impl BillingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let store: StoreBackend = env::var("BILLING_STORE")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let database_url = match (env::var("DATABASE_URL"), store) {
            (Ok(url), _) => url,
            (Err(_), StoreBackend::Memory) => String::new(),
            (Err(_), StoreBackend::Postgres) => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "DATABASE_URL is required"
                )))
            }
        };

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "billing-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            store,
            database: DatabaseConfig {
                url: database_url,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 2),
            },
            billing: BillingSettings {
                invoice_due_days: parse_env("INVOICE_DUE_DAYS", 30),
                default_tax_percent: parse_tax_percent(env::var("DEFAULT_TAX_PERCENT").ok())?,
                renewal_anchor: env::var("BILLING_RENEWAL_ANCHOR")
                    .unwrap_or_else(|_| "sweep".to_string())
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            },
            scheduler: SchedulerConfig {
                enabled: parse_env("BILLING_SWEEP_ENABLED", true),
                run_at: parse_run_at(env::var("BILLING_SWEEP_TIME_UTC").ok())?,
            },
            smtp: smtp_from_env(),
        })
    }
}

fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn parse_tax_percent(raw: Option<String>) -> Result<Decimal, AppError> {
    let Some(raw) = raw else {
        return Ok(Decimal::from(18));
    };
    let tax = Decimal::from_str(raw.trim()).map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!("Invalid DEFAULT_TAX_PERCENT '{}': {}", raw, e))
    })?;
    if tax.is_sign_negative() || tax > Decimal::ONE_HUNDRED {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "DEFAULT_TAX_PERCENT must be within 0..=100, got {}",
            tax
        )));
    }
    Ok(tax)
}

fn parse_run_at(raw: Option<String>) -> Result<NaiveTime, AppError> {
    match raw {
        None => Ok(NaiveTime::MIN),
        Some(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!(
                "Invalid BILLING_SWEEP_TIME_UTC '{}', expected HH:MM: {}",
                raw,
                e
            ))
        }),
    }
}

fn smtp_from_env() -> Option<SmtpConfig> {
    let host = env::var("SMTP_HOST").ok()?;
    Some(SmtpConfig {
        host,
        port: parse_env("SMTP_PORT", 587),
        user: env::var("SMTP_USER").unwrap_or_default(),
        password: env::var("SMTP_PASSWORD").unwrap_or_default(),
        from: env::var("SMTP_FROM").unwrap_or_else(|_| "billing@localhost".to_string()),
    })
}
