//! Invoice notifications.

use crate::config::SmtpConfig;
use crate::models::{Invoice, UserContact};
use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use service_core::error::AppError;
use std::time::Duration;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn invoice_issued(&self, to: &UserContact, invoice: &Invoice) -> Result<(), AppError>;
}

/// Writes notifications to the log instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn invoice_issued(&self, to: &UserContact, invoice: &Invoice) -> Result<(), AppError> {
        tracing::info!(
            to = %to.email,
            invoice_number = %invoice.invoice_number,
            amount = %invoice.amount,
            due_date = %invoice.due_date,
            "Invoice notification (not sent, SMTP disabled)"
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct EmailNotifier {
    mailer: SmtpTransport,
    from_email: String,
}

impl EmailNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, AppError> {
        let creds = Credentials::new(config.user.clone(), config.password.clone());

        let mailer = SmtpTransport::starttls_relay(&config.host)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e.to_string())))?
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, port = config.port, "Email notifier initialized");

        Ok(Self {
            mailer,
            from_email: config.from.clone(),
        })
    }

    fn invoice_body(to: &UserContact, invoice: &Invoice) -> String {
        let mut body = format!(
            "Hello {},\n\nInvoice {} for {} is due on {}.\n\n",
            to.name, invoice.invoice_number, invoice.amount, invoice.due_date
        );
        for line in invoice.lines.iter() {
            body.push_str(&format!("  {:<48} {:>12}\n", line.description, line.amount));
        }
        body.push_str(&format!("\n  {:<48} {:>12}\n", "Total", invoice.amount));
        body
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn invoice_issued(&self, to: &UserContact, invoice: &Invoice) -> Result<(), AppError> {
        let email = Message::builder()
            .from(
                self.from_email
                    .parse()
                    .map_err(|e: lettre::address::AddressError| AppError::InternalError(e.into()))?,
            )
            .to(to
                .email
                .parse()
                .map_err(|e: lettre::address::AddressError| AppError::InternalError(e.into()))?)
            .subject(format!("Invoice {}", invoice.invoice_number))
            .header(ContentType::TEXT_PLAIN)
            .body(Self::invoice_body(to, invoice))
            .map_err(|e| AppError::InternalError(e.into()))?;

        // SmtpTransport is blocking
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| AppError::InternalError(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!(
                    to = %to.email,
                    invoice_number = %invoice.invoice_number,
                    "Invoice email sent"
                );
                Ok(())
            }
            Err(e) => Err(AppError::EmailError(e.to_string())),
        }
    }
}
