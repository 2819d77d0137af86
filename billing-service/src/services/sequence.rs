//! Human-readable record numbers: `PREFIX-YYYYMMDD-NNN`.

use super::store::BillingStore;
use chrono::NaiveDate;
use service_core::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceKind {
    Subscription,
    Invoice,
}

impl SequenceKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            SequenceKind::Subscription => "SUB",
            SequenceKind::Invoice => "INV",
        }
    }
}

/// Render a number. The counter is zero-padded to three digits and widens
/// past 999.
pub fn format_number(prefix: &str, day: NaiveDate, counter: i64) -> String {
    format!("{}-{}-{:03}", prefix, day.format("%Y%m%d"), counter)
}

/// Draw the next number for `kind` on `day`.
///
/// The counter is incremented atomically in the store, so concurrent callers
/// never share a number. A number drawn by a unit of work that later rolls
/// back is not reused.
pub async fn next_number(
    store: &dyn BillingStore,
    kind: SequenceKind,
    day: NaiveDate,
) -> Result<String, AppError> {
    let counter = store.next_sequence(kind.prefix(), day).await?;
    Ok(format_number(kind.prefix(), day, counter))
}
