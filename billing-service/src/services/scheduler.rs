//! Runs the billing sweep once a day.

use super::sweep::{BillingSweep, SweepSummary};
use chrono::{DateTime, Days, NaiveTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct BillingScheduler {
    sweep: BillingSweep,
    run_at: NaiveTime,
    in_flight: Arc<Mutex<()>>,
}

impl BillingScheduler {
    pub fn new(sweep: BillingSweep, run_at: NaiveTime) -> Self {
        Self {
            sweep,
            run_at,
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    /// Run one sweep now. Returns `None` without sweeping when another sweep
    /// is still in flight.
    pub async fn trigger(&self) -> Option<SweepSummary> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::warn!("Previous billing sweep still running, trigger skipped");
            return None;
        };

        match self.sweep.run_daily_billing_sweep().await {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::error!(error = %e, "Billing sweep aborted");
                None
            }
        }
    }

    /// Sweep every day at `run_at` UTC until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) {
        tracing::info!(run_at = %self.run_at, "Billing scheduler started");

        loop {
            let wait = duration_until_next(Utc::now(), self.run_at);
            tracing::debug!(wait_secs = wait.as_secs(), "Next billing sweep scheduled");

            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("Billing scheduler shutting down");
                    break;
                }
                _ = tokio::time::sleep(wait) => {
                    let scheduler = self.clone();
                    tokio::spawn(async move {
                        scheduler.trigger().await;
                    });
                }
            }
        }
    }
}

/// Time from `now` until the next occurrence of `run_at` (UTC). A run time
/// equal to `now` is scheduled for the following day.
pub fn duration_until_next(now: DateTime<Utc>, run_at: NaiveTime) -> Duration {
    let today_run = now.date_naive().and_time(run_at).and_utc();
    let next = if today_run > now {
        today_run
    } else {
        now.date_naive()
            .checked_add_days(Days::new(1))
            .map_or(today_run, |d| d.and_time(run_at).and_utc())
    };
    (next - now).to_std().unwrap_or_default()
}
