//! Cron jobs.
//!
//! Expressions use the `cron` crate syntax (`sec min hour dom month dow
//! [year]`). Classic five-field expressions are accepted and padded with a
//! zero seconds field and a wildcard year.

use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Local;
use cron::Schedule;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::ResourceError;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Parses a cron expression with five, six or seven fields.
pub fn parse_schedule(expr: &str) -> Result<Schedule, ResourceError> {
    let expr = expr.trim();
    Schedule::from_str(expr)
        .or_else(|_| Schedule::from_str(&format!("0 {expr} *")))
        .map_err(|e| ResourceError::InvalidCron {
            expr: expr.to_string(),
            reason: e.to_string(),
        })
}

/// A running cron job. Stopping is idempotent.
#[derive(Debug)]
pub struct CronJob {
    id: u64,
    expr: String,
    token: CancellationToken,
}

impl CronJob {
    /// Starts running `job` on `expr`'s schedule in local time.
    ///
    /// Each firing runs on its own task, so a slow or panicking job never
    /// delays the next firing.
    pub fn spawn<F, Fut>(expr: &str, job: F) -> Result<Self, ResourceError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let schedule = parse_schedule(expr)?;
        let id = NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let cancelled = token.clone();

        tokio::spawn(async move {
            while let Some(next) = schedule.after(&Local::now()).next() {
                let wait = (next - Local::now()).to_std().unwrap_or_default();
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
                trace!(job = id, "Cron job firing");
                tokio::spawn(job());
            }
            debug!(job = id, "Cron job finished");
        });

        Ok(Self {
            id,
            expr: expr.trim().to_string(),
            token,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_parse_field_counts() {
        assert!(parse_schedule("*/5 * * * *").is_ok());
        assert!(parse_schedule("0 30 9 * * Mon-Fri").is_ok());
        assert!(parse_schedule("0 0 12 1 1 * 2030").is_ok());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = parse_schedule("every tuesday").unwrap_err();
        assert!(matches!(err, ResourceError::InvalidCron { ref expr, .. } if expr == "every tuesday"));
        assert!(parse_schedule("").is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_job_fires_and_stops() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let job = CronJob::spawn("* * * * * *", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

        tokio::time::sleep(Duration::from_millis(2200)).await;
        job.stop();
        assert!(job.is_stopped());

        let seen = fired.load(Ordering::SeqCst);
        assert!(seen >= 1, "job never fired");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(fired.load(Ordering::SeqCst) <= seen + 1);
    }
}
