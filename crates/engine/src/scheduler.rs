//! Cron scheduler for recurring jobs.
//!
//! Each registered job gets its own tokio task that sleeps until the next
//! occurrence of its cron pattern in its own timezone, runs the handler, and
//! repeats. Registration is idempotent by name.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use croner::Cron;
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid cron expression '{spec}': {reason}")]
    InvalidCron { spec: String, reason: String },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),
}

/// Parse a 5-field (minute resolution) or 6-field (with seconds) cron pattern.
pub fn parse_cron(spec: &str) -> Result<Cron, SchedulerError> {
    Cron::new(spec)
        .with_seconds_optional()
        .parse()
        .map_err(|e| SchedulerError::InvalidCron {
            spec: spec.to_string(),
            reason: e.to_string(),
        })
}

pub fn parse_timezone(name: &str) -> Result<Tz, SchedulerError> {
    name.parse::<Tz>()
        .map_err(|_| SchedulerError::InvalidTimezone(name.to_string()))
}

/// First occurrence of `cron` strictly after `after`, evaluated in `tz`.
pub fn next_occurrence(cron: &Cron, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    cron.find_next_occurrence(&after.with_timezone(&tz), false)
        .ok()
        .map(|next| next.with_timezone(&Utc))
}

#[derive(Default)]
pub struct Scheduler {
    jobs: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Schedule `handler` under `name`.
    ///
    /// Returns `Ok(false)` without touching anything when `name` is already
    /// registered.
    pub fn register<F, Fut>(
        &self,
        name: &str,
        cron_spec: &str,
        timezone: &str,
        handler: F,
    ) -> Result<bool, SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let cron = parse_cron(cron_spec)?;
        let tz = parse_timezone(timezone)?;

        let mut jobs = self.jobs();
        if jobs.contains_key(name) {
            tracing::debug!(job = name, "Job already scheduled, skipping");
            return Ok(false);
        }

        if let Some(next) = next_occurrence(&cron, tz, Utc::now()) {
            tracing::info!(job = name, cron = cron_spec, timezone, next_run = %next, "Job scheduled");
        }

        let handle = tokio::spawn(run_schedule(name.to_string(), cron, tz, handler));
        jobs.insert(name.to_string(), handle);
        Ok(true)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.jobs().contains_key(name)
    }

    /// Abort every scheduled task. Returns how many were stopped.
    pub fn stop_all(&self) -> usize {
        let mut jobs = self.jobs();
        let stopped = jobs.len();
        for (name, handle) in jobs.drain() {
            handle.abort();
            tracing::debug!(job = %name, "Scheduled job stopped");
        }
        if stopped > 0 {
            tracing::info!(stopped, "Scheduler stopped");
        }
        stopped
    }
}

async fn run_schedule<F, Fut>(name: String, cron: Cron, tz: Tz, handler: F)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let mut last_fire: Option<DateTime<Utc>> = None;

    loop {
        // Never look before the previous fire time, even if the clock reads earlier.
        let now = Utc::now();
        let after = last_fire.map_or(now, |fired| fired.max(now));

        let Some(next) = next_occurrence(&cron, tz, after) else {
            tracing::warn!(job = %name, "Cron pattern has no future occurrence, stopping");
            return;
        };

        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;
        last_fire = Some(next);

        tracing::debug!(job = %name, scheduled_for = %next, "Running scheduled job");
        match tokio::spawn(handler()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(job = %name, error = %format!("{e:#}"), "Scheduled job failed");
            }
            Err(e) => {
                tracing::error!(job = %name, error = %e, "Scheduled job panicked");
            }
        }
    }
}
