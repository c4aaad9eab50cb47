//! Cron-driven job launcher.
//!
//! Polls `scheduled_jobs` on a coarse interval; any enabled schedule whose
//! `next_run` has passed is launched via [`JobEngine::start_job`] with
//! [`JobMode::Missing`]. A launch that fails (most commonly a `Conflict`
//! because the job is already running) is logged and the schedule is left
//! alone until its next tick — it is not retried or rescheduled early.

use super::{JobEngine, JobMode};
use crate::db::schedules::{self, ScheduledJob};
use chrono::{DateTime, Utc};
use croner::Cron;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

/// How often schedules are re-checked against the wall clock. Coarser than
/// the jobs themselves run at; `next_run` carries the actual precision.
const POLL_INTERVAL: Duration = Duration::from_secs(30);

pub struct Scheduler {
    pool: SqlitePool,
    engine: Arc<JobEngine>,
}

impl Scheduler {
    pub fn new(pool: SqlitePool, engine: Arc<JobEngine>) -> Self {
        Self { pool, engine }
    }

    /// Runs until the process exits, polling every [`POLL_INTERVAL`].
    pub async fn run(self) {
        loop {
            if let Err(err) = self.tick().await {
                tracing::warn!(error = %err, "scheduler tick failed");
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn tick(&self) -> anyhow::Result<()> {
        let now = Utc::now();
        for schedule in schedules::list_enabled(&self.pool).await? {
            if is_due(&schedule, now) {
                self.launch(&schedule, now).await;
            }
        }
        Ok(())
    }

    async fn launch(&self, schedule: &ScheduledJob, now: DateTime<Utc>) {
        match self.engine.start_job(&schedule.job_name, JobMode::Missing).await {
            Ok(execution_id) => {
                tracing::info!(job = %schedule.job_name, execution_id, "scheduled job launched");
            }
            Err(err) => {
                tracing::warn!(job = %schedule.job_name, error = %err, "scheduled launch skipped");
            }
        }

        let next_run = next_occurrence(&schedule.cron_expression, now);
        if let Err(err) = schedules::record_launch(&self.pool, schedule.id, now, next_run).await {
            tracing::warn!(job = %schedule.job_name, error = %err, "failed to record schedule launch");
        }
    }
}

fn is_due(schedule: &ScheduledJob, now: DateTime<Utc>) -> bool {
    match schedule.next_run {
        Some(next_run) => next_run <= now,
        None => true,
    }
}

fn next_occurrence(cron_expression: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match Cron::new(cron_expression).parse() {
        Ok(cron) => match cron.find_next_occurrence(&after, false) {
            Ok(next) => Some(next),
            Err(err) => {
                tracing::warn!(cron = %cron_expression, error = %err, "failed to compute next occurrence");
                None
            }
        },
        Err(err) => {
            tracing::warn!(cron = %cron_expression, error = %err, "invalid cron expression");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_when_next_run_is_unset() {
        let schedule = ScheduledJob {
            id: 1,
            job_name: "scan_all".into(),
            cron_expression: "0 * * * *".into(),
            is_enabled: true,
            last_run: None,
            next_run: None,
        };
        assert!(is_due(&schedule, Utc::now()));
    }

    #[test]
    fn not_due_when_next_run_is_in_the_future() {
        let schedule = ScheduledJob {
            id: 1,
            job_name: "scan_all".into(),
            cron_expression: "0 * * * *".into(),
            is_enabled: true,
            last_run: None,
            next_run: Some(Utc::now() + chrono::Duration::hours(1)),
        };
        assert!(!is_due(&schedule, Utc::now()));
    }

    #[test]
    fn next_occurrence_advances_past_now() {
        let now = Utc::now();
        let next = next_occurrence("0 * * * *", now).expect("valid cron expression");
        assert!(next > now);
    }

    #[test]
    fn invalid_expression_yields_no_occurrence() {
        assert!(next_occurrence("not a cron expression", Utc::now()).is_none());
    }
}
