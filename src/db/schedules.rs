//! Cron schedules for the scheduler.

use super::core::{DbError, DbResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ScheduledJob {
    pub id: i64,
    pub job_name: String,
    pub cron_expression: String,
    pub is_enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

pub async fn upsert_schedule(
    pool: &SqlitePool,
    job_name: &str,
    cron_expression: &str,
    is_enabled: bool,
) -> DbResult<ScheduledJob> {
    sqlx::query(
        r#"
        INSERT INTO scheduled_jobs (job_name, cron_expression, is_enabled)
        VALUES (?, ?, ?)
        ON CONFLICT(job_name) DO UPDATE SET
            cron_expression = excluded.cron_expression,
            is_enabled = excluded.is_enabled
        "#,
    )
    .bind(job_name)
    .bind(cron_expression)
    .bind(is_enabled)
    .execute(pool)
    .await?;

    get_schedule_by_name(pool, job_name).await
}

pub async fn get_schedule_by_name(pool: &SqlitePool, job_name: &str) -> DbResult<ScheduledJob> {
    sqlx::query_as::<_, ScheduledJob>("SELECT * FROM scheduled_jobs WHERE job_name = ?")
        .bind(job_name)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("schedule {job_name}")))
}

pub async fn list_enabled(pool: &SqlitePool) -> DbResult<Vec<ScheduledJob>> {
    Ok(sqlx::query_as::<_, ScheduledJob>(
        "SELECT * FROM scheduled_jobs WHERE is_enabled = 1",
    )
    .fetch_all(pool)
    .await?)
}

pub async fn record_launch(
    pool: &SqlitePool,
    id: i64,
    last_run: DateTime<Utc>,
    next_run: Option<DateTime<Utc>>,
) -> DbResult<()> {
    sqlx::query("UPDATE scheduled_jobs SET last_run = ?, next_run = ? WHERE id = ?")
        .bind(last_run)
        .bind(next_run)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::core::init_schema;

    #[tokio::test]
    async fn upsert_is_idempotent_by_job_name() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();

        upsert_schedule(&pool, "scan-all-libraries", "0 * * * *", true).await.unwrap();
        upsert_schedule(&pool, "scan-all-libraries", "0 0 * * *", true).await.unwrap();

        let schedule = get_schedule_by_name(&pool, "scan-all-libraries").await.unwrap();
        assert_eq!(schedule.cron_expression, "0 0 * * *");

        let enabled = list_enabled(&pool).await.unwrap();
        assert_eq!(enabled.len(), 1);
    }
}
