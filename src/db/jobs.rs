//! Persistent job-execution history.

use super::core::{DbError, DbResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Idle => "idle",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct JobExecution {
    pub id: i64,
    pub job_name: String,
    pub status: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

pub async fn start_execution(pool: &SqlitePool, job_name: &str) -> DbResult<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO job_executions (job_name, status) VALUES (?, 'running') RETURNING id",
    )
    .bind(job_name)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn complete_execution(pool: &SqlitePool, id: i64) -> DbResult<()> {
    sqlx::query(
        "UPDATE job_executions SET status = 'completed', end_time = datetime('now') WHERE id = ?",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fail_execution(pool: &SqlitePool, id: i64, error_message: &str) -> DbResult<()> {
    sqlx::query(
        "UPDATE job_executions SET status = 'failed', end_time = datetime('now'), error_message = ? WHERE id = ?",
    )
    .bind(error_message)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn cancel_execution(pool: &SqlitePool, id: i64) -> DbResult<()> {
    sqlx::query(
        "UPDATE job_executions SET status = 'cancelled', end_time = datetime('now') WHERE id = ?",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_execution(pool: &SqlitePool, id: i64) -> DbResult<JobExecution> {
    sqlx::query_as::<_, JobExecution>("SELECT * FROM job_executions WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("job execution {id}")))
}

pub async fn history_page(
    pool: &SqlitePool,
    page: i64,
    page_size: i64,
) -> DbResult<(Vec<JobExecution>, i64)> {
    let offset = page.max(0) * page_size;
    let items = sqlx::query_as::<_, JobExecution>(
        "SELECT * FROM job_executions ORDER BY start_time DESC LIMIT ? OFFSET ?",
    )
    .bind(page_size)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_executions")
        .fetch_one(pool)
        .await?;

    Ok((items, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::core::init_schema;

    #[tokio::test]
    async fn lifecycle_transitions_are_recorded() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();

        let id = start_execution(&pool, "scan-all-libraries").await.unwrap();
        let exec = get_execution(&pool, id).await.unwrap();
        assert_eq!(exec.status, "running");

        complete_execution(&pool, id).await.unwrap();
        let exec = get_execution(&pool, id).await.unwrap();
        assert_eq!(exec.status, "completed");
        assert!(exec.end_time.is_some());
    }

    #[tokio::test]
    async fn history_is_paginated_most_recent_first() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();

        for _ in 0..3 {
            start_execution(&pool, "scan-all-libraries").await.unwrap();
        }

        let (items, total) = history_page(&pool, 0, 2).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(total, 3);
    }
}
