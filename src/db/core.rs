//! Connection pool setup and schema creation.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Opens a connection pool, creating the database file if it does not exist.
pub async fn init_pool(database_url: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    init_schema(&pool).await?;
    Ok(pool)
}

/// Idempotent schema creation: safe to call on every startup.
pub async fn init_schema(pool: &SqlitePool) -> DbResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS libraries (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            name                TEXT NOT NULL,
            path                TEXT NOT NULL UNIQUE,
            scan_interval_hours INTEGER NOT NULL DEFAULT 24,
            created_at          TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ignored_prefixes (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            library_id   INTEGER NOT NULL REFERENCES libraries(id) ON DELETE CASCADE,
            relative_path TEXT NOT NULL,
            UNIQUE(library_id, relative_path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tag_categories (
            id    INTEGER PRIMARY KEY AUTOINCREMENT,
            name  TEXT NOT NULL UNIQUE,
            color TEXT NOT NULL DEFAULT '#888888',
            sort_order INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tags (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            name            TEXT NOT NULL UNIQUE,
            tag_category_id INTEGER REFERENCES tag_categories(id) ON DELETE SET NULL,
            post_count      INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS posts (
            id                     INTEGER PRIMARY KEY AUTOINCREMENT,
            library_id             INTEGER NOT NULL REFERENCES libraries(id) ON DELETE CASCADE,
            relative_path          TEXT NOT NULL,
            content_hash           TEXT NOT NULL,
            size_bytes             INTEGER NOT NULL,
            width                  INTEGER NOT NULL DEFAULT 0,
            height                 INTEGER NOT NULL DEFAULT 0,
            content_type           TEXT NOT NULL DEFAULT '',
            import_date            TEXT NOT NULL DEFAULT (datetime('now')),
            file_modified_date     TEXT NOT NULL,
            file_identity_device   TEXT,
            file_identity_value    TEXT,
            pdq_hash_256           TEXT,
            is_favorite            INTEGER NOT NULL DEFAULT 0,
            UNIQUE(library_id, relative_path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_content_hash ON posts(content_hash)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_identity ON posts(file_identity_device, file_identity_value)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_library ON posts(library_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS post_tags (
            post_id INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            tag_id  INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
            source  TEXT NOT NULL CHECK (source IN ('manual', 'folder', 'ai')),
            PRIMARY KEY (post_id, tag_id, source)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS post_sources (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            post_id    INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            url        TEXT NOT NULL,
            sort_order INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS excluded_files (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            library_id    INTEGER NOT NULL REFERENCES libraries(id) ON DELETE CASCADE,
            relative_path TEXT NOT NULL,
            content_hash  TEXT NOT NULL,
            excluded_date TEXT NOT NULL DEFAULT (datetime('now')),
            reason        TEXT,
            UNIQUE(library_id, relative_path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS duplicate_groups (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            group_type         TEXT NOT NULL CHECK (group_type IN ('exact', 'perceptual')),
            similarity_percent INTEGER,
            is_resolved        INTEGER NOT NULL DEFAULT 0,
            detected_date      TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS duplicate_group_entries (
            group_id INTEGER NOT NULL REFERENCES duplicate_groups(id) ON DELETE CASCADE,
            post_id  INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            PRIMARY KEY (group_id, post_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_executions (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            job_name      TEXT NOT NULL,
            status        TEXT NOT NULL CHECK (status IN ('idle', 'running', 'completed', 'failed', 'cancelled')),
            start_time    TEXT NOT NULL DEFAULT (datetime('now')),
            end_time      TEXT,
            error_message TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_executions_start ON job_executions(start_time DESC)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scheduled_jobs (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            job_name        TEXT NOT NULL UNIQUE,
            cron_expression TEXT NOT NULL,
            is_enabled      INTEGER NOT NULL DEFAULT 1,
            last_run        TEXT,
            next_run        TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS post_audit_entries (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            post_id        INTEGER NOT NULL,
            occurred_at    TEXT NOT NULL DEFAULT (datetime('now')),
            entity         TEXT NOT NULL,
            operation      TEXT NOT NULL CHECK (operation IN ('insert', 'update', 'delete')),
            field          TEXT,
            old_value      TEXT,
            new_value      TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_post ON post_audit_entries(post_id)")
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn schema_creates_all_tables() {
        let pool = memory_pool().await;
        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table'")
                .fetch_all(&pool)
                .await
                .unwrap();
        let names: Vec<String> = tables.into_iter().map(|(n,)| n).collect();
        for expected in [
            "libraries",
            "posts",
            "tags",
            "post_tags",
            "post_sources",
            "excluded_files",
            "duplicate_groups",
            "duplicate_group_entries",
            "job_executions",
            "scheduled_jobs",
            "post_audit_entries",
        ] {
            assert!(names.contains(&expected.to_string()), "missing table {expected}");
        }
    }

    #[tokio::test]
    async fn schema_init_is_idempotent() {
        let pool = memory_pool().await;
        init_schema(&pool).await.unwrap();
        init_schema(&pool).await.unwrap();
    }
}
