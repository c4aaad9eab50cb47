//! Library CRUD and ignored-prefix management.

use super::core::{DbError, DbResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Library {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub scan_interval_hours: i64,
    pub created_at: DateTime<Utc>,
}

pub async fn create_library(
    pool: &SqlitePool,
    name: &str,
    path: &str,
    scan_interval_hours: i64,
) -> DbResult<Library> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO libraries (name, path, scan_interval_hours) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(name)
    .bind(path)
    .bind(scan_interval_hours)
    .fetch_one(pool)
    .await?;

    get_library(pool, id).await
}

pub async fn get_library(pool: &SqlitePool, id: i64) -> DbResult<Library> {
    sqlx::query_as::<_, Library>("SELECT * FROM libraries WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("library {id}")))
}

pub async fn list_libraries(pool: &SqlitePool) -> DbResult<Vec<Library>> {
    Ok(sqlx::query_as::<_, Library>("SELECT * FROM libraries ORDER BY name")
        .fetch_all(pool)
        .await?)
}

pub async fn delete_library(pool: &SqlitePool, id: i64) -> DbResult<()> {
    let result = sqlx::query("DELETE FROM libraries WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound(format!("library {id}")));
    }
    Ok(())
}

pub async fn add_ignored_prefix(pool: &SqlitePool, library_id: i64, relative_path: &str) -> DbResult<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO ignored_prefixes (library_id, relative_path) VALUES (?, ?)",
    )
    .bind(library_id)
    .bind(relative_path)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_ignored_prefixes(pool: &SqlitePool, library_id: i64) -> DbResult<Vec<String>> {
    Ok(sqlx::query_scalar::<_, String>(
        "SELECT relative_path FROM ignored_prefixes WHERE library_id = ?",
    )
    .bind(library_id)
    .fetch_all(pool)
    .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::core::init_schema;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn create_and_get_roundtrip() {
        let pool = memory_pool().await;
        let lib = create_library(&pool, "Photos", "/data/photos", 24).await.unwrap();
        let fetched = get_library(&pool, lib.id).await.unwrap();
        assert_eq!(fetched.path, "/data/photos");
    }

    #[tokio::test]
    async fn delete_missing_library_is_not_found() {
        let pool = memory_pool().await;
        let err = delete_library(&pool, 999).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));
    }

    #[tokio::test]
    async fn ignored_prefixes_are_deduped() {
        let pool = memory_pool().await;
        let lib = create_library(&pool, "Photos", "/data/photos", 24).await.unwrap();
        add_ignored_prefix(&pool, lib.id, "tmp").await.unwrap();
        add_ignored_prefix(&pool, lib.id, "tmp").await.unwrap();
        let prefixes = list_ignored_prefixes(&pool, lib.id).await.unwrap();
        assert_eq!(prefixes.len(), 1);
    }
}
