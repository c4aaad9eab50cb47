//! Excluded-file records: paths deliberately skipped by duplicate resolution.

use super::core::DbResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ExcludedFile {
    pub id: i64,
    pub library_id: i64,
    pub relative_path: String,
    pub content_hash: String,
    pub excluded_date: DateTime<Utc>,
    pub reason: Option<String>,
}

pub async fn record_exclusion_if_absent(
    pool: &SqlitePool,
    library_id: i64,
    relative_path: &str,
    content_hash: &str,
    reason: Option<&str>,
) -> DbResult<()> {
    let mut tx = pool.begin().await?;
    record_exclusion_if_absent_tx(&mut tx, library_id, relative_path, content_hash, reason).await?;
    tx.commit().await?;
    Ok(())
}

/// Transaction-scoped variant used by the resolver's keep-one merge so the
/// exclusion record shares the commit zone with the loser's row deletion.
pub async fn record_exclusion_if_absent_tx(
    tx: &mut sqlx::SqliteConnection,
    library_id: i64,
    relative_path: &str,
    content_hash: &str,
    reason: Option<&str>,
) -> DbResult<()> {
    let exists: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM excluded_files WHERE library_id = ? AND relative_path = ?",
    )
    .bind(library_id)
    .bind(relative_path)
    .fetch_optional(&mut *tx)
    .await?;

    if exists.is_some() {
        return Ok(());
    }

    sqlx::query(
        "INSERT INTO excluded_files (library_id, relative_path, content_hash, reason) VALUES (?, ?, ?, ?)",
    )
    .bind(library_id)
    .bind(relative_path)
    .bind(content_hash)
    .bind(reason)
    .execute(&mut *tx)
    .await?;
    Ok(())
}

/// Exclusion-coherence lookup used by the synchronizer: `Some(hash)` iff the
/// path is currently excluded.
pub async fn snapshot_by_path(pool: &SqlitePool, library_id: i64) -> DbResult<Vec<(String, String)>> {
    Ok(sqlx::query_as::<_, (String, String)>(
        "SELECT relative_path, content_hash FROM excluded_files WHERE library_id = ?",
    )
    .bind(library_id)
    .fetch_all(pool)
    .await?)
}

pub async fn remove_exclusion(pool: &SqlitePool, library_id: i64, relative_path: &str) -> DbResult<()> {
    sqlx::query("DELETE FROM excluded_files WHERE library_id = ? AND relative_path = ?")
        .bind(library_id)
        .bind(relative_path)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_all(pool: &SqlitePool) -> DbResult<Vec<ExcludedFile>> {
    Ok(sqlx::query_as::<_, ExcludedFile>("SELECT * FROM excluded_files")
        .fetch_all(pool)
        .await?)
}

pub async fn delete_ids(pool: &SqlitePool, ids: &[i64]) -> DbResult<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!("DELETE FROM excluded_files WHERE id IN ({placeholders})");
    let mut query = sqlx::query(&sql);
    for id in ids {
        query = query.bind(id);
    }
    Ok(query.execute(pool).await?.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::core::init_schema;
    use crate::db::libraries::create_library;

    #[tokio::test]
    async fn recording_twice_is_a_no_op() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        let lib = create_library(&pool, "L", "/lib", 24).await.unwrap();

        record_exclusion_if_absent(&pool, lib.id, "a.jpg", "h1", None).await.unwrap();
        record_exclusion_if_absent(&pool, lib.id, "a.jpg", "h1", None).await.unwrap();

        let all = list_all(&pool).await.unwrap();
        assert_eq!(all.len(), 1);
    }
}
