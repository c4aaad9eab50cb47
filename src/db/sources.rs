//! Ordered external-URL sources attached to a post.

use super::core::DbResult;
use serde::Serialize;
use sqlx::SqlitePool;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PostSource {
    pub id: i64,
    pub post_id: i64,
    pub url: String,
    pub sort_order: i64,
}

pub async fn list_post_sources(pool: &SqlitePool, post_id: i64) -> DbResult<Vec<PostSource>> {
    Ok(sqlx::query_as::<_, PostSource>(
        "SELECT * FROM post_sources WHERE post_id = ? ORDER BY sort_order",
    )
    .bind(post_id)
    .fetch_all(pool)
    .await?)
}

pub async fn list_post_sources_tx(tx: &mut sqlx::SqliteConnection, post_id: i64) -> DbResult<Vec<PostSource>> {
    Ok(sqlx::query_as::<_, PostSource>(
        "SELECT * FROM post_sources WHERE post_id = ? ORDER BY sort_order",
    )
    .bind(post_id)
    .fetch_all(&mut *tx)
    .await?)
}

/// Appends `url` at the next `sort_order` unless a case-insensitive match
/// already exists for this post.
pub async fn append_source_if_absent(pool: &SqlitePool, post_id: i64, url: &str) -> DbResult<()> {
    let mut tx = pool.begin().await?;
    append_source_if_absent_tx(&mut tx, post_id, url).await?;
    tx.commit().await?;
    Ok(())
}

/// Transaction-scoped variant used by the resolver's keep-one merge so the
/// source copy shares the commit zone with the loser's row deletion.
pub async fn append_source_if_absent_tx(
    tx: &mut sqlx::SqliteConnection,
    post_id: i64,
    url: &str,
) -> DbResult<()> {
    let existing = list_post_sources_tx(&mut *tx, post_id).await?;
    if existing.iter().any(|s| s.url.eq_ignore_ascii_case(url)) {
        return Ok(());
    }
    let next_order = existing.iter().map(|s| s.sort_order).max().map(|o| o + 1).unwrap_or(0);
    sqlx::query("INSERT INTO post_sources (post_id, url, sort_order) VALUES (?, ?, ?)")
        .bind(post_id)
        .bind(url)
        .bind(next_order)
        .execute(&mut *tx)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::core::init_schema;
    use crate::db::libraries::create_library;
    use crate::db::posts::{insert_post, NewPost};
    use chrono::Utc;

    #[tokio::test]
    async fn append_is_case_insensitively_deduped() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        let lib = create_library(&pool, "L", "/lib", 24).await.unwrap();
        let post_id = insert_post(
            &pool,
            &NewPost {
                library_id: lib.id,
                relative_path: "a.jpg",
                content_hash: "h",
                size_bytes: 1,
                file_modified_date: Utc::now(),
                file_identity_device: None,
                file_identity_value: None,
                content_type: "",
            },
        )
        .await
        .unwrap();

        append_source_if_absent(&pool, post_id, "https://example.com/a").await.unwrap();
        append_source_if_absent(&pool, post_id, "HTTPS://EXAMPLE.COM/A").await.unwrap();

        let sources = list_post_sources(&pool, post_id).await.unwrap();
        assert_eq!(sources.len(), 1);
    }
}
