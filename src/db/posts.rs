//! Post CRUD and the bulk read/write operations the library synchronizer
//! and derived-data jobs need.

use super::core::{DbError, DbResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub library_id: i64,
    pub relative_path: String,
    pub content_hash: String,
    pub size_bytes: i64,
    pub width: i64,
    pub height: i64,
    pub content_type: String,
    pub import_date: DateTime<Utc>,
    pub file_modified_date: DateTime<Utc>,
    pub file_identity_device: Option<String>,
    pub file_identity_value: Option<String>,
    pub pdq_hash_256: Option<String>,
    pub is_favorite: bool,
}

/// Minimal projection used to build the synchronizer's in-memory snapshot —
/// loading full `Post` rows for every file on every sync would be wasteful.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExistingPostInfo {
    pub id: i64,
    pub relative_path: String,
    pub content_hash: String,
    pub size_bytes: i64,
    pub file_modified_date: DateTime<Utc>,
    pub file_identity_device: Option<String>,
    pub file_identity_value: Option<String>,
}

pub struct NewPost<'a> {
    pub library_id: i64,
    pub relative_path: &'a str,
    pub content_hash: &'a str,
    pub size_bytes: i64,
    pub file_modified_date: DateTime<Utc>,
    pub file_identity_device: Option<&'a str>,
    pub file_identity_value: Option<&'a str>,
    pub content_type: &'a str,
}

pub async fn get_post(pool: &SqlitePool, id: i64) -> DbResult<Post> {
    sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("post {id}")))
}

pub async fn get_post_by_path(pool: &SqlitePool, library_id: i64, relative_path: &str) -> DbResult<Option<Post>> {
    Ok(
        sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE library_id = ? AND relative_path = ?")
            .bind(library_id)
            .bind(relative_path)
            .fetch_optional(pool)
            .await?,
    )
}

/// Snapshot of every existing post's sync-relevant fields for one library,
/// keyed by relative path — step 2 of the library sync algorithm.
pub async fn snapshot_existing(pool: &SqlitePool, library_id: i64) -> DbResult<Vec<ExistingPostInfo>> {
    Ok(sqlx::query_as::<_, ExistingPostInfo>(
        "SELECT id, relative_path, content_hash, size_bytes, file_modified_date,
                file_identity_device, file_identity_value
         FROM posts WHERE library_id = ?",
    )
    .bind(library_id)
    .fetch_all(pool)
    .await?)
}

pub async fn insert_post(pool: &SqlitePool, new_post: &NewPost<'_>) -> DbResult<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO posts (
            library_id, relative_path, content_hash, size_bytes,
            file_modified_date, file_identity_device, file_identity_value, content_type
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(new_post.library_id)
    .bind(new_post.relative_path)
    .bind(new_post.content_hash)
    .bind(new_post.size_bytes)
    .bind(new_post.file_modified_date)
    .bind(new_post.file_identity_device)
    .bind(new_post.file_identity_value)
    .bind(new_post.content_type)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Applies a content/size/mtime/identity update. When `reset_derived` is set
/// (the content hash changed), also zeroes `width`/`height` and clears the
/// perceptual hash so downstream jobs re-derive them.
pub async fn update_post_content(
    tx: &mut sqlx::SqliteConnection,
    post_id: i64,
    content_hash: &str,
    size_bytes: i64,
    file_modified_date: DateTime<Utc>,
    file_identity_device: Option<&str>,
    file_identity_value: Option<&str>,
    reset_derived: bool,
) -> DbResult<()> {
    if reset_derived {
        sqlx::query(
            r#"
            UPDATE posts SET
                content_hash = ?, size_bytes = ?, file_modified_date = ?,
                file_identity_device = ?, file_identity_value = ?,
                width = 0, height = 0, pdq_hash_256 = NULL
            WHERE id = ?
            "#,
        )
        .bind(content_hash)
        .bind(size_bytes)
        .bind(file_modified_date)
        .bind(file_identity_device)
        .bind(file_identity_value)
        .bind(post_id)
        .execute(tx)
        .await?;
    } else {
        sqlx::query(
            r#"
            UPDATE posts SET
                content_hash = ?, size_bytes = ?, file_modified_date = ?,
                file_identity_device = ?, file_identity_value = ?
            WHERE id = ?
            "#,
        )
        .bind(content_hash)
        .bind(size_bytes)
        .bind(file_modified_date)
        .bind(file_identity_device)
        .bind(file_identity_value)
        .bind(post_id)
        .execute(tx)
        .await?;
    }
    Ok(())
}

pub async fn update_post_identity(
    tx: &mut sqlx::SqliteConnection,
    post_id: i64,
    file_identity_device: &str,
    file_identity_value: &str,
) -> DbResult<()> {
    sqlx::query("UPDATE posts SET file_identity_device = ?, file_identity_value = ? WHERE id = ?")
        .bind(file_identity_device)
        .bind(file_identity_value)
        .bind(post_id)
        .execute(tx)
        .await?;
    Ok(())
}

pub async fn move_post(
    tx: &mut sqlx::SqliteConnection,
    post_id: i64,
    new_relative_path: &str,
    content_type: &str,
    size_bytes: i64,
    file_modified_date: DateTime<Utc>,
    content_hash: &str,
    file_identity_device: Option<&str>,
    file_identity_value: Option<&str>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE posts SET
            relative_path = ?, content_type = ?, size_bytes = ?, file_modified_date = ?,
            content_hash = ?, file_identity_device = ?, file_identity_value = ?
        WHERE id = ?
        "#,
    )
    .bind(new_relative_path)
    .bind(content_type)
    .bind(size_bytes)
    .bind(file_modified_date)
    .bind(content_hash)
    .bind(file_identity_device)
    .bind(file_identity_value)
    .bind(post_id)
    .execute(tx)
    .await?;
    Ok(())
}

pub async fn delete_posts_batch(pool: &SqlitePool, ids: &[i64]) -> DbResult<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!("DELETE FROM posts WHERE id IN ({placeholders})");
    let mut query = sqlx::query(&sql);
    for id in ids {
        query = query.bind(id);
    }
    let result = query.execute(pool).await?;
    Ok(result.rows_affected())
}

pub async fn delete_post(pool: &SqlitePool, id: i64) -> DbResult<()> {
    let result = sqlx::query("DELETE FROM posts WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound(format!("post {id}")));
    }
    Ok(())
}

pub async fn update_metadata(
    pool: &SqlitePool,
    post_id: i64,
    width: i64,
    height: i64,
    content_type: &str,
) -> DbResult<()> {
    sqlx::query("UPDATE posts SET width = ?, height = ?, content_type = ? WHERE id = ?")
        .bind(width)
        .bind(height)
        .bind(content_type)
        .bind(post_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn update_pdq_hash(pool: &SqlitePool, post_id: i64, pdq_hash_256: &str) -> DbResult<()> {
    sqlx::query("UPDATE posts SET pdq_hash_256 = ? WHERE id = ?")
        .bind(pdq_hash_256)
        .bind(post_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_posts_needing_metadata(pool: &SqlitePool, all: bool) -> DbResult<Vec<Post>> {
    let sql = if all {
        "SELECT * FROM posts ORDER BY id"
    } else {
        "SELECT * FROM posts WHERE width = 0 OR content_type = '' ORDER BY id"
    };
    Ok(sqlx::query_as::<_, Post>(sql).fetch_all(pool).await?)
}

pub async fn list_image_posts_needing_similarity(pool: &SqlitePool, all: bool) -> DbResult<Vec<Post>> {
    let sql = if all {
        "SELECT * FROM posts WHERE content_type LIKE 'image/%' ORDER BY id"
    } else {
        "SELECT * FROM posts WHERE content_type LIKE 'image/%' AND (pdq_hash_256 IS NULL OR pdq_hash_256 = '') ORDER BY id"
    };
    Ok(sqlx::query_as::<_, Post>(sql).fetch_all(pool).await?)
}

pub async fn list_all(pool: &SqlitePool) -> DbResult<Vec<Post>> {
    Ok(sqlx::query_as::<_, Post>("SELECT * FROM posts ORDER BY id")
        .fetch_all(pool)
        .await?)
}

pub async fn list_all_posts_for_thumbnails(pool: &SqlitePool) -> DbResult<Vec<Post>> {
    list_all(pool).await
}

/// All distinct `(content_hash)` for other posts in the same library with
/// non-folder tags, used by the tag-inheritance rule on new-post insert.
pub async fn find_tag_donor_post_ids(
    pool: &SqlitePool,
    library_id: i64,
    content_hash: &str,
    exclude_post_id: i64,
) -> DbResult<Vec<i64>> {
    Ok(sqlx::query_scalar::<_, i64>(
        r#"
        SELECT DISTINCT p.id FROM posts p
        JOIN post_tags pt ON pt.post_id = p.id
        WHERE p.library_id = ? AND p.content_hash = ? AND p.id != ? AND pt.source != 'folder'
        "#,
    )
    .bind(library_id)
    .bind(content_hash)
    .bind(exclude_post_id)
    .fetch_all(pool)
    .await?)
}

/// Minimal projection for the Find-Duplicates job: loading full `Post`
/// rows for a scan that only inspects three columns would be wasteful.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DuplicateScanPost {
    pub id: i64,
    pub content_hash: String,
    pub pdq_hash_256: Option<String>,
    pub content_type: String,
}

pub async fn list_for_duplicate_scan(pool: &SqlitePool) -> DbResult<Vec<DuplicateScanPost>> {
    Ok(sqlx::query_as::<_, DuplicateScanPost>(
        "SELECT id, content_hash, pdq_hash_256, content_type FROM posts ORDER BY id",
    )
    .fetch_all(pool)
    .await?)
}

/// Loads full rows for a set of ids, used by the resolver to compare quality
/// (`width * height`, size, mtime) across a duplicate group's members.
pub async fn get_posts_by_ids(pool: &SqlitePool, ids: &[i64]) -> DbResult<Vec<Post>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!("SELECT * FROM posts WHERE id IN ({placeholders})");
    let mut query = sqlx::query_as::<_, Post>(&sql);
    for id in ids {
        query = query.bind(id);
    }
    Ok(query.fetch_all(pool).await?)
}

pub async fn set_favorite(pool: &SqlitePool, post_id: i64, is_favorite: bool) -> DbResult<()> {
    sqlx::query("UPDATE posts SET is_favorite = ? WHERE id = ?")
        .bind(is_favorite)
        .bind(post_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::core::init_schema;
    use crate::db::libraries::create_library;

    async fn setup() -> (SqlitePool, i64) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        let lib = create_library(&pool, "L", "/lib", 24).await.unwrap();
        (pool, lib.id)
    }

    #[tokio::test]
    async fn insert_and_fetch_post() {
        let (pool, lib_id) = setup().await;
        let new_post = NewPost {
            library_id: lib_id,
            relative_path: "a/b.jpg",
            content_hash: "abc123",
            size_bytes: 1000,
            file_modified_date: Utc::now(),
            file_identity_device: None,
            file_identity_value: None,
            content_type: "",
        };
        let id = insert_post(&pool, &new_post).await.unwrap();
        let post = get_post(&pool, id).await.unwrap();
        assert_eq!(post.relative_path, "a/b.jpg");
        assert_eq!(post.width, 0);
    }

    #[tokio::test]
    async fn content_change_resets_derived_fields() {
        let (pool, lib_id) = setup().await;
        let new_post = NewPost {
            library_id: lib_id,
            relative_path: "a/b.jpg",
            content_hash: "abc123",
            size_bytes: 1000,
            file_modified_date: Utc::now(),
            file_identity_device: None,
            file_identity_value: None,
            content_type: "image/jpeg",
        };
        let id = insert_post(&pool, &new_post).await.unwrap();
        update_metadata(&pool, id, 640, 480, "image/jpeg").await.unwrap();
        update_pdq_hash(&pool, id, &"a".repeat(64)).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        update_post_content(&mut conn, id, "def456", 2000, Utc::now(), None, None, true)
            .await
            .unwrap();

        let post = get_post(&pool, id).await.unwrap();
        assert_eq!(post.content_hash, "def456");
        assert_eq!(post.width, 0);
        assert_eq!(post.height, 0);
        assert!(post.pdq_hash_256.is_none());
    }

    #[tokio::test]
    async fn needing_metadata_filters_correctly() {
        let (pool, lib_id) = setup().await;
        let new_post = NewPost {
            library_id: lib_id,
            relative_path: "a.jpg",
            content_hash: "h1",
            size_bytes: 1,
            file_modified_date: Utc::now(),
            file_identity_device: None,
            file_identity_value: None,
            content_type: "",
        };
        insert_post(&pool, &new_post).await.unwrap();
        let missing = list_posts_needing_metadata(&pool, false).await.unwrap();
        assert_eq!(missing.len(), 1);
    }
}
