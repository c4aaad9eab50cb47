//! Tag, tag-category, and post-tag-association persistence.

use super::core::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagSource {
    Manual,
    Folder,
    Ai,
}

impl fmt::Display for TagSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TagSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagSource::Manual => "manual",
            TagSource::Folder => "folder",
            TagSource::Ai => "ai",
        }
    }

    pub fn parse(s: &str) -> DbResult<Self> {
        match s {
            "manual" => Ok(TagSource::Manual),
            "folder" => Ok(TagSource::Folder),
            "ai" => Ok(TagSource::Ai),
            other => Err(DbError::InvalidInput(format!("unknown tag source {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub tag_category_id: Option<i64>,
    pub post_count: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PostTagRow {
    pub post_id: i64,
    pub tag_id: i64,
    pub tag_name: String,
    pub source: String,
}

pub async fn get_or_create_tag(pool: &SqlitePool, name: &str) -> DbResult<Tag> {
    if name.is_empty() {
        return Err(DbError::InvalidInput("tag name must not be empty".into()));
    }
    if let Some(tag) = sqlx::query_as::<_, Tag>("SELECT * FROM tags WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?
    {
        return Ok(tag);
    }
    let id = sqlx::query_scalar::<_, i64>("INSERT INTO tags (name) VALUES (?) RETURNING id")
        .bind(name)
        .fetch_one(pool)
        .await?;
    sqlx::query_as::<_, Tag>("SELECT * FROM tags WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(DbError::from)
}

pub async fn get_tag(pool: &SqlitePool, id: i64) -> DbResult<Tag> {
    sqlx::query_as::<_, Tag>("SELECT * FROM tags WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("tag {id}")))
}

pub async fn list_tags(pool: &SqlitePool) -> DbResult<Vec<Tag>> {
    Ok(sqlx::query_as::<_, Tag>("SELECT * FROM tags ORDER BY name")
        .fetch_all(pool)
        .await?)
}

pub async fn add_post_tag(pool: &SqlitePool, post_id: i64, tag_id: i64, source: TagSource) -> DbResult<()> {
    sqlx::query("INSERT OR IGNORE INTO post_tags (post_id, tag_id, source) VALUES (?, ?, ?)")
        .bind(post_id)
        .bind(tag_id)
        .bind(source.as_str())
        .execute(pool)
        .await?;
    recompute_post_count(pool, tag_id).await
}

pub async fn remove_post_tag(pool: &SqlitePool, post_id: i64, tag_id: i64, source: TagSource) -> DbResult<()> {
    sqlx::query("DELETE FROM post_tags WHERE post_id = ? AND tag_id = ? AND source = ?")
        .bind(post_id)
        .bind(tag_id)
        .bind(source.as_str())
        .execute(pool)
        .await?;
    recompute_post_count(pool, tag_id).await
}

/// Recomputes a tag's denormalized `post_count`. Exposed publicly for
/// callers (the resolver) that delete posts directly via SQL and must
/// reconcile the tags those posts carried, since the FK cascade removes the
/// `post_tags` rows without touching the counter column.
pub async fn recompute_post_count(pool: &SqlitePool, tag_id: i64) -> DbResult<()> {
    sqlx::query(
        r#"UPDATE tags SET post_count = (
            SELECT COUNT(DISTINCT post_id) FROM post_tags WHERE tag_id = ?
        ) WHERE id = ?"#,
    )
    .bind(tag_id)
    .bind(tag_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_post_tags(pool: &SqlitePool, post_id: i64) -> DbResult<Vec<PostTagRow>> {
    Ok(sqlx::query_as::<_, PostTagRow>(
        r#"
        SELECT pt.post_id, pt.tag_id, t.name AS tag_name, pt.source
        FROM post_tags pt JOIN tags t ON t.id = pt.tag_id
        WHERE pt.post_id = ?
        "#,
    )
    .bind(post_id)
    .fetch_all(pool)
    .await?)
}

pub async fn list_post_folder_tags(pool: &SqlitePool, post_id: i64) -> DbResult<Vec<PostTagRow>> {
    Ok(sqlx::query_as::<_, PostTagRow>(
        r#"
        SELECT pt.post_id, pt.tag_id, t.name AS tag_name, pt.source
        FROM post_tags pt JOIN tags t ON t.id = pt.tag_id
        WHERE pt.post_id = ? AND pt.source = 'folder'
        "#,
    )
    .bind(post_id)
    .fetch_all(pool)
    .await?)
}

/// Copies every non-folder `(tag_id, source)` assignment from `donor_post_id`
/// onto `target_post_id`, skipping ones already present (used by the
/// tag-inheritance rule in the library synchronizer).
pub async fn copy_non_folder_tags(pool: &SqlitePool, donor_post_id: i64, target_post_id: i64) -> DbResult<()> {
    let donor_tags = sqlx::query_as::<_, PostTagRow>(
        r#"
        SELECT pt.post_id, pt.tag_id, t.name AS tag_name, pt.source
        FROM post_tags pt JOIN tags t ON t.id = pt.tag_id
        WHERE pt.post_id = ? AND pt.source != 'folder'
        "#,
    )
    .bind(donor_post_id)
    .fetch_all(pool)
    .await?;

    for row in donor_tags {
        let source = TagSource::parse(&row.source)?;
        add_post_tag(pool, target_post_id, row.tag_id, source).await?;
    }
    Ok(())
}

/// Copies every `(tag_id, source)` assignment from `donor_post_id` onto
/// `target_post_id`, skipping ones already present — the tag half of the
/// duplicate resolver's keep-one merge, which unlike the sync
/// tag-inheritance rule does not exclude Folder-sourced assignments. Takes
/// the resolver's open transaction directly so the copy shares a commit
/// zone with the loser's row deletion instead of running on a separate
/// auto-committing connection.
pub async fn copy_all_post_tags_tx(
    tx: &mut sqlx::SqliteConnection,
    donor_post_id: i64,
    target_post_id: i64,
) -> DbResult<()> {
    let donor_tags = sqlx::query_as::<_, PostTagRow>(
        r#"
        SELECT pt.post_id, pt.tag_id, t.name AS tag_name, pt.source
        FROM post_tags pt JOIN tags t ON t.id = pt.tag_id
        WHERE pt.post_id = ?
        "#,
    )
    .bind(donor_post_id)
    .fetch_all(&mut *tx)
    .await?;

    for row in donor_tags {
        sqlx::query("INSERT OR IGNORE INTO post_tags (post_id, tag_id, source) VALUES (?, ?, ?)")
            .bind(target_post_id)
            .bind(row.tag_id)
            .bind(&row.source)
            .execute(&mut *tx)
            .await?;
    }
    Ok(())
}

/// Renames a tag, failing with `Conflict`-shaped `InvalidInput` semantics
/// reserved for the resolution policy of sanitize-tag-names (handled by the
/// caller, which decides rename vs. merge).
pub async fn rename_tag(pool: &SqlitePool, tag_id: i64, new_name: &str) -> DbResult<()> {
    sqlx::query("UPDATE tags SET name = ? WHERE id = ?")
        .bind(new_name)
        .bind(tag_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_tag_category(pool: &SqlitePool, tag_id: i64, category_id: Option<i64>) -> DbResult<()> {
    sqlx::query("UPDATE tags SET tag_category_id = ? WHERE id = ?")
        .bind(category_id)
        .bind(tag_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Reassigns every `post_tags` row from `victim_tag_id` to `survivor_tag_id`,
/// deduping by `(post_id, tag_id, source)`, adopts the victim's category if
/// the survivor has none, then deletes the victim.
pub async fn merge_tag_into(pool: &SqlitePool, survivor_tag_id: i64, victim_tag_id: i64) -> DbResult<()> {
    let mut tx = pool.begin().await?;

    let victim_rows = sqlx::query_as::<_, (i64, String)>(
        "SELECT post_id, source FROM post_tags WHERE tag_id = ?",
    )
    .bind(victim_tag_id)
    .fetch_all(&mut *tx)
    .await?;

    for (post_id, source) in victim_rows {
        sqlx::query("INSERT OR IGNORE INTO post_tags (post_id, tag_id, source) VALUES (?, ?, ?)")
            .bind(post_id)
            .bind(survivor_tag_id)
            .bind(&source)
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query("DELETE FROM post_tags WHERE tag_id = ?")
        .bind(victim_tag_id)
        .execute(&mut *tx)
        .await?;

    let victim_category: Option<i64> = sqlx::query_scalar("SELECT tag_category_id FROM tags WHERE id = ?")
        .bind(victim_tag_id)
        .fetch_one(&mut *tx)
        .await?;
    if victim_category.is_some() {
        sqlx::query(
            "UPDATE tags SET tag_category_id = ? WHERE id = ? AND tag_category_id IS NULL",
        )
        .bind(victim_category)
        .bind(survivor_tag_id)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("DELETE FROM tags WHERE id = ?")
        .bind(victim_tag_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    recompute_post_count(pool, survivor_tag_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::core::init_schema;
    use crate::db::libraries::create_library;
    use crate::db::posts::{insert_post, NewPost};
    use chrono::Utc;

    async fn setup_post() -> (SqlitePool, i64) {
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
        (pool, post_id)
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        let a = get_or_create_tag(&pool, "cat").await.unwrap();
        let b = get_or_create_tag(&pool, "cat").await.unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn post_count_tracks_assignments() {
        let (pool, post_id) = setup_post().await;
        let tag = get_or_create_tag(&pool, "cat").await.unwrap();
        add_post_tag(&pool, post_id, tag.id, TagSource::Manual).await.unwrap();
        let refreshed = get_tag(&pool, tag.id).await.unwrap();
        assert_eq!(refreshed.post_count, 1);

        remove_post_tag(&pool, post_id, tag.id, TagSource::Manual).await.unwrap();
        let refreshed = get_tag(&pool, tag.id).await.unwrap();
        assert_eq!(refreshed.post_count, 0);
    }

    #[tokio::test]
    async fn merge_tag_dedupes_assignments() {
        let (pool, post_id) = setup_post().await;
        let survivor = get_or_create_tag(&pool, "cat").await.unwrap();
        let victim = get_or_create_tag(&pool, "cats").await.unwrap();
        add_post_tag(&pool, post_id, survivor.id, TagSource::Manual).await.unwrap();
        add_post_tag(&pool, post_id, victim.id, TagSource::Manual).await.unwrap();

        merge_tag_into(&pool, survivor.id, victim.id).await.unwrap();

        let tags = list_post_tags(&pool, post_id).await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].tag_id, survivor.id);
    }

    #[tokio::test]
    async fn merge_tag_adopts_victim_category_when_survivor_has_none() {
        let (pool, post_id) = setup_post().await;
        let survivor = get_or_create_tag(&pool, "cat").await.unwrap();
        let victim = get_or_create_tag(&pool, "cats").await.unwrap();
        add_post_tag(&pool, post_id, victim.id, TagSource::Manual).await.unwrap();

        sqlx::query("INSERT INTO tag_categories (name) VALUES ('animals')")
            .execute(&pool)
            .await
            .unwrap();
        set_tag_category(&pool, victim.id, Some(1)).await.unwrap();

        merge_tag_into(&pool, survivor.id, victim.id).await.unwrap();

        let refreshed = get_tag(&pool, survivor.id).await.unwrap();
        assert_eq!(refreshed.tag_category_id, Some(1));
    }
}
