//! Duplicate-group persistence: groups, their entries, and the read-side
//! joins the resolver and Find-Duplicates job need.

use super::core::{DbError, DbResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupType {
    Exact,
    Perceptual,
}

impl fmt::Display for GroupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GroupType::Exact => "exact",
            GroupType::Perceptual => "perceptual",
        })
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DuplicateGroup {
    pub id: i64,
    pub group_type: String,
    pub similarity_percent: Option<i64>,
    pub is_resolved: bool,
    pub detected_date: DateTime<Utc>,
}

pub async fn delete_all_unresolved(pool: &SqlitePool) -> DbResult<()> {
    sqlx::query("DELETE FROM duplicate_groups WHERE is_resolved = 0")
        .execute(pool)
        .await?;
    Ok(())
}

/// Sorted-id signatures of every resolved group's membership, used to avoid
/// re-suggesting a grouping the user already dismissed.
pub async fn resolved_signatures(pool: &SqlitePool) -> DbResult<Vec<Vec<i64>>> {
    let groups = sqlx::query_as::<_, (i64,)>("SELECT id FROM duplicate_groups WHERE is_resolved = 1")
        .fetch_all(pool)
        .await?;

    let mut signatures = Vec::with_capacity(groups.len());
    for (group_id,) in groups {
        let mut member_ids = sqlx::query_scalar::<_, i64>(
            "SELECT post_id FROM duplicate_group_entries WHERE group_id = ?",
        )
        .bind(group_id)
        .fetch_all(pool)
        .await?;
        member_ids.sort_unstable();
        signatures.push(member_ids);
    }
    Ok(signatures)
}

pub async fn create_group(
    pool: &SqlitePool,
    group_type: GroupType,
    similarity_percent: Option<i64>,
    member_post_ids: &[i64],
) -> DbResult<i64> {
    let mut tx = pool.begin().await?;

    let group_id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO duplicate_groups (group_type, similarity_percent) VALUES (?, ?) RETURNING id",
    )
    .bind(group_type.to_string())
    .bind(similarity_percent)
    .fetch_one(&mut *tx)
    .await?;

    for post_id in member_post_ids {
        sqlx::query("INSERT INTO duplicate_group_entries (group_id, post_id) VALUES (?, ?)")
            .bind(group_id)
            .bind(post_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(group_id)
}

pub async fn get_group(pool: &SqlitePool, id: i64) -> DbResult<DuplicateGroup> {
    sqlx::query_as::<_, DuplicateGroup>("SELECT * FROM duplicate_groups WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("duplicate group {id}")))
}

pub async fn list_unresolved(pool: &SqlitePool) -> DbResult<Vec<DuplicateGroup>> {
    Ok(sqlx::query_as::<_, DuplicateGroup>(
        "SELECT * FROM duplicate_groups WHERE is_resolved = 0 ORDER BY id",
    )
    .fetch_all(pool)
    .await?)
}

pub async fn group_entry_post_ids(pool: &SqlitePool, group_id: i64) -> DbResult<Vec<i64>> {
    Ok(sqlx::query_scalar::<_, i64>(
        "SELECT post_id FROM duplicate_group_entries WHERE group_id = ?",
    )
    .bind(group_id)
    .fetch_all(pool)
    .await?)
}

pub async fn remove_entry(pool: &SqlitePool, group_id: i64, post_id: i64) -> DbResult<()> {
    sqlx::query("DELETE FROM duplicate_group_entries WHERE group_id = ? AND post_id = ?")
        .bind(group_id)
        .bind(post_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_group(pool: &SqlitePool, group_id: i64) -> DbResult<()> {
    sqlx::query("DELETE FROM duplicate_groups WHERE id = ?")
        .bind(group_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Deletes every unresolved group whose entry count has dropped below 2 —
/// the reconciliation step that follows any resolver mutation. Covers
/// groups left with 1 entry as well as ones cascaded down to 0 (e.g. a
/// library sync's orphan removal deleting every remaining member via
/// `ON DELETE CASCADE`), since `GROUP BY ... HAVING COUNT(*) < 2` alone
/// cannot see a group with no `duplicate_group_entries` rows at all.
pub async fn reconcile_undersized_groups(pool: &SqlitePool) -> DbResult<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM duplicate_groups
        WHERE is_resolved = 0
        AND (
            id IN (
                SELECT group_id FROM duplicate_group_entries
                GROUP BY group_id HAVING COUNT(*) < 2
            )
            OR id NOT IN (SELECT group_id FROM duplicate_group_entries)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn set_resolved(pool: &SqlitePool, group_id: i64, resolved: bool) -> DbResult<()> {
    let result = sqlx::query("UPDATE duplicate_groups SET is_resolved = ? WHERE id = ?")
        .bind(resolved)
        .bind(group_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound(format!("duplicate group {group_id}")));
    }
    Ok(())
}

pub async fn mark_all_unresolved(pool: &SqlitePool) -> DbResult<u64> {
    let result = sqlx::query("UPDATE duplicate_groups SET is_resolved = 0 WHERE is_resolved = 1")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::core::init_schema;
    use crate::db::libraries::create_library;
    use crate::db::posts::{insert_post, NewPost};
    use chrono::Utc;

    async fn setup_two_posts() -> (SqlitePool, i64, i64) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        let lib = create_library(&pool, "L", "/lib", 24).await.unwrap();
        let mk = |rel: &'static str| NewPost {
            library_id: lib.id,
            relative_path: rel,
            content_hash: "h",
            size_bytes: 1,
            file_modified_date: Utc::now(),
            file_identity_device: None,
            file_identity_value: None,
            content_type: "",
        };
        let a = insert_post(&pool, &mk("a.jpg")).await.unwrap();
        let b = insert_post(&pool, &mk("b.jpg")).await.unwrap();
        (pool, a, b)
    }

    #[tokio::test]
    async fn reconcile_drops_undersized_groups() {
        let (pool, a, b) = setup_two_posts().await;
        let group_id = create_group(&pool, GroupType::Exact, None, &[a, b]).await.unwrap();

        remove_entry(&pool, group_id, b).await.unwrap();
        let dropped = reconcile_undersized_groups(&pool).await.unwrap();
        assert_eq!(dropped, 1);

        assert!(get_group(&pool, group_id).await.is_err());
    }

    #[tokio::test]
    async fn reconcile_drops_groups_cascaded_to_zero_entries() {
        let (pool, a, b) = setup_two_posts().await;
        let group_id = create_group(&pool, GroupType::Exact, None, &[a, b]).await.unwrap();

        // Simulate both members disappearing at once, e.g. via the
        // `ON DELETE CASCADE` on `duplicate_group_entries.post_id` when a
        // library sync removes orphaned posts, rather than one at a time
        // through the resolver.
        crate::db::posts::delete_posts_batch(&pool, &[a, b]).await.unwrap();

        let dropped = reconcile_undersized_groups(&pool).await.unwrap();
        assert_eq!(dropped, 1);
        assert!(get_group(&pool, group_id).await.is_err());
    }

    #[tokio::test]
    async fn mark_all_unresolved_flips_every_resolved_group() {
        let (pool, a, b) = setup_two_posts().await;
        let group_id = create_group(&pool, GroupType::Exact, None, &[a, b]).await.unwrap();
        set_resolved(&pool, group_id, true).await.unwrap();

        let flipped = mark_all_unresolved(&pool).await.unwrap();
        assert_eq!(flipped, 1);

        let group = get_group(&pool, group_id).await.unwrap();
        assert!(!group.is_resolved);
    }
}
