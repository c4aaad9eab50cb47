//! Duplicate resolution: the mutating operations a user (or a bulk sweep)
//! applies to an unresolved duplicate group once Find Duplicates has
//! proposed it.
//!
//! Every mutation that removes posts runs inside one transaction — the
//! "commit zone" — then, once committed, reconciles the denormalized tag
//! `post_count` for any tags the deleted posts carried and drops any other
//! group that a cascaded removal left with fewer than two members.

use crate::db::core::DbError;
use crate::db::duplicates::{self, DuplicateGroup, GroupType};
use crate::db::posts::{self, Post};
use crate::db::{sources, tags};
use crate::error::{AppError, AppResult};
use crate::fs::resolve_safe_subpath;
use crate::jobs::LibraryRoots;
use sqlx::SqlitePool;
use std::collections::HashSet;

async fn group_members(pool: &SqlitePool, group_id: i64) -> AppResult<Vec<Post>> {
    let ids = duplicates::group_entry_post_ids(pool, group_id).await.map_err(AppError::from)?;
    Ok(posts::get_posts_by_ids(pool, &ids).await.map_err(AppError::from)?)
}

/// Quality ordering: larger pixel area wins, then larger file size, then
/// the more recently modified file, then the higher id.
fn quality_key(post: &Post) -> (i64, i64, chrono::DateTime<chrono::Utc>, i64) {
    (post.width * post.height, post.size_bytes, post.file_modified_date, post.id)
}

fn pick_best(members: &[Post]) -> AppResult<i64> {
    members
        .iter()
        .max_by_key(|p| quality_key(p))
        .map(|p| p.id)
        .ok_or_else(|| AppError::InvalidInput("duplicate group has no members".into()))
}

/// Merges a loser's tags and sources onto the survivor, then deletes the
/// loser's row and records an exclusion so it is never re-ingested or
/// re-proposed. Returns the loser's tag ids for post_count reconciliation
/// once the transaction commits. Every step runs against `tx` so the merge
/// is either fully applied or fully rolled back.
async fn merge_and_stage_delete(
    tx: &mut sqlx::SqliteConnection,
    touched_tags: &mut HashSet<i64>,
    survivor_id: i64,
    loser: &Post,
) -> AppResult<()> {
    tags::copy_all_post_tags_tx(&mut *tx, loser.id, survivor_id).await.map_err(AppError::from)?;
    for source in sources::list_post_sources_tx(&mut *tx, loser.id).await.map_err(AppError::from)? {
        sources::append_source_if_absent_tx(&mut *tx, survivor_id, &source.url).await.map_err(AppError::from)?;
    }

    crate::db::exclusions::record_exclusion_if_absent_tx(
        &mut *tx,
        loser.library_id,
        &loser.relative_path,
        &loser.content_hash,
        Some("merged into duplicate group survivor"),
    )
    .await
    .map_err(AppError::from)?;

    let tag_rows = sqlx::query_scalar::<_, i64>("SELECT tag_id FROM post_tags WHERE post_id = ?")
        .bind(loser.id)
        .fetch_all(&mut *tx)
        .await
        .map_err(DbError::from)?;
    touched_tags.extend(tag_rows);

    sqlx::query("DELETE FROM posts WHERE id = ?")
        .bind(loser.id)
        .execute(tx)
        .await
        .map_err(DbError::from)?;
    Ok(())
}

/// Deletes a post's row without merging tags/sources onto anything —
/// used by the exclude/delete paths, which drop the post outright rather
/// than folding it into a survivor.
async fn delete_post_collecting_tags(
    tx: &mut sqlx::SqliteConnection,
    touched_tags: &mut HashSet<i64>,
    post_id: i64,
) -> Result<(), DbError> {
    let tag_rows = sqlx::query_scalar::<_, i64>("SELECT tag_id FROM post_tags WHERE post_id = ?")
        .bind(post_id)
        .fetch_all(&mut *tx)
        .await?;
    touched_tags.extend(tag_rows);

    sqlx::query("DELETE FROM posts WHERE id = ?").bind(post_id).execute(tx).await?;
    Ok(())
}

async fn finish(pool: &SqlitePool, touched_tags: HashSet<i64>) -> AppResult<()> {
    for tag_id in touched_tags {
        tags::recompute_post_count(pool, tag_id).await.map_err(AppError::from)?;
    }
    duplicates::reconcile_undersized_groups(pool).await.map_err(AppError::from)?;
    Ok(())
}

/// Keeps `keep_post_id`, merging every other member's tags and sources onto
/// it, removing the others from the index (not from disk), and deleting the
/// group row — all in one transaction.
pub async fn keep_one(pool: &SqlitePool, group_id: i64, keep_post_id: i64) -> AppResult<()> {
    let members = group_members(pool, group_id).await?;
    if !members.iter().any(|p| p.id == keep_post_id) {
        return Err(AppError::InvalidInput(format!(
            "post {keep_post_id} is not a member of group {group_id}"
        )));
    }

    let mut touched_tags = HashSet::new();
    let losers: Vec<&Post> = members.iter().filter(|p| p.id != keep_post_id).collect();

    let mut tx = pool.begin().await.map_err(DbError::from)?;
    for loser in &losers {
        merge_and_stage_delete(&mut tx, &mut touched_tags, keep_post_id, loser).await?;
    }
    sqlx::query("DELETE FROM duplicate_groups WHERE id = ?")
        .bind(group_id)
        .execute(&mut *tx)
        .await
        .map_err(DbError::from)?;
    tx.commit().await.map_err(DbError::from)?;

    finish(pool, touched_tags).await
}

/// Picks the best-quality member of `members` and applies keep-one (merge +
/// index-only removal) to the rest — the per-group step behind
/// [`resolve_all_exact`] and [`resolve_all`].
async fn quality_keep_one(pool: &SqlitePool, group_id: i64, members: &[Post]) -> AppResult<()> {
    let keep_id = pick_best(members)?;
    keep_one(pool, group_id, keep_id).await
}

/// Removes one post from the group, the index, and the tag counts that
/// referenced it, and records it as excluded so future Find-Duplicates runs
/// never re-propose it. The file on disk is left untouched.
pub async fn exclude_one(pool: &SqlitePool, group_id: i64, post_id: i64) -> AppResult<()> {
    let members = duplicates::group_entry_post_ids(pool, group_id).await.map_err(AppError::from)?;
    if members.len() < 2 {
        return Err(AppError::InvalidInput(format!(
            "duplicate group {group_id} does not have at least 2 entries"
        )));
    }
    let post = posts::get_post(pool, post_id).await.map_err(AppError::from)?;

    let mut touched_tags = HashSet::new();
    let mut tx = pool.begin().await.map_err(DbError::from)?;
    delete_post_collecting_tags(&mut tx, &mut touched_tags, post_id).await.map_err(AppError::from)?;
    tx.commit().await.map_err(DbError::from)?;

    crate::db::exclusions::record_exclusion_if_absent(
        pool,
        post.library_id,
        &post.relative_path,
        &post.content_hash,
        Some("excluded from duplicate group"),
    )
    .await
    .map_err(AppError::from)?;

    finish(pool, touched_tags).await
}

/// Removes one post from the group, the index, and disk. Requires at least
/// one other member of the same group to live in the same library+folder —
/// a cross-folder delete is rejected as `InvalidInput` without touching
/// anything.
pub async fn delete_one_with_file(pool: &SqlitePool, group_id: i64, post_id: i64, roots: &LibraryRoots) -> AppResult<()> {
    let members = group_members(pool, group_id).await?;
    let Some(post) = members.iter().find(|p| p.id == post_id) else {
        return Err(AppError::InvalidInput(format!(
            "post {post_id} is not a member of group {group_id}"
        )));
    };

    let folder = |p: &Post| (p.library_id, std::path::Path::new(&p.relative_path).parent().map(|d| d.to_path_buf()));
    let has_same_folder_peer = members
        .iter()
        .any(|p| p.id != post_id && folder(p) == folder(post));
    if !has_same_folder_peer {
        return Err(AppError::InvalidInput(format!(
            "post {post_id} has no peer in the same folder within group {group_id}"
        )));
    }

    let root = roots
        .root(post.library_id)
        .ok_or_else(|| AppError::InvalidInput(format!("library {} has no known root", post.library_id)))?;
    let full_path = resolve_safe_subpath(root, &post.relative_path)?;

    // Delete the file first. An IO failure aborts here, before any DB
    // transaction opens, so a failed delete never leaves a committed-gone
    // post pointing at a file that is still on disk.
    if full_path.exists() {
        std::fs::remove_file(&full_path)?;
    }

    let mut touched_tags = HashSet::new();
    let mut tx = pool.begin().await.map_err(DbError::from)?;
    delete_post_collecting_tags(&mut tx, &mut touched_tags, post_id).await.map_err(AppError::from)?;
    tx.commit().await.map_err(DbError::from)?;

    crate::db::exclusions::record_exclusion_if_absent(
        pool,
        post.library_id,
        &post.relative_path,
        &post.content_hash,
        Some("deleted from duplicate group"),
    )
    .await
    .map_err(AppError::from)?;

    finish(pool, touched_tags).await
}

/// Partitions `members` by `(library_id, parent_folder)`; each partition of
/// size >= 2 is a "same-folder group".
fn same_folder_partitions(members: &[Post]) -> Vec<Vec<Post>> {
    use std::collections::HashMap;
    let mut by_folder: HashMap<(i64, Option<std::path::PathBuf>), Vec<Post>> = HashMap::new();
    for post in members {
        let key = (post.library_id, std::path::Path::new(&post.relative_path).parent().map(|d| d.to_path_buf()));
        by_folder.entry(key).or_default().push(post.clone());
    }
    by_folder.into_values().filter(|v| v.len() >= 2).collect()
}

/// Resolves one same-folder partition: the best-quality member survives,
/// every other member in the partition is deleted from disk (no tag/source
/// merge), then the group is reconciled.
async fn resolve_partition_with_files(pool: &SqlitePool, group_id: i64, partition: &[Post], roots: &LibraryRoots) -> AppResult<()> {
    let keep_id = pick_best(partition)?;
    let losers: Vec<&Post> = partition.iter().filter(|p| p.id != keep_id).collect();

    // Delete every loser's file first. An IO failure aborts the whole
    // sweep — none of these posts are removed from the DB — rather than
    // being swallowed, which would leave a dangling index entry.
    for post in &losers {
        let root = roots
            .root(post.library_id)
            .ok_or_else(|| AppError::InvalidInput(format!("library {} has no known root", post.library_id)))?;
        let full_path = resolve_safe_subpath(root, &post.relative_path)?;
        if full_path.exists() {
            std::fs::remove_file(&full_path)?;
        }
    }

    let mut touched_tags = HashSet::new();
    let mut tx = pool.begin().await.map_err(DbError::from)?;
    for post in &losers {
        delete_post_collecting_tags(&mut tx, &mut touched_tags, post.id).await.map_err(AppError::from)?;
    }
    tx.commit().await.map_err(DbError::from)?;

    for post in &losers {
        crate::db::exclusions::record_exclusion_if_absent(
            pool,
            post.library_id,
            &post.relative_path,
            &post.content_hash,
            Some("deleted from duplicate group (same-folder sweep)"),
        )
        .await
        .map_err(AppError::from)?;
    }

    let _ = group_id;
    finish(pool, touched_tags).await
}

/// Resolves a group whose members all share one `(library, parentFolder)`
/// directly. Rejects groups spanning more than one folder — callers wanting
/// per-folder handling of a mixed group should use
/// [`resolve_all_same_folder`], which partitions first.
pub async fn resolve_same_folder_group(pool: &SqlitePool, group_id: i64, roots: &LibraryRoots) -> AppResult<()> {
    let members = group_members(pool, group_id).await?;
    if members.is_empty() {
        return Err(AppError::NotFound(format!("duplicate group {group_id} has no members")));
    }

    let partitions = same_folder_partitions(&members);
    if partitions.len() != 1 || partitions[0].len() != members.len() {
        return Err(AppError::InvalidInput(format!(
            "duplicate group {group_id} is not a single same-folder partition"
        )));
    }

    resolve_partition_with_files(pool, group_id, &members, roots).await
}

/// Keeps every member, marking the group resolved without touching any post
/// — the "not actually duplicates" override.
pub async fn keep_all(pool: &SqlitePool, group_id: i64) -> AppResult<()> {
    duplicates::set_resolved(pool, group_id, true).await.map_err(AppError::from)
}

pub async fn mark_unresolved(pool: &SqlitePool, group_id: i64) -> AppResult<()> {
    duplicates::set_resolved(pool, group_id, false).await.map_err(AppError::from)
}

pub async fn mark_all_unresolved(pool: &SqlitePool) -> AppResult<u64> {
    duplicates::mark_all_unresolved(pool).await.map_err(AppError::from)
}

/// Bulk-resolves every unresolved Exact group: best-quality member survives,
/// everyone else is merged into it and dropped from the index — never
/// touches disk, since exact duplicates are kept as a single richer record
/// rather than reclaimed as wasted space.
pub async fn resolve_all_exact(pool: &SqlitePool) -> AppResult<usize> {
    resolve_all_of_type(pool, Some(GroupType::Exact)).await
}

/// Same as [`resolve_all_exact`] but for every unresolved group regardless
/// of type.
pub async fn resolve_all(pool: &SqlitePool) -> AppResult<usize> {
    resolve_all_of_type(pool, None).await
}

async fn resolve_all_of_type(pool: &SqlitePool, only: Option<GroupType>) -> AppResult<usize> {
    let unresolved: Vec<DuplicateGroup> = duplicates::list_unresolved(pool)
        .await
        .map_err(AppError::from)?
        .into_iter()
        .filter(|g| only.map(|t| g.group_type == t.to_string()).unwrap_or(true))
        .collect();

    let mut resolved = 0;
    for group in unresolved {
        let members = group_members(pool, group.id).await?;
        if members.len() < 2 {
            continue;
        }
        quality_keep_one(pool, group.id, &members).await?;
        resolved += 1;
    }
    Ok(resolved)
}

/// Bulk-resolves every same-folder partition across unresolved groups
/// (optionally restricted to Exact groups), deleting losers with their
/// files. A group spanning several folders contributes one resolution per
/// qualifying partition rather than being skipped outright.
pub async fn resolve_all_same_folder(pool: &SqlitePool, roots: &LibraryRoots, exact_only: bool) -> AppResult<usize> {
    let unresolved: Vec<DuplicateGroup> = duplicates::list_unresolved(pool)
        .await
        .map_err(AppError::from)?
        .into_iter()
        .filter(|g| !exact_only || g.group_type == GroupType::Exact.to_string())
        .collect();

    let mut resolved = 0;
    for group in unresolved {
        let members = group_members(pool, group.id).await?;
        for partition in same_folder_partitions(&members) {
            resolve_partition_with_files(pool, group.id, &partition, roots).await?;
            resolved += 1;
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::core::init_schema;
    use crate::db::libraries::create_library;
    use crate::db::posts::{insert_post, NewPost};
    use crate::db::tags::{add_post_tag, get_or_create_tag, list_post_tags, TagSource};
    use chrono::Utc;

    async fn setup_group(paths: &[&'static str]) -> (SqlitePool, i64, i64, Vec<i64>) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        let lib = create_library(&pool, "L", "/lib", 24).await.unwrap();

        let mut ids = Vec::new();
        for path in paths {
            let id = insert_post(
                &pool,
                &NewPost {
                    library_id: lib.id,
                    relative_path: path,
                    content_hash: "h",
                    size_bytes: 10,
                    file_modified_date: Utc::now(),
                    file_identity_device: None,
                    file_identity_value: None,
                    content_type: "image/jpeg",
                },
            )
            .await
            .unwrap();
            ids.push(id);
        }
        let group_id = duplicates::create_group(&pool, GroupType::Exact, None, &ids).await.unwrap();
        (pool, lib.id, group_id, ids)
    }

    #[tokio::test]
    async fn keep_one_drops_the_rest_and_deletes_the_group() {
        let (pool, _lib_id, group_id, ids) = setup_group(&["a.jpg", "b.jpg"]).await;

        keep_one(&pool, group_id, ids[0]).await.unwrap();

        assert!(posts::get_post(&pool, ids[0]).await.is_ok());
        assert!(posts::get_post(&pool, ids[1]).await.is_err());
        assert!(duplicates::get_group(&pool, group_id).await.is_err());
    }

    #[tokio::test]
    async fn keep_one_merges_loser_tags_and_sources() {
        let (pool, _lib_id, group_id, ids) = setup_group(&["a.jpg", "b.jpg"]).await;
        let tag = get_or_create_tag(&pool, "nice").await.unwrap();
        add_post_tag(&pool, ids[1], tag.id, TagSource::Manual).await.unwrap();
        sources::append_source_if_absent(&pool, ids[1], "https://example.com/x").await.unwrap();

        keep_one(&pool, group_id, ids[0]).await.unwrap();

        let kept_tags = list_post_tags(&pool, ids[0]).await.unwrap();
        assert_eq!(kept_tags.len(), 1);
        assert_eq!(kept_tags[0].tag_id, tag.id);
        let kept_sources = sources::list_post_sources(&pool, ids[0]).await.unwrap();
        assert_eq!(kept_sources.len(), 1);

        let excluded = crate::db::exclusions::list_all(&pool).await.unwrap();
        assert_eq!(excluded.len(), 1);
    }

    #[tokio::test]
    async fn keep_one_rejects_non_member() {
        let (pool, _lib_id, group_id, _ids) = setup_group(&["a.jpg", "b.jpg"]).await;
        let err = keep_one(&pool, group_id, 9999).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn exclude_one_deletes_the_post_and_records_exclusion() {
        let (pool, _lib_id, group_id, ids) = setup_group(&["a.jpg", "b.jpg"]).await;

        exclude_one(&pool, group_id, ids[0]).await.unwrap();

        assert!(posts::get_post(&pool, ids[0]).await.is_err());
        let remaining = duplicates::group_entry_post_ids(&pool, group_id).await.unwrap();
        assert!(!remaining.contains(&ids[0]));

        let excluded = crate::db::exclusions::list_all(&pool).await.unwrap();
        assert_eq!(excluded.len(), 1);
    }

    #[tokio::test]
    async fn keep_all_resolves_without_touching_posts() {
        let (pool, _lib_id, group_id, ids) = setup_group(&["a.jpg", "b.jpg"]).await;
        keep_all(&pool, group_id).await.unwrap();

        assert!(posts::get_post(&pool, ids[0]).await.is_ok());
        assert!(posts::get_post(&pool, ids[1]).await.is_ok());
        let group = duplicates::get_group(&pool, group_id).await.unwrap();
        assert!(group.is_resolved);
    }

    #[tokio::test]
    async fn mark_unresolved_roundtrips() {
        let (pool, _lib_id, group_id, _ids) = setup_group(&["a.jpg", "b.jpg"]).await;
        keep_all(&pool, group_id).await.unwrap();
        mark_unresolved(&pool, group_id).await.unwrap();
        let group = duplicates::get_group(&pool, group_id).await.unwrap();
        assert!(!group.is_resolved);
    }

    #[tokio::test]
    async fn resolve_all_picks_best_quality_member() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        let lib = create_library(&pool, "L", "/lib", 24).await.unwrap();

        let mk = |rel: &'static str| NewPost {
            library_id: lib.id,
            relative_path: rel,
            content_hash: "h",
            size_bytes: 10,
            file_modified_date: Utc::now(),
            file_identity_device: None,
            file_identity_value: None,
            content_type: "image/jpeg",
        };
        let small = insert_post(&pool, &mk("small.jpg")).await.unwrap();
        let large = insert_post(&pool, &mk("large.jpg")).await.unwrap();
        posts::update_metadata(&pool, small, 100, 100, "image/jpeg").await.unwrap();
        posts::update_metadata(&pool, large, 4000, 3000, "image/jpeg").await.unwrap();

        duplicates::create_group(&pool, GroupType::Exact, None, &[small, large]).await.unwrap();

        let resolved = resolve_all(&pool).await.unwrap();
        assert_eq!(resolved, 1);
        assert!(posts::get_post(&pool, large).await.is_ok());
        assert!(posts::get_post(&pool, small).await.is_err());
    }

    #[tokio::test]
    async fn same_folder_sweep_spares_cross_folder_members() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        let lib = create_library(&pool, "L", "/lib", 24).await.unwrap();

        let mk = |rel: &'static str| NewPost {
            library_id: lib.id,
            relative_path: rel,
            content_hash: "h",
            size_bytes: 10,
            file_modified_date: Utc::now(),
            file_identity_device: None,
            file_identity_value: None,
            content_type: "image/jpeg",
        };
        let a1 = insert_post(&pool, &mk("a/1.jpg")).await.unwrap();
        let a2 = insert_post(&pool, &mk("a/2.jpg")).await.unwrap();
        let b1 = insert_post(&pool, &mk("b/1.jpg")).await.unwrap();
        duplicates::create_group(&pool, GroupType::Exact, None, &[a1, a2, b1]).await.unwrap();

        let mut roots = LibraryRoots::new();
        roots.set(lib.id, std::path::PathBuf::from("/lib"));

        let resolved = resolve_all_same_folder(&pool, &roots, false).await.unwrap();
        assert_eq!(resolved, 1);
        // `b1` had no same-folder peer in this group, so it is untouched.
        assert!(posts::get_post(&pool, b1).await.is_ok());
    }
}
