//! Library synchronizer: reconciles one library's on-disk state with the
//! catalog, preserving post identity across renames.

use crate::db::{exclusions, libraries::Library, posts, tags as tags_db};
use crate::fs::file_identity::FileIdentity;
use crate::fs::media_source::MediaSource;
use crate::fs::supported_media::mime_for_extension;
use crate::hashing::hash_file;
use crate::ingestion::{IngestionPipeline, PendingPost};
use crate::tags::derive_folder_tags;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Progress/status sink the job engine adapts its `JobState` reporter to.
pub trait SyncProgressSink: Send + Sync {
    fn report_progress(&self, current: u64, total: u64);
    fn report_status(&self, status: &str);
}

pub struct NoopProgressSink;
impl SyncProgressSink for NoopProgressSink {
    fn report_progress(&self, _current: u64, _total: u64) {}
    fn report_status(&self, _status: &str) {}
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SyncReport {
    pub scanned: u64,
    pub added: u64,
    pub updated: u64,
    pub moved: u64,
    pub removed: u64,
}

#[derive(Debug, Clone)]
struct PostUpdate {
    post_id: i64,
    content_hash: String,
    size_bytes: i64,
    file_modified_date: DateTime<Utc>,
    file_identity_device: Option<String>,
    file_identity_value: Option<String>,
    reset_derived: bool,
    identity_only: bool,
}

#[derive(Debug, Clone)]
struct MoveUpdate {
    post_id: i64,
    new_relative_path: String,
    content_type: String,
    size_bytes: i64,
    file_modified_date: DateTime<Utc>,
    content_hash: String,
    file_identity_device: Option<String>,
    file_identity_value: Option<String>,
}

#[derive(Debug, Clone)]
struct PotentialMove {
    new_relative_path: String,
    content_hash: String,
    size_bytes: i64,
    file_modified_date: DateTime<Utc>,
    file_identity_device: String,
    file_identity_value: String,
}

/// A path is ignored iff it equals or is a segment-aligned descendant of any
/// configured prefix.
fn is_ignored(relative_path: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|prefix| {
        relative_path == prefix || relative_path.starts_with(&format!("{prefix}/"))
    })
}

pub struct LibrarySynchronizer {
    pool: SqlitePool,
    scanner_parallelism: usize,
}

impl LibrarySynchronizer {
    pub fn new(pool: SqlitePool, scanner_parallelism: usize) -> Self {
        Self {
            pool,
            scanner_parallelism: scanner_parallelism.max(1),
        }
    }

    pub async fn sync(
        &self,
        library: &Library,
        progress: &dyn SyncProgressSink,
        cancellation: &CancellationToken,
    ) -> anyhow::Result<SyncReport> {
        let root = Path::new(&library.path);

        // Step 1: enumerate & count.
        progress.report_status("enumerating files");
        let entries = MediaSource::scan(root);
        let total = entries.len() as u64;

        // Step 2: snapshot existing state.
        progress.report_status("loading catalog snapshot");
        let existing = posts::snapshot_existing(&self.pool, library.id).await?;
        let mut existing_by_rel_path: HashMap<String, posts::ExistingPostInfo> = HashMap::new();
        let mut existing_by_identity: HashMap<(String, String), Vec<posts::ExistingPostInfo>> =
            HashMap::new();
        for info in existing {
            if let (Some(device), Some(value)) = (
                info.file_identity_device.clone(),
                info.file_identity_value.clone(),
            ) {
                existing_by_identity
                    .entry((device, value))
                    .or_default()
                    .push(info.clone());
            }
            existing_by_rel_path.insert(info.relative_path.clone(), info);
        }

        let excluded_by_rel_path: HashMap<String, String> =
            exclusions::snapshot_by_path(&self.pool, library.id)
                .await?
                .into_iter()
                .collect();
        let ignored_prefixes = crate::db::libraries::list_ignored_prefixes(&self.pool, library.id).await?;

        // Step 3: parallel scan.
        progress.report_status("scanning files");
        let seen_paths: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
        let potential_moves: Arc<Mutex<Vec<PotentialMove>>> = Arc::new(Mutex::new(Vec::new()));
        let posts_to_update: Arc<Mutex<Vec<PostUpdate>>> = Arc::new(Mutex::new(Vec::new()));
        let added_paths: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let scanned_count = Arc::new(Mutex::new(0u64));

        let pipeline = IngestionPipeline::new(self.pool.clone());
        // The "whichever comes first" batching contract needs the timer
        // half running for as long as anything still calls `enqueue` —
        // the parallel scan below and the move-resolution pass after it.
        let timer_handle = pipeline.spawn_timer();

        let parallelism = self.scanner_parallelism;
        let existing_by_rel_path = Arc::new(existing_by_rel_path);
        let existing_by_identity = Arc::new(existing_by_identity);
        let excluded_by_rel_path = Arc::new(excluded_by_rel_path);
        let ignored_prefixes = Arc::new(ignored_prefixes);

        stream::iter(entries.into_iter())
            .map(|entry| {
                let seen_paths = seen_paths.clone();
                let potential_moves = potential_moves.clone();
                let posts_to_update = posts_to_update.clone();
                let added_paths = added_paths.clone();
                let scanned_count = scanned_count.clone();
                let existing_by_rel_path = existing_by_rel_path.clone();
                let existing_by_identity = existing_by_identity.clone();
                let excluded_by_rel_path = excluded_by_rel_path.clone();
                let ignored_prefixes = ignored_prefixes.clone();
                let pipeline = pipeline.clone();
                let cancellation = cancellation.clone();
                let progress = progress;

                async move {
                    if cancellation.is_cancelled() {
                        return;
                    }

                    let rel_path = entry.relative_path.clone();
                    if is_ignored(&rel_path, &ignored_prefixes) {
                        return;
                    }

                    seen_paths.lock().await.insert(rel_path.clone());

                    // Advance and report progress for every entry the scan
                    // touches, not just the ones that turn into a move or a
                    // new post — progress is a denominator with a steadily
                    // advancing numerator, not one that snaps from 0 to
                    // 100% at the end.
                    let current = {
                        let mut count = scanned_count.lock().await;
                        *count += 1;
                        *count
                    };
                    progress.report_progress(current, total);

                    let mut cached_hash: Option<String> = None;

                    if let Some(excluded_hash) = excluded_by_rel_path.get(&rel_path) {
                        match hash_file(&entry.full_path) {
                            Ok(hash) => {
                                if &hash == excluded_hash {
                                    return;
                                }
                                cached_hash = Some(hash);
                            }
                            Err(err) => {
                                tracing::warn!(path = %entry.full_path.display(), error = %err, "hash failed, skipping file");
                                return;
                            }
                        }
                    }

                    let identity = std::fs::metadata(&entry.full_path)
                        .ok()
                        .and_then(|m| FileIdentity::from_metadata(&m));

                    if let Some(existing_info) = existing_by_rel_path.get(&rel_path) {
                        let mtime_delta = (entry.last_modified_utc - existing_info.file_modified_date)
                            .num_milliseconds()
                            .abs();
                        let unchanged = entry.size_bytes as i64 == existing_info.size_bytes
                            && mtime_delta <= 1000;

                        if unchanged {
                            let missing_identity = existing_info.file_identity_device.is_none();
                            if missing_identity {
                                if let Some(ref id) = identity {
                                    posts_to_update.lock().await.push(PostUpdate {
                                        post_id: existing_info.id,
                                        content_hash: existing_info.content_hash.clone(),
                                        size_bytes: existing_info.size_bytes,
                                        file_modified_date: existing_info.file_modified_date,
                                        file_identity_device: Some(id.device.clone()),
                                        file_identity_value: Some(id.value.clone()),
                                        reset_derived: false,
                                        identity_only: true,
                                    });
                                }
                            }
                            // else: no-op, genuinely unchanged.
                        } else {
                            let hash = match cached_hash.clone() {
                                Some(h) => h,
                                None => match hash_file(&entry.full_path) {
                                    Ok(h) => h,
                                    Err(err) => {
                                        tracing::warn!(path = %entry.full_path.display(), error = %err, "hash failed, skipping file");
                                        return;
                                    }
                                },
                            };
                            let reset_derived = hash != existing_info.content_hash;
                            posts_to_update.lock().await.push(PostUpdate {
                                post_id: existing_info.id,
                                content_hash: hash,
                                size_bytes: entry.size_bytes as i64,
                                file_modified_date: entry.last_modified_utc,
                                file_identity_device: identity.as_ref().map(|i| i.device.clone()),
                                file_identity_value: identity.as_ref().map(|i| i.value.clone()),
                                reset_derived,
                                identity_only: false,
                            });
                        }
                        return;
                    }

                    // Unknown path: move candidate or brand-new post.
                    let hash = match cached_hash {
                        Some(h) => h,
                        None => match hash_file(&entry.full_path) {
                            Ok(h) => h,
                            Err(err) => {
                                tracing::warn!(path = %entry.full_path.display(), error = %err, "hash failed, skipping file");
                                return;
                            }
                        },
                    };

                    if let Some(ref id) = identity {
                        if existing_by_identity.contains_key(&(id.device.clone(), id.value.clone())) {
                            potential_moves.lock().await.push(PotentialMove {
                                new_relative_path: rel_path.clone(),
                                content_hash: hash,
                                size_bytes: entry.size_bytes as i64,
                                file_modified_date: entry.last_modified_utc,
                                file_identity_device: id.device.clone(),
                                file_identity_value: id.value.clone(),
                            });
                            return;
                        }
                    }

                    let extension = Path::new(&rel_path)
                        .extension()
                        .and_then(|e| e.to_str())
                        .unwrap_or("");
                    let content_type = mime_for_extension(extension).map(|(m, _)| m).unwrap_or("");

                    if let Err(err) = pipeline
                        .enqueue(PendingPost {
                            library_id: library.id,
                            relative_path: rel_path.clone(),
                            content_hash: hash,
                            size_bytes: entry.size_bytes as i64,
                            file_modified_date: entry.last_modified_utc,
                            file_identity_device: identity.as_ref().map(|i| i.device.clone()),
                            file_identity_value: identity.as_ref().map(|i| i.value.clone()),
                            content_type: content_type.to_string(),
                        })
                        .await
                    {
                        tracing::warn!(error = %err, "failed to enqueue new post");
                    } else {
                        added_paths.lock().await.push(rel_path.clone());
                    }
                }
            })
            .buffer_unordered(parallelism)
            .collect::<Vec<()>>()
            .await;

        // Step 4: flush.
        pipeline.flush().await?;

        // Step 5: resolve moves.
        progress.report_status("resolving moves");
        let mut seen = seen_paths.lock().await;
        let mut consumed_sources: HashSet<String> = HashSet::new();
        let mut move_updates = Vec::new();
        let moves = std::mem::take(&mut *potential_moves.lock().await);

        for candidate in moves {
            let key = (candidate.file_identity_device.clone(), candidate.file_identity_value.clone());
            let source = existing_by_identity.get(&key).and_then(|infos| {
                infos
                    .iter()
                    .find(|info| !seen.contains(&info.relative_path) && !consumed_sources.contains(&info.relative_path))
            });

            if let Some(source) = source {
                consumed_sources.insert(source.relative_path.clone());
                seen.insert(source.relative_path.clone());

                let extension = Path::new(&candidate.new_relative_path)
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("");
                let content_type = mime_for_extension(extension).map(|(m, _)| m).unwrap_or("");

                move_updates.push(MoveUpdate {
                    post_id: source.id,
                    new_relative_path: candidate.new_relative_path,
                    content_type: content_type.to_string(),
                    size_bytes: candidate.size_bytes,
                    file_modified_date: candidate.file_modified_date,
                    content_hash: candidate.content_hash,
                    file_identity_device: Some(candidate.file_identity_device),
                    file_identity_value: Some(candidate.file_identity_value),
                });
            } else {
                let extension = Path::new(&candidate.new_relative_path)
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("");
                let content_type = mime_for_extension(extension).map(|(m, _)| m).unwrap_or("");

                pipeline
                    .enqueue(PendingPost {
                        library_id: library.id,
                        relative_path: candidate.new_relative_path.clone(),
                        content_hash: candidate.content_hash,
                        size_bytes: candidate.size_bytes,
                        file_modified_date: candidate.file_modified_date,
                        file_identity_device: Some(candidate.file_identity_device),
                        file_identity_value: Some(candidate.file_identity_value),
                        content_type: content_type.to_string(),
                    })
                    .await?;
                added_paths.lock().await.push(candidate.new_relative_path.clone());
            }
        }
        drop(seen);
        pipeline.flush().await?;
        drop(timer_handle);

        // Step 6: apply update & move sets in one transactional pass.
        progress.report_status("applying updates and moves");
        let updates = std::mem::take(&mut *posts_to_update.lock().await);
        let identity_only_count = updates.iter().filter(|u| u.identity_only).count();
        let content_update_count = updates.len() - identity_only_count;

        {
            let mut tx = self.pool.begin().await?;
            for update in &updates {
                if update.identity_only {
                    posts::update_post_identity(
                        &mut tx,
                        update.post_id,
                        update.file_identity_device.as_deref().unwrap_or_default(),
                        update.file_identity_value.as_deref().unwrap_or_default(),
                    )
                    .await?;
                } else {
                    posts::update_post_content(
                        &mut tx,
                        update.post_id,
                        &update.content_hash,
                        update.size_bytes,
                        update.file_modified_date,
                        update.file_identity_device.as_deref(),
                        update.file_identity_value.as_deref(),
                        update.reset_derived,
                    )
                    .await?;
                }
            }
            for mv in &move_updates {
                posts::move_post(
                    &mut tx,
                    mv.post_id,
                    &mv.new_relative_path,
                    &mv.content_type,
                    mv.size_bytes,
                    mv.file_modified_date,
                    &mv.content_hash,
                    mv.file_identity_device.as_deref(),
                    mv.file_identity_value.as_deref(),
                )
                .await?;
            }
            tx.commit().await?;
        }

        // Step 7: copy inherited tags for newly added posts.
        progress.report_status("inheriting tags");
        let added = std::mem::take(&mut *added_paths.lock().await);
        for rel_path in &added {
            if let Some(new_post) = posts::get_post_by_path(&self.pool, library.id, rel_path).await? {
                let donors = posts::find_tag_donor_post_ids(
                    &self.pool,
                    library.id,
                    &new_post.content_hash,
                    new_post.id,
                )
                .await?;
                for donor_id in donors {
                    tags_db::copy_non_folder_tags(&self.pool, donor_id, new_post.id).await?;
                }
            }
        }

        // Step 8: orphan removal.
        progress.report_status("removing orphans");
        let seen = seen_paths.lock().await;
        let orphan_ids: Vec<i64> = existing_by_rel_path
            .iter()
            .filter(|(rel_path, _)| !seen.contains(*rel_path))
            .map(|(_, info)| info.id)
            .collect();
        drop(seen);

        let mut removed = 0u64;
        for chunk in orphan_ids.chunks(100) {
            removed += posts::delete_posts_batch(&self.pool, chunk).await?;
        }

        progress.report_progress(total, total);
        progress.report_status("done");

        Ok(SyncReport {
            scanned: total,
            added: added.len() as u64,
            updated: content_update_count as u64,
            moved: move_updates.len() as u64,
            removed,
        })
    }
}

/// Derives folder tags for every post under `library_id` that doesn't yet
/// carry them — a convenience wrapper the Apply-Folder-Tags job calls per
/// batch rather than reimplementing segment derivation.
pub fn folder_tags_for_path(relative_path: &str) -> Vec<String> {
    derive_folder_tags(relative_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::core::init_schema;
    use crate::db::libraries::create_library;
    use std::fs;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn s1_add_and_hash() {
        let pool = memory_pool().await;
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.jpg"), b"fake-jpeg-bytes").unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        fs::rename(dir.path().join("b.jpg"), dir.path().join("a/b.jpg")).unwrap();

        let library = create_library(&pool, "L", dir.path().to_str().unwrap(), 24).await.unwrap();
        let library = Library { path: dir.path().to_str().unwrap().to_string(), ..library };

        let synchronizer = LibrarySynchronizer::new(pool.clone(), 1);
        let report = synchronizer
            .sync(&library, &NoopProgressSink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.scanned, 1);
        assert_eq!(report.added, 1);

        let post = posts::get_post_by_path(&pool, library.id, "a/b.jpg").await.unwrap().unwrap();
        assert_eq!(post.width, 0);
        assert!(!post.content_hash.is_empty());
    }

    #[tokio::test]
    async fn repeat_sync_on_unchanged_tree_is_a_no_op() {
        let pool = memory_pool().await;
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.jpg"), b"hello").unwrap();

        let library = create_library(&pool, "L", dir.path().to_str().unwrap(), 24).await.unwrap();
        let synchronizer = LibrarySynchronizer::new(pool.clone(), 1);

        synchronizer.sync(&library, &NoopProgressSink, &CancellationToken::new()).await.unwrap();
        let second = synchronizer.sync(&library, &NoopProgressSink, &CancellationToken::new()).await.unwrap();

        assert_eq!(second.added, 0);
        assert_eq!(second.updated, 0);
        assert_eq!(second.moved, 0);
        assert_eq!(second.removed, 0);
    }

    #[tokio::test]
    async fn ignored_prefix_is_skipped() {
        let pool = memory_pool().await;
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("tmp")).unwrap();
        fs::write(dir.path().join("tmp/a.jpg"), b"hello").unwrap();
        fs::write(dir.path().join("keep.jpg"), b"world").unwrap();

        let library = create_library(&pool, "L", dir.path().to_str().unwrap(), 24).await.unwrap();
        crate::db::libraries::add_ignored_prefix(&pool, library.id, "tmp").await.unwrap();

        let synchronizer = LibrarySynchronizer::new(pool.clone(), 1);
        let report = synchronizer.sync(&library, &NoopProgressSink, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.added, 1);
        assert!(posts::get_post_by_path(&pool, library.id, "tmp/a.jpg").await.unwrap().is_none());
    }

    #[test]
    fn ignored_prefix_matching_is_segment_aligned() {
        let prefixes = vec!["tmp".to_string()];
        assert!(is_ignored("tmp/a.jpg", &prefixes));
        assert!(is_ignored("tmp", &prefixes));
        assert!(!is_ignored("tmpfoo/a.jpg", &prefixes));
    }
}
