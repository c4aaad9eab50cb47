//! Clean Up Thumbnails: removes rendered thumbnail files on disk that no
//! longer correspond to any post's content hash — the trailing edge of a
//! content change or a post deletion.

use super::{DerivedDataJob, JobContext, JobDescriptor, JobState};
use crate::db::libraries;
use crate::db::posts;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

pub struct CleanupThumbnailsJob {
    thumbnail_root: PathBuf,
}

impl CleanupThumbnailsJob {
    pub fn new(thumbnail_root: PathBuf) -> Self {
        Self { thumbnail_root }
    }
}

#[async_trait]
impl DerivedDataJob for CleanupThumbnailsJob {
    fn descriptor(&self) -> JobDescriptor {
        JobDescriptor {
            key: "cleanup-thumbnails",
            name: "Clean Up Thumbnails",
            description: "Removes rendered thumbnails with no corresponding post",
            supports_all_mode: false,
            display_order: 8,
        }
    }

    async fn run(&self, pool: &SqlitePool, ctx: JobContext) -> anyhow::Result<String> {
        let all_posts = posts::list_all(pool).await?;
        let all_libraries = libraries::list_libraries(pool).await?;

        let mut live_hashes_by_library: HashMap<i64, HashSet<String>> = HashMap::new();
        for post in &all_posts {
            live_hashes_by_library
                .entry(post.library_id)
                .or_default()
                .insert(post.content_hash.clone());
        }

        let mut removed = 0usize;
        let mut failed = 0usize;
        let mut inspected = 0usize;

        for library in &all_libraries {
            if ctx.cancellation_token.is_cancelled() {
                break;
            }
            let library_dir = self.thumbnail_root.join(library.id.to_string());
            let Ok(entries) = std::fs::read_dir(&library_dir) else {
                continue;
            };
            let live = live_hashes_by_library.get(&library.id);

            for entry in entries.flatten() {
                let path = entry.path();
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                inspected += 1;
                let is_live = live.map(|hashes| hashes.contains(stem)).unwrap_or(false);
                if !is_live {
                    match std::fs::remove_file(&path) {
                        Ok(()) => removed += 1,
                        Err(err) => {
                            tracing::warn!(path = %path.display(), error = %err, "failed to remove orphan thumbnail");
                            failed += 1;
                        }
                    }
                }
            }

            ctx.reporter.update(JobState {
                activity_text: format!("checked {}", library.name),
                progress_current: None,
                progress_total: None,
                final_text: None,
            });
        }

        let summary = format!("removed {removed}, failed {failed}, out of {inspected} inspected");
        ctx.reporter.update(JobState {
            activity_text: "done".to_string(),
            progress_current: None,
            progress_total: None,
            final_text: Some(summary.clone()),
        });
        Ok(summary)
    }
}
