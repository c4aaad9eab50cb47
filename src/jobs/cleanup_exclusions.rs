//! Clean Up Excluded Files: drops exclusion records whose file has
//! since been deleted or whose content has changed, since either makes the
//! original exclusion decision no longer meaningful.

use super::library_paths::LibraryRoots;
use super::{DerivedDataJob, JobContext, JobDescriptor, JobState};
use crate::db::exclusions;
use crate::hashing::hash_file;
use async_trait::async_trait;
use sqlx::SqlitePool;

pub struct CleanupExclusionsJob;

#[async_trait]
impl DerivedDataJob for CleanupExclusionsJob {
    fn descriptor(&self) -> JobDescriptor {
        JobDescriptor {
            key: "cleanup-excluded-files",
            name: "Clean Up Excluded Files",
            description: "Drops exclusion records for files that were deleted or changed",
            supports_all_mode: false,
            display_order: 7,
        }
    }

    async fn run(&self, pool: &SqlitePool, ctx: JobContext) -> anyhow::Result<String> {
        let roots = LibraryRoots::load(pool).await?;
        let excluded = exclusions::list_all(pool).await?;
        let total = excluded.len();
        let mut stale_ids = Vec::new();

        for (index, record) in excluded.iter().enumerate() {
            if ctx.cancellation_token.is_cancelled() {
                break;
            }

            let Some(root) = roots.root(record.library_id) else {
                stale_ids.push(record.id);
                continue;
            };
            let full_path = root.join(&record.relative_path);

            let still_coherent = hash_file(&full_path)
                .map(|current_hash| current_hash == record.content_hash)
                .unwrap_or(false);

            if !still_coherent {
                stale_ids.push(record.id);
            }

            ctx.reporter.update(JobState {
                activity_text: "checking excluded files".to_string(),
                progress_current: Some((index + 1) as u64),
                progress_total: Some(total as u64),
                final_text: None,
            });
        }

        let removed = exclusions::delete_ids(pool, &stale_ids).await?;

        let summary = format!("removed {removed} stale exclusions out of {total}");
        ctx.reporter.update(JobState {
            activity_text: "done".to_string(),
            progress_current: Some(total as u64),
            progress_total: Some(total as u64),
            final_text: Some(summary.clone()),
        });
        Ok(summary)
    }
}
