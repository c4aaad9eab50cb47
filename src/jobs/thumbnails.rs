//! Generate Thumbnails: renders a thumbnail for each post missing one on
//! disk (or every post under `mode = All`).

use super::library_paths::LibraryRoots;
use super::{DerivedDataJob, JobContext, JobDescriptor, JobMode, JobState};
use crate::db::posts;
use crate::fs::supported_media::mime_for_extension;
use crate::media::{thumbnail_path, MediaProcessor};
use async_trait::async_trait;
use futures::StreamExt;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const BATCH_SIZE: usize = 50;
const MAX_DIMENSION: u32 = 400;

pub struct GenerateThumbnailsJob {
    processor: Arc<dyn MediaProcessor>,
    parallelism: usize,
    thumbnail_root: PathBuf,
}

impl GenerateThumbnailsJob {
    pub fn new(processor: Arc<dyn MediaProcessor>, parallelism: usize, thumbnail_root: PathBuf) -> Self {
        Self {
            processor,
            parallelism: parallelism.max(1),
            thumbnail_root,
        }
    }
}

#[async_trait]
impl DerivedDataJob for GenerateThumbnailsJob {
    fn descriptor(&self) -> JobDescriptor {
        JobDescriptor {
            key: "generate-thumbnails",
            name: "Generate Thumbnails",
            description: "Renders a thumbnail image for each post",
            supports_all_mode: true,
            display_order: 5,
        }
    }

    async fn run(&self, pool: &SqlitePool, ctx: JobContext) -> anyhow::Result<String> {
        let roots = LibraryRoots::load(pool).await?;
        let all = posts::list_all(pool).await?;

        let targets: Vec<_> = all
            .into_iter()
            .filter(|post| {
                ctx.mode == JobMode::All
                    || !thumbnail_path(&self.thumbnail_root, post.library_id, &post.content_hash).exists()
            })
            .collect();

        let total = targets.len();
        let mut processed = 0usize;
        let mut failed = 0usize;

        for batch in targets.chunks(BATCH_SIZE) {
            if ctx.cancellation_token.is_cancelled() {
                break;
            }

            let outcomes: Vec<bool> = futures::stream::iter(batch.iter().map(|post| {
                let processor = self.processor.clone();
                let full_path = roots.full_path(post);
                let dest_path = thumbnail_path(&self.thumbnail_root, post.library_id, &post.content_hash);
                let post_id = post.id;
                let extension = Path::new(&post.relative_path)
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("")
                    .to_string();

                async move {
                    let Some(full_path) = full_path else {
                        return false;
                    };
                    let Some((_, kind)) = mime_for_extension(&extension) else {
                        return false;
                    };
                    match processor.render_thumbnail(&full_path, kind, &dest_path, MAX_DIMENSION) {
                        Ok(()) => true,
                        Err(err) => {
                            tracing::warn!(post_id, error = %err, "thumbnail render failed");
                            false
                        }
                    }
                }
            }))
            .buffer_unordered(self.parallelism)
            .collect()
            .await;

            for ok in outcomes {
                if ok {
                    processed += 1;
                } else {
                    failed += 1;
                }
            }

            ctx.reporter.update(JobState {
                activity_text: "rendering thumbnails".to_string(),
                progress_current: Some((processed + failed) as u64),
                progress_total: Some(total as u64),
                final_text: None,
            });
        }

        let summary = format!("rendered {processed}, failed {failed}");
        ctx.reporter.update(JobState {
            activity_text: "done".to_string(),
            progress_current: Some(total as u64),
            progress_total: Some(total as u64),
            final_text: Some(summary.clone()),
        });
        Ok(summary)
    }
}
