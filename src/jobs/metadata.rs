//! Extract Metadata: fills in width/height/content-type for posts
//! missing them (or all posts under `mode = All`).

use super::library_paths::LibraryRoots;
use super::{DerivedDataJob, JobContext, JobDescriptor, JobMode, JobState};
use crate::db::posts;
use crate::fs::supported_media::mime_for_extension;
use crate::media::MediaProcessor;
use async_trait::async_trait;
use futures::StreamExt;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;

const BATCH_SIZE: usize = 100;

pub struct ExtractMetadataJob {
    processor: Arc<dyn MediaProcessor>,
    parallelism: usize,
}

impl ExtractMetadataJob {
    pub fn new(processor: Arc<dyn MediaProcessor>, parallelism: usize) -> Self {
        Self {
            processor,
            parallelism: parallelism.max(1),
        }
    }
}

#[async_trait]
impl DerivedDataJob for ExtractMetadataJob {
    fn descriptor(&self) -> JobDescriptor {
        JobDescriptor {
            key: "extract-metadata",
            name: "Extract Metadata",
            description: "Derives width, height, and content type for posts",
            supports_all_mode: true,
            display_order: 1,
        }
    }

    async fn run(&self, pool: &SqlitePool, ctx: JobContext) -> anyhow::Result<String> {
        let roots = LibraryRoots::load(pool).await?;
        let all = ctx.mode == JobMode::All;
        let targets = posts::list_posts_needing_metadata(pool, all).await?;
        let total = targets.len();
        let mut processed = 0usize;
        let mut failed = 0usize;

        for batch in targets.chunks(BATCH_SIZE) {
            if ctx.cancellation_token.is_cancelled() {
                break;
            }

            let outcomes: Vec<_> = futures::stream::iter(batch.iter().map(|post| {
                let processor = self.processor.clone();
                let full_path = roots.full_path(post);
                async move {
                    let Some(full_path) = full_path else {
                        return (post.id, None);
                    };
                    let extension = Path::new(&post.relative_path)
                        .extension()
                        .and_then(|e| e.to_str())
                        .unwrap_or("");
                    let Some((mime, kind)) = mime_for_extension(extension) else {
                        return (post.id, None);
                    };
                    match processor.extract_dimensions(&full_path, kind) {
                        Ok(dims) => (post.id, Some((dims.width as i64, dims.height as i64, mime))),
                        Err(err) => {
                            tracing::warn!(post_id = post.id, error = %err, "metadata extraction failed");
                            (post.id, None)
                        }
                    }
                }
            }))
            .buffer_unordered(self.parallelism)
            .collect()
            .await;

            for (post_id, outcome) in outcomes {
                match outcome {
                    Some((width, height, content_type)) => {
                        match posts::update_metadata(pool, post_id, width, height, content_type).await {
                            Ok(()) => processed += 1,
                            Err(err) => {
                                tracing::warn!(post_id, error = %err, "storing extracted metadata failed");
                                failed += 1;
                            }
                        }
                    }
                    None => failed += 1,
                }
            }

            ctx.reporter.update(JobState {
                activity_text: "extracting metadata".to_string(),
                progress_current: Some((processed + failed) as u64),
                progress_total: Some(total as u64),
                final_text: None,
            });
        }

        let summary = format!("processed {processed}, failed {failed}");
        ctx.reporter.update(JobState {
            activity_text: "done".to_string(),
            progress_current: Some(total as u64),
            progress_total: Some(total as u64),
            final_text: Some(summary.clone()),
        });
        Ok(summary)
    }
}
