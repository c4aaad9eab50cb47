//! Compute Similarity: derives the PDQ-256 perceptual hash for image posts
//! missing one (or every image post under `mode = All`).

use super::library_paths::LibraryRoots;
use super::{DerivedDataJob, JobContext, JobDescriptor, JobMode, JobState};
use crate::db::posts;
use crate::similarity::compute_pdq_hash;
use async_trait::async_trait;
use futures::StreamExt;
use sqlx::SqlitePool;

const BATCH_SIZE: usize = 100;

pub struct ComputeSimilarityJob {
    parallelism: usize,
}

impl ComputeSimilarityJob {
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
        }
    }
}

#[async_trait]
impl DerivedDataJob for ComputeSimilarityJob {
    fn descriptor(&self) -> JobDescriptor {
        JobDescriptor {
            key: "compute-similarity",
            name: "Compute Similarity",
            description: "Derives a perceptual hash for image posts",
            supports_all_mode: true,
            display_order: 6,
        }
    }

    async fn run(&self, pool: &SqlitePool, ctx: JobContext) -> anyhow::Result<String> {
        let roots = LibraryRoots::load(pool).await?;
        let all = ctx.mode == JobMode::All;
        let targets = posts::list_image_posts_needing_similarity(pool, all).await?;
        let total = targets.len();
        let mut processed = 0usize;
        let mut failed = 0usize;

        for batch in targets.chunks(BATCH_SIZE) {
            if ctx.cancellation_token.is_cancelled() {
                break;
            }

            let outcomes: Vec<_> = futures::stream::iter(batch.iter().map(|post| {
                let full_path = roots.full_path(post);
                let post_id = post.id;
                async move {
                    let Some(full_path) = full_path else {
                        return (post_id, None);
                    };
                    match compute_pdq_hash(&full_path) {
                        Ok(hash) => (post_id, Some(hash)),
                        Err(err) => {
                            tracing::warn!(post_id, error = %err, "perceptual hash failed");
                            (post_id, None)
                        }
                    }
                }
            }))
            .buffer_unordered(self.parallelism)
            .collect()
            .await;

            for (post_id, outcome) in outcomes {
                match outcome {
                    Some(hash) => {
                        posts::update_pdq_hash(pool, post_id, &hash).await?;
                        processed += 1;
                    }
                    None => failed += 1,
                }
            }

            ctx.reporter.update(JobState {
                activity_text: "computing similarity hashes".to_string(),
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
