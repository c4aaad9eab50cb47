//! Apply Folder Tags: derives each post's folder-tag set from its relative
//! path and reconciles the stored `folder`-source assignments to match, so
//! a move between directories updates tags rather than stacking them.

use super::{DerivedDataJob, JobContext, JobDescriptor, JobMode, JobState};
use crate::db::posts;
use crate::db::tags::{self, TagSource};
use crate::tags::derive_folder_tags;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::HashSet;

pub struct ApplyFolderTagsJob;

#[async_trait]
impl DerivedDataJob for ApplyFolderTagsJob {
    fn descriptor(&self) -> JobDescriptor {
        JobDescriptor {
            key: "apply-folder-tags",
            name: "Apply Folder Tags",
            description: "Derives folder tags from each post's directory path",
            supports_all_mode: true,
            display_order: 2,
        }
    }

    async fn run(&self, pool: &SqlitePool, ctx: JobContext) -> anyhow::Result<String> {
        let targets = posts::list_all(pool).await?;
        let total = targets.len();
        let mut changed = 0usize;
        let mut failed = 0usize;

        for (index, post) in targets.iter().enumerate() {
            if ctx.cancellation_token.is_cancelled() {
                break;
            }

            match reconcile_one(pool, post.id, &post.relative_path, ctx.mode).await {
                Ok(touched) => {
                    if touched {
                        changed += 1;
                    }
                }
                Err(err) => {
                    tracing::warn!(post_id = post.id, error = %err, "folder tag reconciliation failed");
                    failed += 1;
                }
            }

            ctx.reporter.update(JobState {
                activity_text: "deriving folder tags".to_string(),
                progress_current: Some((index + 1) as u64),
                progress_total: Some(total as u64),
                final_text: None,
            });
        }

        let summary = format!("{changed} posts updated, {failed} failed, out of {total}");
        ctx.reporter.update(JobState {
            activity_text: "done".to_string(),
            progress_current: Some(total as u64),
            progress_total: Some(total as u64),
            final_text: Some(summary.clone()),
        });
        Ok(summary)
    }
}

/// Reconciles one post's folder tags against its current relative path.
/// Returns whether any tag was added or removed.
async fn reconcile_one(pool: &SqlitePool, post_id: i64, relative_path: &str, mode: JobMode) -> anyhow::Result<bool> {
    let existing = tags::list_post_folder_tags(pool, post_id).await?;
    let existing_names: HashSet<String> = existing.iter().map(|row| row.tag_name.clone()).collect();
    let desired: HashSet<String> = derive_folder_tags(relative_path).into_iter().collect();

    // `Missing` mode only backfills posts carrying no folder tags yet;
    // `All` reconciles every post's set against its current path.
    if mode == JobMode::Missing && !existing_names.is_empty() {
        return Ok(false);
    }

    let mut touched = false;

    for row in &existing {
        if !desired.contains(&row.tag_name) {
            tags::remove_post_tag(pool, post_id, row.tag_id, TagSource::Folder).await?;
            touched = true;
        }
    }

    for name in &desired {
        if !existing_names.contains(name) {
            let tag = tags::get_or_create_tag(pool, name).await?;
            tags::add_post_tag(pool, post_id, tag.id, TagSource::Folder).await?;
            touched = true;
        }
    }

    Ok(touched)
}
