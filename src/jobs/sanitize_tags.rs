//! Sanitize Tag Names: re-applies the tag naming rules to every existing
//! tag, merging two tags that collide after normalization rather than
//! leaving a duplicate behind.

use super::{DerivedDataJob, JobContext, JobDescriptor, JobState};
use crate::db::tags;
use crate::tags::sanitize_tag_name;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::HashMap;

pub struct SanitizeTagNamesJob;

#[async_trait]
impl DerivedDataJob for SanitizeTagNamesJob {
    fn descriptor(&self) -> JobDescriptor {
        JobDescriptor {
            key: "sanitize-tag-names",
            name: "Sanitize Tag Names",
            description: "Normalizes tag names and merges any that collide after normalization",
            supports_all_mode: false,
            display_order: 3,
        }
    }

    async fn run(&self, pool: &SqlitePool, ctx: JobContext) -> anyhow::Result<String> {
        let all = tags::list_tags(pool).await?;
        let total = all.len();

        // Group by sanitized name first so the survivor within a
        // colliding group is chosen from the whole group by `post_count`,
        // not by whichever tag the iteration happens to visit first.
        let mut groups: HashMap<String, Vec<&tags::Tag>> = HashMap::new();
        for tag in &all {
            if let Some(sanitized) = sanitize_tag_name(&tag.name) {
                groups.entry(sanitized).or_default().push(tag);
            }
        }

        let mut renamed = 0usize;
        let mut merged = 0usize;
        let mut processed = 0usize;

        for (sanitized, mut members) in groups {
            if ctx.cancellation_token.is_cancelled() {
                break;
            }

            if members.len() == 1 {
                let tag = members[0];
                if tag.name != sanitized {
                    tags::rename_tag(pool, tag.id, &sanitized).await?;
                    renamed += 1;
                }
            } else {
                // Survivor = largest post_count, tie-broken by lowest id for
                // determinism.
                members.sort_by(|a, b| b.post_count.cmp(&a.post_count).then(a.id.cmp(&b.id)));
                let survivor = members[0];
                if survivor.name != sanitized {
                    tags::rename_tag(pool, survivor.id, &sanitized).await?;
                    renamed += 1;
                }
                for victim in &members[1..] {
                    tags::merge_tag_into(pool, survivor.id, victim.id).await?;
                    merged += 1;
                }
            }

            processed += members.len();
            ctx.reporter.update(JobState {
                activity_text: "sanitizing tag names".to_string(),
                progress_current: Some(processed as u64),
                progress_total: Some(total as u64),
                final_text: None,
            });
        }

        let summary = format!("renamed {renamed}, merged {merged}");
        ctx.reporter.update(JobState {
            activity_text: "done".to_string(),
            progress_current: Some(total as u64),
            progress_total: Some(total as u64),
            final_text: Some(summary.clone()),
        });
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::core::init_schema;
    use crate::db::libraries::create_library;
    use crate::db::posts::{insert_post, NewPost};
    use crate::db::tags::TagSource;
    use crate::jobs::{JobMode, JobReporter};
    use chrono::Utc;
    use tokio_util::sync::CancellationToken;

    async fn run_job(pool: &SqlitePool) -> String {
        let ctx = JobContext {
            mode: JobMode::Missing,
            cancellation_token: CancellationToken::new(),
            reporter: JobReporter::for_test("sanitize-tag-names"),
        };
        SanitizeTagNamesJob.run(pool, ctx).await.unwrap()
    }

    #[tokio::test]
    async fn merges_colliding_tags_picking_survivor_by_post_count() {
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
        let p1 = insert_post(&pool, &mk("a.jpg")).await.unwrap();
        let p2 = insert_post(&pool, &mk("b.jpg")).await.unwrap();

        // "Blue Sky" and "blue_sky" collide after sanitation; the heavier
        // tag (two posts) must survive even though it sorts after the
        // lighter one alphabetically/by creation order.
        let heavy = tags::get_or_create_tag(&pool, "Blue Sky").await.unwrap();
        tags::add_post_tag(&pool, p1, heavy.id, TagSource::Manual).await.unwrap();
        tags::add_post_tag(&pool, p2, heavy.id, TagSource::Manual).await.unwrap();

        let light = tags::get_or_create_tag(&pool, "blue_sky_dup").await.unwrap();
        // Force a post-collision by renaming after creation so both land on
        // the same sanitized name without violating the unique index.
        sqlx::query("UPDATE tags SET name = 'blue sky' WHERE id = ?")
            .bind(light.id)
            .execute(&pool)
            .await
            .unwrap();
        tags::add_post_tag(&pool, p1, light.id, TagSource::Manual).await.unwrap();

        run_job(&pool).await;

        let remaining = tags::list_tags(&pool).await.unwrap();
        let blue_sky: Vec<_> = remaining.iter().filter(|t| t.name == "blue_sky").collect();
        assert_eq!(blue_sky.len(), 1);
        assert_eq!(blue_sky[0].id, heavy.id);
        assert_eq!(blue_sky[0].post_count, 2);
    }

    #[tokio::test]
    async fn second_run_is_idempotent() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        tags::get_or_create_tag(&pool, "Blue Sky").await.unwrap();

        run_job(&pool).await;
        let summary = run_job(&pool).await;
        assert_eq!(summary, "renamed 0, merged 0");
    }
}
