//! Find Duplicates: rebuilds every unresolved duplicate group from
//! scratch — exact groups by content hash, perceptual groups by PDQ-256
//! Hamming-distance clique extension — skipping any grouping whose exact
//! membership was already dismissed by the user.

use super::{DerivedDataJob, JobContext, JobDescriptor, JobState};
use crate::config::SimilarityConfig;
use crate::db::duplicates::{self, GroupType};
use crate::db::posts;
use crate::similarity::{effective_threshold, hamming_distance, median_percent, parse_pdq_hash, similarity_from_distance};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};

pub struct FindDuplicatesJob {
    similarity: SimilarityConfig,
}

impl FindDuplicatesJob {
    pub fn new(similarity: SimilarityConfig) -> Self {
        Self { similarity }
    }
}

#[async_trait]
impl DerivedDataJob for FindDuplicatesJob {
    fn descriptor(&self) -> JobDescriptor {
        JobDescriptor {
            key: "find-duplicates",
            name: "Find Duplicates",
            description: "Rebuilds exact and perceptual duplicate groups",
            supports_all_mode: false,
            display_order: 4,
        }
    }

    async fn run(&self, pool: &SqlitePool, ctx: JobContext) -> anyhow::Result<String> {
        let scanned = posts::list_for_duplicate_scan(pool).await?;
        let already_resolved: HashSet<Vec<i64>> = duplicates::resolved_signatures(pool).await?.into_iter().collect();

        duplicates::delete_all_unresolved(pool).await?;

        ctx.reporter.update(JobState {
            activity_text: "grouping exact duplicates".to_string(),
            progress_current: Some(0),
            progress_total: Some(scanned.len() as u64),
            final_text: None,
        });

        let mut by_hash: HashMap<&str, Vec<i64>> = HashMap::new();
        for post in &scanned {
            by_hash.entry(post.content_hash.as_str()).or_default().push(post.id);
        }

        // Every pair sharing a content hash is "covered by an Exact group"
        // regardless of whether that grouping was just (re)created or had
        // already been dismissed by the user — the perceptual pass below
        // must skip all of them, not just the ones proposed this run.
        let mut exact_pairs: HashSet<(i64, i64)> = HashSet::new();
        let mut exact_groups = 0;
        for mut ids in by_hash.into_values() {
            if ids.len() < 2 {
                continue;
            }
            ids.sort_unstable();
            for i in 0..ids.len() {
                for j in (i + 1)..ids.len() {
                    exact_pairs.insert((ids[i], ids[j]));
                }
            }
            if already_resolved.contains(&ids) {
                continue;
            }
            duplicates::create_group(pool, GroupType::Exact, None, &ids).await?;
            exact_groups += 1;
        }

        if ctx.cancellation_token.is_cancelled() {
            let summary = format!("cancelled after {exact_groups} exact groups");
            ctx.reporter.update(JobState {
                activity_text: "cancelled".to_string(),
                progress_current: None,
                progress_total: None,
                final_text: Some(summary.clone()),
            });
            return Ok(summary);
        }

        ctx.reporter.update(JobState {
            activity_text: "grouping perceptual duplicates".to_string(),
            progress_current: Some(0),
            progress_total: Some(scanned.len() as u64),
            final_text: None,
        });

        // Candidates are posts carrying a parsed perceptual hash; `non_image`
        // drives the cross-type threshold lift for mixed-kind pairs.
        let candidates: Vec<(i64, [u64; 4], bool)> = scanned
            .iter()
            .filter_map(|p| {
                let hash = p.pdq_hash_256.as_deref()?;
                let words = parse_pdq_hash(hash)?;
                let non_image = !p.content_type.starts_with("image/");
                Some((p.id, words, non_image))
            })
            .collect();

        let mut grouped = HashSet::new();
        let mut perceptual_groups = 0;

        for (index, (seed_id, seed_hash, seed_non_image)) in candidates.iter().enumerate() {
            if ctx.cancellation_token.is_cancelled() {
                break;
            }
            if grouped.contains(seed_id) {
                continue;
            }

            let mut member_ids = vec![*seed_id];
            let mut member_hashes = vec![*seed_hash];
            let mut member_non_image = *seed_non_image;
            let mut percentages = Vec::new();

            for (other_id, other_hash, other_non_image) in candidates.iter().skip(index + 1) {
                if grouped.contains(other_id) {
                    continue;
                }
                let pair = if seed_id < other_id { (*seed_id, *other_id) } else { (*other_id, *seed_id) };
                if exact_pairs.contains(&pair) {
                    continue;
                }
                let either_non_image = member_non_image || *other_non_image;
                let threshold = effective_threshold(
                    self.similarity.base_threshold,
                    self.similarity.cross_type_threshold,
                    either_non_image,
                );

                // Clique extension: a candidate joins only if it is within
                // threshold of every member already in the group.
                let distances: Vec<u32> = member_hashes.iter().map(|existing| hamming_distance(existing, other_hash)).collect();
                let fits_all = distances.iter().all(|d| similarity_from_distance(*d) >= threshold);

                if fits_all {
                    member_ids.push(*other_id);
                    member_hashes.push(*other_hash);
                    member_non_image = either_non_image;
                    for distance in distances {
                        percentages.push((similarity_from_distance(distance) * 100.0).round() as i64);
                    }
                }
            }

            if member_ids.len() < 2 {
                continue;
            }

            let mut sorted_ids = member_ids.clone();
            sorted_ids.sort_unstable();
            if already_resolved.contains(&sorted_ids) {
                continue;
            }

            for id in &member_ids {
                grouped.insert(*id);
            }

            let similarity_percent = median_percent(percentages);
            duplicates::create_group(pool, GroupType::Perceptual, similarity_percent, &member_ids).await?;
            perceptual_groups += 1;

            ctx.reporter.update(JobState {
                activity_text: "grouping perceptual duplicates".to_string(),
                progress_current: Some(index as u64),
                progress_total: Some(candidates.len() as u64),
                final_text: None,
            });
        }

        let summary = format!("exact groups {exact_groups}, perceptual groups {perceptual_groups}");
        ctx.reporter.update(JobState {
            activity_text: "done".to_string(),
            progress_current: Some(scanned.len() as u64),
            progress_total: Some(scanned.len() as u64),
            final_text: Some(summary.clone()),
        });
        Ok(summary)
    }
}
