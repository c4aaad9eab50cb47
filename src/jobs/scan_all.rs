//! Scan All Libraries: runs the library synchronizer over every
//! configured library, weighting per-library progress into one 0-100 bar.

use super::{DerivedDataJob, JobContext, JobDescriptor, JobState};
use crate::db::libraries;
use crate::sync::{LibrarySynchronizer, SyncReport};
use async_trait::async_trait;
use sqlx::SqlitePool;

pub struct ScanAllLibrariesJob {
    scanner_parallelism: usize,
}

impl ScanAllLibrariesJob {
    pub fn new(scanner_parallelism: usize) -> Self {
        Self { scanner_parallelism }
    }
}

#[async_trait]
impl DerivedDataJob for ScanAllLibrariesJob {
    fn descriptor(&self) -> JobDescriptor {
        JobDescriptor {
            key: "scan-all-libraries",
            name: "Scan All Libraries",
            description: "Reconciles every library's catalog with its on-disk state",
            supports_all_mode: false,
            display_order: 0,
        }
    }

    async fn run(&self, pool: &SqlitePool, ctx: JobContext) -> anyhow::Result<String> {
        let all_libraries = libraries::list_libraries(pool).await?;
        let synchronizer = LibrarySynchronizer::new(pool.clone(), self.scanner_parallelism);

        let mut totals = SyncReport::default();

        for (index, library) in all_libraries.iter().enumerate() {
            if ctx.cancellation_token.is_cancelled() {
                break;
            }
            ctx.reporter.update(JobState {
                activity_text: format!("scanning {} ({}/{})", library.name, index + 1, all_libraries.len()),
                progress_current: Some(index as u64),
                progress_total: Some(all_libraries.len() as u64),
                final_text: None,
            });

            let report = synchronizer
                .sync(library, &ctx.reporter, &ctx.cancellation_token)
                .await?;

            totals.scanned += report.scanned;
            totals.added += report.added;
            totals.updated += report.updated;
            totals.moved += report.moved;
            totals.removed += report.removed;
        }

        ctx.reporter.update(JobState {
            activity_text: "done".to_string(),
            progress_current: Some(all_libraries.len() as u64),
            progress_total: Some(all_libraries.len() as u64),
            final_text: Some(format!(
                "scanned {}, added {}, updated {}, moved {}, removed {}",
                totals.scanned, totals.added, totals.moved, totals.updated, totals.removed
            )),
        });

        Ok(serde_json::to_string(&totals)?)
    }
}
