//! Background job engine: a named-job registry with at-most-one-
//! per-key execution, cooperative cancellation, progress reporting, and
//! persistent history.

mod cleanup_exclusions;
mod cleanup_thumbnails;
mod find_duplicates;
mod folder_tags;
pub mod library_paths;
mod metadata;
mod sanitize_tags;
mod scan_all;
pub mod scheduler;
mod similarity_job;
mod thumbnails;

pub use cleanup_exclusions::CleanupExclusionsJob;
pub use cleanup_thumbnails::CleanupThumbnailsJob;
pub use find_duplicates::FindDuplicatesJob;
pub use folder_tags::ApplyFolderTagsJob;
pub use library_paths::LibraryRoots;
pub use metadata::ExtractMetadataJob;
pub use sanitize_tags::SanitizeTagNamesJob;
pub use scan_all::ScanAllLibrariesJob;
pub use scheduler::Scheduler;
pub use similarity_job::ComputeSimilarityJob;
pub use thumbnails::GenerateThumbnailsJob;

use crate::db::jobs as jobs_db;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    Missing,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobDescriptor {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub supports_all_mode: bool,
    pub display_order: u32,
}

/// Progress snapshot; `progress_current`/`progress_total` of `None` means
/// the field is unset (cleared), letting a job move between indeterminate
/// and determinate phases without a distinct sentinel type.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobState {
    pub activity_text: String,
    pub progress_current: Option<u64>,
    pub progress_total: Option<u64>,
    pub final_text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub execution_id: i64,
    pub key: String,
    pub name: String,
    pub status: ExecutionStatus,
    pub state: JobState,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Coalesces `JobState` updates to ~5 Hz (last write within the window wins)
/// and mirrors the latest value into the engine's active-jobs map.
#[derive(Clone)]
pub struct JobReporter {
    key: String,
    shared: Arc<RwLock<HashMap<String, RunningJobInfo>>>,
    last_sent: Arc<std::sync::Mutex<Instant>>,
}

const REPORT_INTERVAL: Duration = Duration::from_millis(200);

impl JobReporter {
    /// A reporter not registered in any engine's active-jobs map: `update`
    /// calls are silently dropped. Lets a derived-data job's `run` be unit
    /// tested directly (for its return value / DB side effects) without
    /// spinning up a whole `JobEngine`.
    #[cfg(test)]
    pub(crate) fn for_test(key: &str) -> Self {
        Self {
            key: key.to_string(),
            shared: Arc::new(RwLock::new(HashMap::new())),
            last_sent: Arc::new(std::sync::Mutex::new(Instant::now())),
        }
    }

    /// Replaces the job's visible state wholesale, coalescing to ~5 Hz.
    /// Synchronous — callable from `sync::SyncProgressSink`'s non-async
    /// trait methods.
    pub fn update(&self, state: JobState) {
        self.merge(|_| state)
    }

    /// Like `update`, but `f` receives the current state so a caller can
    /// change one field (progress vs. activity text) without clobbering
    /// the other.
    fn merge(&self, f: impl FnOnce(&JobState) -> JobState) {
        let should_send = {
            let mut last = self.last_sent.lock().unwrap();
            if last.elapsed() >= REPORT_INTERVAL {
                *last = Instant::now();
                true
            } else {
                false
            }
        };

        let mut guard = self.shared.write().unwrap();
        let Some(running) = guard.get_mut(&self.key) else {
            return;
        };
        let next = f(&running.state);
        let is_final = next.final_text.is_some();
        if should_send || is_final {
            running.state = next;
        }
    }
}

impl crate::sync::SyncProgressSink for JobReporter {
    fn report_progress(&self, current: u64, total: u64) {
        self.merge(|prev| JobState {
            activity_text: prev.activity_text.clone(),
            progress_current: Some(current),
            progress_total: Some(total),
            final_text: None,
        });
    }

    fn report_status(&self, status: &str) {
        self.merge(|prev| JobState {
            activity_text: status.to_string(),
            progress_current: prev.progress_current,
            progress_total: prev.progress_total,
            final_text: None,
        });
    }
}

pub struct JobContext {
    pub mode: JobMode,
    pub cancellation_token: CancellationToken,
    pub reporter: JobReporter,
}

#[async_trait]
pub trait DerivedDataJob: Send + Sync {
    fn descriptor(&self) -> JobDescriptor;
    async fn run(&self, pool: &SqlitePool, ctx: JobContext) -> anyhow::Result<String>;
}

struct RunningJobInfo {
    execution_id: i64,
    key: String,
    name: String,
    status: ExecutionStatus,
    state: JobState,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    cancellation_token: CancellationToken,
}

/// Schedules, runs, and reports on named background jobs. Enforces
/// at-most-one-running-execution per job key via a single mutex-guarded map,
/// mirroring the teacher's `auto_scanner::AutoScanner` shared-state shape
/// generalized from one scan loop to many named handlers.
pub struct JobEngine {
    pool: SqlitePool,
    handlers: HashMap<&'static str, Arc<dyn DerivedDataJob>>,
    running: Arc<RwLock<HashMap<String, RunningJobInfo>>>,
    next_job_id: AtomicI64,
    completed_counter: AtomicU64,
}

impl JobEngine {
    pub fn new(pool: SqlitePool, handlers: Vec<Arc<dyn DerivedDataJob>>) -> Self {
        let handlers = handlers
            .into_iter()
            .map(|h| (h.descriptor().key, h))
            .collect();
        Self {
            pool,
            handlers,
            running: Arc::new(RwLock::new(HashMap::new())),
            next_job_id: AtomicI64::new(1),
            completed_counter: AtomicU64::new(0),
        }
    }

    pub fn get_available_jobs(&self) -> Vec<JobDescriptor> {
        let mut descriptors: Vec<_> = self.handlers.values().map(|h| h.descriptor()).collect();
        descriptors.sort_by_key(|d| d.display_order);
        descriptors
    }

    pub async fn get_active_jobs(&self) -> Vec<JobInfo> {
        self.running
            .read()
            .unwrap()
            .values()
            .map(|r| JobInfo {
                execution_id: r.execution_id,
                key: r.key.clone(),
                name: r.name.clone(),
                status: r.status,
                state: r.state.clone(),
                start_time: r.start_time,
                end_time: r.end_time,
            })
            .collect()
    }

    pub async fn get_job_history(&self, page: i64, page_size: i64) -> AppResult<(Vec<jobs_db::JobExecution>, i64)> {
        Ok(jobs_db::history_page(&self.pool, page, page_size).await?)
    }

    /// Starts `key` under `mode`, failing `NotFound` if unknown or `Conflict`
    /// if already running. Spawns the job's worker on its own task; returns
    /// immediately with the execution id.
    pub async fn start_job(self: &Arc<Self>, key: &str, mode: JobMode) -> AppResult<i64> {
        let handler = self
            .handlers
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("job {key}")))?;
        let descriptor = handler.descriptor();

        // Reserve the slot (execution_id -1 is a placeholder) under the lock
        // without awaiting across the guard, then fill in the real execution
        // id once the history row is inserted.
        let cancellation_token = CancellationToken::new();
        {
            let mut guard = self.running.write().unwrap();
            if guard.contains_key(key) {
                return Err(AppError::Conflict(format!("job {key} is already running")));
            }
            guard.insert(
                key.to_string(),
                RunningJobInfo {
                    execution_id: -1,
                    key: key.to_string(),
                    name: descriptor.name.to_string(),
                    status: ExecutionStatus::Running,
                    state: JobState::default(),
                    start_time: Utc::now(),
                    end_time: None,
                    cancellation_token: cancellation_token.clone(),
                },
            );
        }

        let execution_id = match jobs_db::start_execution(&self.pool, key).await {
            Ok(id) => id,
            Err(err) => {
                self.running.write().unwrap().remove(key);
                return Err(AppError::from(err));
            }
        };
        self.running.write().unwrap().get_mut(key).unwrap().execution_id = execution_id;
        self.next_job_id.fetch_add(1, Ordering::Relaxed);

        let engine = self.clone();
        let pool = self.pool.clone();
        let key_owned = key.to_string();

        tokio::spawn(async move {
            let reporter = JobReporter {
                key: key_owned.clone(),
                shared: engine.running.clone(),
                last_sent: Arc::new(std::sync::Mutex::new(
                    Instant::now() - REPORT_INTERVAL - Duration::from_secs(1),
                )),
            };
            let ctx = JobContext {
                mode,
                cancellation_token: cancellation_token.clone(),
                reporter,
            };

            let result = handler.run(&pool, ctx).await;
            engine
                .finish_job(&key_owned, execution_id, cancellation_token.is_cancelled(), result)
                .await;
        });

        Ok(execution_id)
    }

    async fn finish_job(
        &self,
        key: &str,
        execution_id: i64,
        was_cancelled: bool,
        result: anyhow::Result<String>,
    ) {
        let outcome = match (&result, was_cancelled) {
            (_, true) => {
                let _ = jobs_db::cancel_execution(&self.pool, execution_id).await;
                ExecutionStatus::Cancelled
            }
            (Ok(_), false) => {
                let _ = jobs_db::complete_execution(&self.pool, execution_id).await;
                ExecutionStatus::Completed
            }
            (Err(err), false) => {
                tracing::warn!(job = key, error = %err, "job failed");
                let _ = jobs_db::fail_execution(&self.pool, execution_id, &err.to_string()).await;
                ExecutionStatus::Failed
            }
        };

        self.completed_counter.fetch_add(1, Ordering::Relaxed);

        self.running.write().unwrap().remove(key);
        let _ = outcome;
        let _ = result;
    }

    /// Signals cancellation for the running execution with this id.
    /// Idempotent: a no-op if the execution is not currently running.
    pub async fn cancel_job(&self, execution_id: i64) {
        let guard = self.running.read().unwrap();
        if let Some(running) = guard.values().find(|r| r.execution_id == execution_id) {
            running.cancellation_token.cancel();
        }
    }
}
