//! Ingestion pipeline: a producer-consumer buffer batching `Post` inserts
//! from concurrent scanners. Batches of up to 100 posts or every 500ms,
//! whichever comes first; a batch failure is logged and drops only that
//! batch.

use crate::db::posts::NewPost;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::time::{interval, Duration};
use tokio_util::task::AbortOnDropHandle;

const BATCH_SIZE: usize = 100;
const BATCH_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct PendingPost {
    pub library_id: i64,
    pub relative_path: String,
    pub content_hash: String,
    pub size_bytes: i64,
    pub file_modified_date: DateTime<Utc>,
    pub file_identity_device: Option<String>,
    pub file_identity_value: Option<String>,
    pub content_type: String,
}

struct Inner {
    buffer: Mutex<Vec<PendingPost>>,
    flushed: Notify,
}

/// Handle shared by every scanner worker of one sync invocation. Cheap to
/// clone; `enqueue` is safe from many concurrent producers.
#[derive(Clone)]
pub struct IngestionPipeline {
    inner: Arc<Inner>,
    pool: SqlitePool,
}

impl IngestionPipeline {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            inner: Arc::new(Inner {
                buffer: Mutex::new(Vec::new()),
                flushed: Notify::new(),
            }),
            pool,
        }
    }

    /// Buffers a post for the next batch write; flushes immediately if the
    /// buffer has reached `BATCH_SIZE`.
    pub async fn enqueue(&self, post: PendingPost) -> anyhow::Result<()> {
        let should_flush = {
            let mut buffer = self.inner.buffer.lock().await;
            buffer.push(post);
            buffer.len() >= BATCH_SIZE
        };
        if should_flush {
            self.write_batch().await?;
        }
        Ok(())
    }

    /// Waits until every post enqueued prior to this call is durably written.
    pub async fn flush(&self) -> anyhow::Result<()> {
        self.write_batch().await?;
        self.inner.flushed.notify_waiters();
        Ok(())
    }

    async fn write_batch(&self) -> anyhow::Result<()> {
        let batch = {
            let mut buffer = self.inner.buffer.lock().await;
            if buffer.is_empty() {
                return Ok(());
            }
            std::mem::take(&mut *buffer)
        };

        if let Err(err) = self.write_batch_transactional(&batch).await {
            tracing::warn!(error = %err, count = batch.len(), "batch insert failed, dropping batch");
        }
        Ok(())
    }

    async fn write_batch_transactional(&self, batch: &[PendingPost]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        for post in batch {
            let new_post = NewPost {
                library_id: post.library_id,
                relative_path: &post.relative_path,
                content_hash: &post.content_hash,
                size_bytes: post.size_bytes,
                file_modified_date: post.file_modified_date,
                file_identity_device: post.file_identity_device.as_deref(),
                file_identity_value: post.file_identity_value.as_deref(),
                content_type: &post.content_type,
            };
            // insert_post takes &SqlitePool; reuse the same connection via a
            // raw query here so the whole batch commits atomically.
            sqlx::query(
                r#"
                INSERT INTO posts (
                    library_id, relative_path, content_hash, size_bytes,
                    file_modified_date, file_identity_device, file_identity_value, content_type
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(new_post.library_id)
            .bind(new_post.relative_path)
            .bind(new_post.content_hash)
            .bind(new_post.size_bytes)
            .bind(new_post.file_modified_date)
            .bind(new_post.file_identity_device)
            .bind(new_post.file_identity_value)
            .bind(new_post.content_type)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Spawns the background timer loop that flushes every `BATCH_INTERVAL`
    /// even when the buffer hasn't reached `BATCH_SIZE` — the time-based
    /// half of the "whichever comes first" batching contract. Returns a
    /// handle that aborts the loop when dropped, so an early return from the
    /// owning sync invocation can't leak it.
    pub fn spawn_timer(self: &Self) -> AbortOnDropHandle<()> {
        let pipeline = self.clone();
        AbortOnDropHandle::new(tokio::spawn(async move {
            let mut ticker = interval(BATCH_INTERVAL);
            loop {
                ticker.tick().await;
                if let Err(err) = pipeline.write_batch().await {
                    tracing::warn!(error = %err, "timed batch flush failed");
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::core::init_schema;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        pool
    }

    fn pending(library_id: i64, path: &str) -> PendingPost {
        PendingPost {
            library_id,
            relative_path: path.to_string(),
            content_hash: "h".to_string(),
            size_bytes: 1,
            file_modified_date: Utc::now(),
            file_identity_device: None,
            file_identity_value: None,
            content_type: "".to_string(),
        }
    }

    #[tokio::test]
    async fn flush_writes_buffered_posts() {
        let pool = memory_pool().await;
        let lib = crate::db::libraries::create_library(&pool, "L", "/lib", 24).await.unwrap();
        let pipeline = IngestionPipeline::new(pool.clone());

        pipeline.enqueue(pending(lib.id, "a.jpg")).await.unwrap();
        pipeline.enqueue(pending(lib.id, "b.jpg")).await.unwrap();
        pipeline.flush().await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn spawned_timer_flushes_without_reaching_batch_size_or_explicit_flush() {
        let pool = memory_pool().await;
        let lib = crate::db::libraries::create_library(&pool, "L", "/lib", 24).await.unwrap();
        let pipeline = IngestionPipeline::new(pool.clone());
        let _timer = pipeline.spawn_timer();

        pipeline.enqueue(pending(lib.id, "a.jpg")).await.unwrap();

        tokio::time::sleep(BATCH_INTERVAL * 2).await;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn reaching_batch_size_flushes_automatically() {
        let pool = memory_pool().await;
        let lib = crate::db::libraries::create_library(&pool, "L", "/lib", 24).await.unwrap();
        let pipeline = IngestionPipeline::new(pool.clone());

        for i in 0..BATCH_SIZE {
            pipeline.enqueue(pending(lib.id, &format!("{i}.jpg"))).await.unwrap();
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count as usize, BATCH_SIZE);
    }
}
