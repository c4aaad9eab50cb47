//! Append-only post audit log.
//!
//! Realized as a plain insert function called by the mutation sites that
//! change audited fields, rather than a database trigger.

use super::core::DbResult;
use sqlx::SqlitePool;

#[derive(Debug, Clone, Copy)]
pub enum AuditOperation {
    Insert,
    Update,
    Delete,
}

impl AuditOperation {
    fn as_str(&self) -> &'static str {
        match self {
            AuditOperation::Insert => "insert",
            AuditOperation::Update => "update",
            AuditOperation::Delete => "delete",
        }
    }
}

pub async fn record(
    pool: &SqlitePool,
    post_id: i64,
    entity: &str,
    operation: AuditOperation,
    field: Option<&str>,
    old_value: Option<&str>,
    new_value: Option<&str>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO post_audit_entries (post_id, entity, operation, field, old_value, new_value)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(post_id)
    .bind(entity)
    .bind(operation.as_str())
    .bind(field)
    .bind(old_value)
    .bind(new_value)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::core::init_schema;

    #[tokio::test]
    async fn record_appends_an_entry() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();

        record(
            &pool,
            1,
            "post",
            AuditOperation::Update,
            Some("content_hash"),
            Some("old"),
            Some("new"),
        )
        .await
        .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM post_audit_entries")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
