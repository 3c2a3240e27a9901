//! Durable per-document processing ledger.
//!
//! One row per knowledge-base file ever seen, keyed by path. Only the
//! ingestion pipeline writes here; rows are never deleted by the engine.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::models::{DocumentStatus, KnowledgeBaseStats, ProcessedDocument};

pub async fn get_document(pool: &SqlitePool, file_path: &str) -> Result<Option<ProcessedDocument>> {
    let row = sqlx::query(
        "SELECT file_path, filename, file_type, chunk_count, status, error_message, processed_at, created_at
         FROM processed_documents WHERE file_path = ?",
    )
    .bind(file_path)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(row_to_document))
}

/// Create the row on first sight, or reset an existing row for a new run.
/// Either way the document ends up `processing` with no error message.
pub async fn mark_processing(
    pool: &SqlitePool,
    file_path: &str,
    filename: &str,
    file_type: &str,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO processed_documents (file_path, filename, file_type, status, created_at)
        VALUES (?, ?, ?, 'processing', ?)
        ON CONFLICT(file_path) DO UPDATE SET
            filename = excluded.filename,
            file_type = excluded.file_type,
            status = 'processing',
            error_message = NULL
        "#,
    )
    .bind(file_path)
    .bind(filename)
    .bind(file_type)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn mark_completed(pool: &SqlitePool, file_path: &str, chunk_count: i64) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        "UPDATE processed_documents
         SET status = 'completed', chunk_count = ?, processed_at = ?, error_message = NULL
         WHERE file_path = ?",
    )
    .bind(chunk_count)
    .bind(now)
    .bind(file_path)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn mark_failed(pool: &SqlitePool, file_path: &str, error: &str) -> Result<()> {
    sqlx::query(
        "UPDATE processed_documents SET status = 'failed', error_message = ? WHERE file_path = ?",
    )
    .bind(error)
    .bind(file_path)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn list_documents(pool: &SqlitePool) -> Result<Vec<ProcessedDocument>> {
    let rows = sqlx::query(
        "SELECT file_path, filename, file_type, chunk_count, status, error_message, processed_at, created_at
         FROM processed_documents ORDER BY created_at DESC, file_path ASC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_document).collect())
}

/// Ledger totals plus whether a persisted index artifact exists.
pub async fn stats(pool: &SqlitePool, vector_store_exists: bool) -> Result<KnowledgeBaseStats> {
    let total_documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM processed_documents")
        .fetch_one(pool)
        .await?;

    let total_chunks: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(chunk_count), 0) FROM processed_documents WHERE status = 'completed'",
    )
    .fetch_one(pool)
    .await?;

    let last_updated: Option<i64> = sqlx::query_scalar(
        "SELECT MAX(processed_at) FROM processed_documents WHERE status = 'completed'",
    )
    .fetch_one(pool)
    .await?;

    Ok(KnowledgeBaseStats {
        total_documents,
        total_chunks,
        vector_store_exists,
        last_updated,
    })
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> ProcessedDocument {
    let status_str: String = row.get("status");
    ProcessedDocument {
        file_path: row.get("file_path"),
        filename: row.get("filename"),
        file_type: row.get("file_type"),
        chunk_count: row.get("chunk_count"),
        status: DocumentStatus::parse(&status_str).unwrap_or(DocumentStatus::Pending),
        error_message: row.get("error_message"),
        processed_at: row.get("processed_at"),
        created_at: row.get("created_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;

    async fn test_pool() -> SqlitePool {
        // One connection: each pooled connection to :memory: is its own db
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn processing_then_completed() {
        let pool = test_pool().await;
        mark_processing(&pool, "/kb/a.txt", "a.txt", "txt")
            .await
            .unwrap();

        let doc = get_document(&pool, "/kb/a.txt").await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Processing);
        assert_eq!(doc.chunk_count, 0);

        mark_completed(&pool, "/kb/a.txt", 7).await.unwrap();
        let doc = get_document(&pool, "/kb/a.txt").await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert_eq!(doc.chunk_count, 7);
        assert!(doc.processed_at.is_some());
        assert!(doc.error_message.is_none());
    }

    #[tokio::test]
    async fn failed_records_error_and_reset_clears_it() {
        let pool = test_pool().await;
        mark_processing(&pool, "/kb/b.pdf", "b.pdf", "pdf")
            .await
            .unwrap();
        mark_failed(&pool, "/kb/b.pdf", "no content extracted from document")
            .await
            .unwrap();

        let doc = get_document(&pool, "/kb/b.pdf").await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert_eq!(
            doc.error_message.as_deref(),
            Some("no content extracted from document")
        );

        // A later run resets the row without duplicating it
        mark_processing(&pool, "/kb/b.pdf", "b.pdf", "pdf")
            .await
            .unwrap();
        let doc = get_document(&pool, "/kb/b.pdf").await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Processing);
        assert!(doc.error_message.is_none());

        let all = list_documents(&pool).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn stats_count_completed_chunks_only() {
        let pool = test_pool().await;
        mark_processing(&pool, "/kb/a.txt", "a.txt", "txt")
            .await
            .unwrap();
        mark_completed(&pool, "/kb/a.txt", 5).await.unwrap();
        mark_processing(&pool, "/kb/b.pdf", "b.pdf", "pdf")
            .await
            .unwrap();
        mark_failed(&pool, "/kb/b.pdf", "parse error").await.unwrap();

        let s = stats(&pool, false).await.unwrap();
        assert_eq!(s.total_documents, 2);
        assert_eq!(s.total_chunks, 5);
        assert!(s.last_updated.is_some());
        assert!(!s.vector_store_exists);
    }
}
