//! Knowledge-base ingestion pipeline.
//!
//! Orchestrates the batch flow: scan the knowledge-base directory, track
//! per-file status in the ledger, load and chunk each candidate, then embed
//! and index the accumulated passages in one step. One file's failure never
//! aborts the run; an index-build failure aborts only the indexing step and
//! leaves the persisted artifact at its last good state.

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::PathBuf;
use tracing::{error, info};
use walkdir::WalkDir;

use crate::chunk;
use crate::config::Config;
use crate::index::SharedIndex;
use crate::ledger;
use crate::loader;
use crate::models::{DocumentStatus, IngestSummary, Passage};

/// Process every supported file under the knowledge-base root.
///
/// With `force` set, previously completed documents are re-read and the
/// whole index is rebuilt from scratch; otherwise completed documents are
/// skipped (zero loader and embedding work) and new passages extend the
/// existing index.
pub async fn process_knowledge_base(
    config: &Config,
    pool: &SqlitePool,
    index: &SharedIndex,
    force: bool,
) -> Result<IngestSummary> {
    let files = scan_knowledge_base(config)?;

    if files.is_empty() {
        return Ok(IngestSummary {
            success: false,
            message: "No documents found in knowledge base".to_string(),
            processed: 0,
            failed: 0,
            total_chunks: 0,
        });
    }

    let mut batch: Vec<Passage> = Vec::new();
    let mut processed = 0u64;
    let mut failed = 0u64;

    for (path, file_type) in &files {
        let file_path = path.display().to_string();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let existing = ledger::get_document(pool, &file_path).await?;
        if let Some(doc) = &existing {
            if doc.status == DocumentStatus::Completed && !force {
                info!(file = %file_path, "skipping already processed document");
                continue;
            }
        }

        ledger::mark_processing(pool, &file_path, &filename, file_type).await?;

        let documents = match loader::load(path) {
            Ok(docs) => docs,
            Err(loader::LoadError::UnsupportedFormat(_)) => Vec::new(),
            Err(e) => {
                error!(file = %file_path, error = %e, "document load failed");
                ledger::mark_failed(pool, &file_path, &e.to_string()).await?;
                failed += 1;
                continue;
            }
        };

        let passages = chunk::split_documents(
            &documents,
            config.chunking.chunk_size,
            config.chunking.overlap,
        );

        if passages.is_empty() {
            error!(file = %file_path, "no content extracted");
            ledger::mark_failed(pool, &file_path, "no content extracted from document").await?;
            failed += 1;
            continue;
        }

        ledger::mark_completed(pool, &file_path, passages.len() as i64).await?;
        processed += 1;
        batch.extend(passages);
    }

    let total_chunks = batch.len() as u64;

    if !batch.is_empty() {
        // Writer lock held across mutate-then-persist; searches keep reading
        // the last fully built state until this completes.
        let mut idx = index.write().await;
        let from_scratch = force || idx.is_empty();

        let build = if from_scratch {
            idx.rebuild(&config.embedding, &batch).await
        } else {
            idx.extend(&config.embedding, &batch).await
        };

        if let Err(e) = build.and_then(|_| idx.save()) {
            error!(error = %e, "vector index update failed");
            return Ok(IngestSummary {
                success: false,
                message: format!("Error updating vector index: {:#}", e),
                processed,
                failed,
                total_chunks: 0,
            });
        }

        info!(chunks = total_chunks, "vector index saved");
    }

    Ok(IngestSummary {
        success: true,
        message: format!("Processed {} documents, {} failed", processed, failed),
        processed,
        failed,
        total_chunks,
    })
}

/// Enumerate supported files under the knowledge-base root as
/// `(path, file_type)` pairs, in deterministic path order. The root is
/// created if absent. Also backs the HTTP file listing.
pub fn scan_knowledge_base(config: &Config) -> Result<Vec<(PathBuf, String)>> {
    let root = &config.knowledge_base.root;
    if !root.exists() {
        std::fs::create_dir_all(root)?;
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(file_type) = loader::supported_file_type(entry.path()) {
            files.push((entry.path().to_path_buf(), file_type));
        }
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;
    use crate::index::VectorIndex;
    use crate::migrate;
    use std::path::Path;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    fn test_config(root: &Path, embedding_provider: &str) -> Config {
        Config {
            db: DbConfig {
                path: root.join("petik.sqlite"),
            },
            knowledge_base: KnowledgeBaseConfig {
                root: root.join("knowledge_base"),
            },
            vector_store: VectorStoreConfig {
                path: root.join("vector_store/index.json"),
            },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig {
                provider: embedding_provider.to_string(),
                ..EmbeddingConfig::default()
            },
            llm: LlmConfig::default(),
            server: ServerConfig {
                bind: "127.0.0.1:0".to_string(),
            },
        }
    }

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

    fn shared_index(config: &Config) -> SharedIndex {
        Arc::new(RwLock::new(VectorIndex::load(&config.vector_store.path)))
    }

    #[tokio::test]
    async fn empty_knowledge_base_is_created_and_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path(), "mock");
        let pool = test_pool().await;
        let index = shared_index(&config);

        let summary = process_knowledge_base(&config, &pool, &index, false)
            .await
            .unwrap();
        assert!(!summary.success);
        assert!(config.knowledge_base.root.exists());
        assert_eq!(summary.processed, 0);
    }

    #[tokio::test]
    async fn corrupt_file_is_isolated_from_valid_file() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path(), "mock");
        let kb = &config.knowledge_base.root;
        std::fs::create_dir_all(kb).unwrap();
        std::fs::write(kb.join("bayam.txt"), "Bayam tumbuh baik di pot dangkal.").unwrap();
        std::fs::write(kb.join("rusak.pdf"), b"definitely not a pdf").unwrap();

        let pool = test_pool().await;
        let index = shared_index(&config);

        let summary = process_knowledge_base(&config, &pool, &index, false)
            .await
            .unwrap();
        assert!(summary.success);
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.failed, 1);
        assert!(summary.total_chunks >= 1);

        let docs = ledger::list_documents(&pool).await.unwrap();
        let completed = docs
            .iter()
            .filter(|d| d.status == DocumentStatus::Completed)
            .count();
        let failed = docs
            .iter()
            .filter(|d| d.status == DocumentStatus::Failed)
            .count();
        assert_eq!((completed, failed), (1, 1));

        // The valid file's passages made it into the index
        assert_eq!(index.read().await.len() as u64, summary.total_chunks);
        assert!(config.vector_store.path.exists());
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path(), "mock");
        let kb = &config.knowledge_base.root;
        std::fs::create_dir_all(kb).unwrap();
        std::fs::write(kb.join("kangkung.txt"), "Kangkung suka air.").unwrap();

        let pool = test_pool().await;
        let index = shared_index(&config);

        let first = process_knowledge_base(&config, &pool, &index, false)
            .await
            .unwrap();
        assert_eq!(first.processed, 1);
        let indexed = index.read().await.len();

        let second = process_knowledge_base(&config, &pool, &index, false)
            .await
            .unwrap();
        assert!(second.success);
        assert_eq!(second.processed, 0);
        assert_eq!(second.total_chunks, 0);
        assert_eq!(index.read().await.len(), indexed);
    }

    #[tokio::test]
    async fn force_reprocess_rebuilds_completed_documents() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path(), "mock");
        let kb = &config.knowledge_base.root;
        std::fs::create_dir_all(kb).unwrap();
        std::fs::write(kb.join("cabai.txt"), "Cabai butuh sinar matahari penuh.").unwrap();

        let pool = test_pool().await;
        let index = shared_index(&config);

        process_knowledge_base(&config, &pool, &index, false)
            .await
            .unwrap();
        let before = ledger::get_document(&pool, &kb.join("cabai.txt").display().to_string())
            .await
            .unwrap()
            .unwrap();

        let summary = process_knowledge_base(&config, &pool, &index, true)
            .await
            .unwrap();
        assert_eq!(summary.processed, 1);
        assert!(summary.total_chunks >= 1);

        let after = ledger::get_document(&pool, &kb.join("cabai.txt").display().to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.status, DocumentStatus::Completed);
        assert_eq!(after.chunk_count, before.chunk_count);
        assert_eq!(index.read().await.len() as i64, after.chunk_count);
    }

    #[tokio::test]
    async fn index_failure_keeps_statuses_and_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path(), "disabled");
        let kb = &config.knowledge_base.root;
        std::fs::create_dir_all(kb).unwrap();
        std::fs::write(kb.join("tomat.txt"), "Tomat perlu disiram teratur.").unwrap();

        let pool = test_pool().await;
        let index = shared_index(&config);

        let summary = process_knowledge_base(&config, &pool, &index, false)
            .await
            .unwrap();
        assert!(!summary.success);
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.total_chunks, 0);

        // Per-file statuses from this run stand
        let docs = ledger::list_documents(&pool).await.unwrap();
        assert_eq!(docs[0].status, DocumentStatus::Completed);
        // but no artifact was written
        assert!(!config.vector_store.path.exists());
    }
}
