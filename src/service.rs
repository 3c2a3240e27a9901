//! Process-wide assistant service.
//!
//! Built once at startup: opens the SQLite pool, applies migrations, and
//! restores the vector index from its persisted artifact. Cloning is cheap;
//! the HTTP surface and the CLI both operate through this object.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::index::{SharedIndex, VectorIndex};
use crate::ingest;
use crate::ledger;
use crate::migrate;
use crate::models::{ChatOutcome, IngestSummary, KnowledgeBaseStats, ScoredPassage};
use crate::rag;

#[derive(Clone)]
pub struct Assistant {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub index: SharedIndex,
}

impl Assistant {
    /// Open the database, run migrations, and restore the vector index.
    pub async fn init(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::run_migrations(&pool).await?;

        let index = VectorIndex::load(&config.vector_store.path);
        info!(
            entries = index.len(),
            path = %config.vector_store.path.display(),
            "vector index restored"
        );

        Ok(Self {
            config: Arc::new(config),
            pool,
            index: Arc::new(RwLock::new(index)),
        })
    }

    /// Ingest every supported file under the knowledge-base root.
    pub async fn process_knowledge_base(&self, force: bool) -> Result<IngestSummary> {
        ingest::process_knowledge_base(&self.config, &self.pool, &self.index, force).await
    }

    /// Run one chat turn against the retrieval-augmented responder.
    pub async fn send_message(
        &self,
        session_id: Option<&str>,
        message: &str,
        user_id: Option<i64>,
    ) -> Result<ChatOutcome> {
        rag::answer(self, session_id, message, user_id).await
    }

    /// Similarity search over the indexed passages, best match first.
    ///
    /// The query is embedded before the index lock is taken, so a slow
    /// embedding provider never holds the lock against ingestion's writer.
    /// An empty store short-circuits without embedding at all.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredPassage>> {
        if self.index.read().await.is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = embedding::embed_query(&self.config.embedding, query).await?;
        Ok(self.index.read().await.top_k(&query_vec, k))
    }

    /// Ledger totals plus whether the index artifact is on disk.
    pub async fn stats(&self) -> Result<KnowledgeBaseStats> {
        let artifact_exists = self.index.read().await.artifact_exists();
        ledger::stats(&self.pool, artifact_exists).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;
    use crate::models::Passage;
    use std::path::Path;

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

    #[tokio::test]
    async fn search_on_empty_store_skips_embedding() {
        let tmp = tempfile::tempdir().unwrap();
        // Provider disabled: any embedding attempt would error, so an empty
        // result proves the store is checked before the query is embedded.
        let service = Assistant::init(test_config(tmp.path(), "disabled"))
            .await
            .unwrap();

        let hits = service.search("bayam", 4).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn search_ranks_the_matching_passage_first() {
        let tmp = tempfile::tempdir().unwrap();
        let service = Assistant::init(test_config(tmp.path(), "mock"))
            .await
            .unwrap();

        {
            let mut index = service.index.write().await;
            index
                .rebuild(
                    &service.config.embedding,
                    &[
                        Passage {
                            text: "Bayam dipanen 25 hari setelah tanam.".to_string(),
                            source: "/kb/bayam.txt".to_string(),
                            filename: "bayam.txt".to_string(),
                        },
                        Passage {
                            text: "Hidroponik memakai larutan nutrisi.".to_string(),
                            source: "/kb/hidroponik.txt".to_string(),
                            filename: "hidroponik.txt".to_string(),
                        },
                    ],
                )
                .await
                .unwrap();
        }

        // An identical query embeds to an identical vector under the mock
        // provider, so its own passage must rank first with a perfect score.
        let hits = service
            .search("Bayam dipanen 25 hari setelah tanam.", 2)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].filename, "bayam.txt");
        assert!(hits[0].score > hits[1].score);
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn search_with_failing_provider_errors_on_populated_store() {
        let tmp = tempfile::tempdir().unwrap();
        let service = Assistant::init(test_config(tmp.path(), "mock"))
            .await
            .unwrap();

        {
            let mut index = service.index.write().await;
            index
                .rebuild(
                    &service.config.embedding,
                    &[Passage {
                        text: "Cabai butuh sinar matahari penuh.".to_string(),
                        source: "/kb/cabai.txt".to_string(),
                        filename: "cabai.txt".to_string(),
                    }],
                )
                .await
                .unwrap();
        }

        let broken = Assistant {
            config: std::sync::Arc::new(test_config(tmp.path(), "disabled")),
            pool: service.pool.clone(),
            index: service.index.clone(),
        };
        assert!(broken.search("cabai", 4).await.is_err());
    }
}
