//! Persisted vector index.
//!
//! Holds (embedding, text, source) entries in memory and persists them as a
//! single JSON artifact. The artifact is written via temp-file-plus-rename,
//! so a half-written index can never be observed: embedding failures during
//! `rebuild`/`extend` leave both the in-memory entries and the last saved
//! artifact untouched.
//!
//! The index is shared process-wide as [`SharedIndex`]; ingestion holds the
//! write lock across mutate-then-save, chat searches take read locks.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::embedding;
use crate::models::{Passage, ScoredPassage};

pub type SharedIndex = Arc<RwLock<VectorIndex>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    text: String,
    source: String,
    filename: String,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Artifact {
    entries: Vec<IndexEntry>,
}

#[derive(Debug)]
pub struct VectorIndex {
    path: PathBuf,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Restore the persisted index from `path`. A missing artifact is not an
    /// error — the store starts empty. An unreadable artifact is logged and
    /// also starts empty; the next full rebuild replaces it.
    pub fn load(path: &Path) -> Self {
        let entries = match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<Artifact>(&bytes) {
                Ok(artifact) => artifact.entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "vector index artifact unreadable, starting empty");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a persisted artifact exists at the configured location.
    pub fn artifact_exists(&self) -> bool {
        self.path.exists()
    }

    /// Discard existing entries and index `passages` from scratch.
    /// On embedding failure the previous entries are kept.
    pub async fn rebuild(&mut self, config: &EmbeddingConfig, passages: &[Passage]) -> Result<()> {
        let fresh = embed_passages(config, passages)
            .await
            .context("index rebuild failed")?;
        self.entries = fresh;
        Ok(())
    }

    /// Embed and append `passages` without discarding prior content.
    /// On embedding failure no entry is appended.
    pub async fn extend(&mut self, config: &EmbeddingConfig, passages: &[Passage]) -> Result<()> {
        let mut fresh = embed_passages(config, passages)
            .await
            .context("index extend failed")?;
        self.entries.append(&mut fresh);
        Ok(())
    }

    /// Persist the current entries. Writes to a temp file in the same
    /// directory, then renames over the artifact, so the previous artifact
    /// survives any mid-write failure.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let artifact = Artifact {
            entries: self.entries.clone(),
        };
        let bytes = serde_json::to_vec(&artifact)?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &bytes)
            .with_context(|| format!("Failed to write index artifact: {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace index artifact: {}", self.path.display()))?;

        Ok(())
    }

    /// Return the `k` entries most similar to `query_vec` by cosine score,
    /// best first. Read-only; an empty store yields an empty result.
    pub fn top_k(&self, query_vec: &[f32], k: usize) -> Vec<ScoredPassage> {
        let mut scored: Vec<ScoredPassage> = self
            .entries
            .iter()
            .map(|entry| ScoredPassage {
                text: entry.text.clone(),
                filename: entry.filename.clone(),
                score: embedding::cosine_similarity(query_vec, &entry.embedding),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        scored
    }

}

async fn embed_passages(config: &EmbeddingConfig, passages: &[Passage]) -> Result<Vec<IndexEntry>> {
    let mut entries = Vec::with_capacity(passages.len());

    for batch in passages.chunks(config.batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
        let vectors = embedding::embed_texts(config, &texts).await?;
        if vectors.len() != batch.len() {
            anyhow::bail!(
                "Embedding provider returned {} vectors for {} passages",
                vectors.len(),
                batch.len()
            );
        }
        for (passage, vector) in batch.iter().zip(vectors) {
            entries.push(IndexEntry {
                text: passage.text.clone(),
                source: passage.source.clone(),
                filename: passage.filename.clone(),
                embedding: vector,
            });
        }
    }

    Ok(entries)
}
