//! Core data types used throughout the assistant engine.
//!
//! These types represent the documents, passages, sessions, and messages that
//! flow through the ingestion pipeline and the chat engine.

use serde::Serialize;

/// Processing state of one knowledge-base file, tracked in the ledger.
///
/// Transitions within one ingestion run are monotonic:
/// `processing -> completed | failed`. A `completed` document is skipped on
/// later runs unless force-reprocess is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DocumentStatus::Pending),
            "processing" => Some(DocumentStatus::Processing),
            "completed" => Some(DocumentStatus::Completed),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }
}

/// One row per source file ever seen by the ingestion pipeline.
/// Keyed by `file_path`; never deleted by the engine itself.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedDocument {
    pub file_path: String,
    pub filename: String,
    pub file_type: String,
    pub chunk_count: i64,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
    pub processed_at: Option<i64>,
    pub created_at: i64,
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            "system" => Some(MessageRole::System),
            _ => None,
        }
    }
}

/// A durable conversation thread, addressed externally by its opaque
/// `session_id` token rather than the internal row id.
#[derive(Debug, Clone, Serialize)]
pub struct ChatSession {
    pub id: i64,
    pub session_id: String,
    pub user_id: Option<i64>,
    pub title: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One turn of a conversation. Append-only; ordered by (created_at, id).
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub id: i64,
    pub session_id: i64,
    pub role: MessageRole,
    pub content: String,
    pub created_at: i64,
}

/// Raw text produced by the document loader for one file, before chunking.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub text: String,
    pub source: String,
    pub filename: String,
}

/// A bounded span of source text, the unit stored in and retrieved from the
/// vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub text: String,
    pub source: String,
    pub filename: String,
}

/// A passage returned from similarity search, with its cosine score.
#[derive(Debug, Clone)]
pub struct ScoredPassage {
    pub text: String,
    pub filename: String,
    pub score: f32,
}

/// Result of one "process knowledge base" run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub success: bool,
    pub message: String,
    pub processed: u64,
    pub failed: u64,
    pub total_chunks: u64,
}

/// Aggregate view of the ledger and the persisted index artifact.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeBaseStats {
    pub total_documents: i64,
    pub total_chunks: i64,
    pub vector_store_exists: bool,
    pub last_updated: Option<i64>,
}

/// Outcome of one responder turn.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub session: ChatSession,
    pub message: ChatMessage,
    pub is_new_session: bool,
}
