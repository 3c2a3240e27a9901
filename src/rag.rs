//! Retrieval-augmented responder.
//!
//! Drives one chat turn end to end: resolve or create the session, persist
//! the user message, rebuild the recent history, retrieve grounding passages
//! from the vector index, assemble the system instruction, and call the
//! language model. Provider failures never reach the caller — retrieval
//! errors degrade to "no context available" and generation errors become a
//! fixed apology, both logged for operators.

use tracing::{error, warn};

use crate::chat;
use crate::llm::{self, ChatTurn};
use crate::models::{ChatOutcome, MessageRole};
use crate::service::Assistant;

/// Fixed assistant-authored greeting, the first message of every session.
pub const WELCOME_MESSAGE: &str = "Hai, Sobat Petik Sendiri 👋. Sekarang Anda terhubung dengan \
    PetikSendiri Asisten, asisten pintar yang bantu temukan info seputar urban farming. \
    Apa yang bisa saya bantu?";

/// Placeholder injected when retrieval produced nothing.
const NO_CONTEXT: &str = "Tidak ada konteks tersedia.";

/// Fixed user-visible reply when the language model fails.
const GENERATION_APOLOGY: &str =
    "Maaf, terjadi kesalahan saat memproses pertanyaan Anda. Silakan coba lagi.";

/// Persona and guardrail instruction. `{context}` is replaced with the
/// retrieved passages (or the no-context placeholder) each turn.
const SYSTEM_PROMPT: &str = "\
Kamu adalah PetikSendiri Assistant, asisten AI yang ahli dalam bidang urban farming dan tanaman.

ATURAN PENTING:
1. KECUALI untuk sapaan dan pertanyaan identitas, kamu HANYA boleh menjawab pertanyaan yang berkaitan dengan:
   - Urban farming (pertanian perkotaan)
   - Tanaman (cara menanam, merawat, panen, dll)
   - Hidroponik dan aquaponik
   - Berkebun di rumah/apartemen
   - Tips pertanian skala kecil
   - Jenis-jenis tanaman dan karakteristiknya
   - Hama dan penyakit tanaman
   - Pupuk dan nutrisi tanaman

2. KHUSUS untuk sapaan (\"Hai\", \"Halo\", \"Halo kak\", dll) dan pertanyaan identitas (\"Kamu siapa?\", \"Siapa kamu?\", \"Apa itu PetikSendiri?\", dll):
   - Jawab dengan ramah dan perkenalkan dirimu sebagai PetikSendiri Assistant
   - Jelaskan bahwa kamu adalah asisten AI yang siap membantu pertanyaan seputar urban farming dan tanaman
   - Ajak user untuk bertanya tentang urban farming

3. Jika pertanyaan TIDAK berkaitan dengan topik di atas DAN bukan sapaan/identitas, jawab dengan sopan:
   \"Maaf, saya hanya bisa membantu menjawab pertanyaan seputar urban farming dan tanaman. Silakan ajukan pertanyaan yang berkaitan dengan topik tersebut ya! 🌱\"

4. Gunakan bahasa Indonesia yang ramah dan mudah dipahami.

5. Jika ada konteks dari knowledge base, gunakan informasi tersebut untuk menjawab.

6. Selalu berikan jawaban yang informatif dan praktis.

7. BATASAN PANJANG JAWABAN: Jawab dengan SINGKAT dan PADAT, maksimal 50-80 kata. Kecuali jika user meminta penjelasan detail.

KONTEKS DARI KNOWLEDGE BASE:
{context}

Jika konteks kosong atau tidak relevan, jawab berdasarkan pengetahuanmu tentang urban farming.";

/// Run one chat turn. Resolves (or creates) the session, persists both the
/// user message and the assistant reply, and returns them with a flag
/// indicating whether the session is new.
pub async fn answer(
    service: &Assistant,
    session_id: Option<&str>,
    user_message: &str,
    user_id: Option<i64>,
) -> anyhow::Result<ChatOutcome> {
    // Unknown or missing session id means a fresh session
    let (session, is_new_session) = match session_id {
        Some(sid) => match chat::get_session(&service.pool, sid).await? {
            Some(existing) => (existing, false),
            None => (chat::create_session(&service.pool, user_id).await?, true),
        },
        None => (chat::create_session(&service.pool, user_id).await?, true),
    };

    chat::append_message(&service.pool, &session, MessageRole::User, user_message).await?;

    // The just-appended message is still unanswered, so greedy pairing
    // excludes it from the history.
    let history = chat::reconstruct_history(&service.pool, &session.session_id).await?;
    let keep = service.config.retrieval.history_turns;
    let recent = if history.len() > keep {
        &history[history.len() - keep..]
    } else {
        &history[..]
    };

    let context = retrieve_context(service, user_message).await;
    let system = SYSTEM_PROMPT.replace("{context}", context.as_deref().unwrap_or(NO_CONTEXT));

    let mut turns: Vec<ChatTurn> = Vec::with_capacity(recent.len() * 2 + 1);
    for (user_text, assistant_text) in recent {
        turns.push(ChatTurn {
            role: MessageRole::User,
            content: user_text.clone(),
        });
        turns.push(ChatTurn {
            role: MessageRole::Assistant,
            content: assistant_text.clone(),
        });
    }
    turns.push(ChatTurn {
        role: MessageRole::User,
        content: user_message.to_string(),
    });

    let reply = match llm::generate(&service.config.llm, &system, &turns).await {
        Ok(text) => text,
        Err(e) => {
            error!(session = %session.session_id, error = %e, "response generation failed");
            GENERATION_APOLOGY.to_string()
        }
    };

    let message =
        chat::append_message(&service.pool, &session, MessageRole::Assistant, &reply).await?;

    // Re-read so a freshly derived title is reflected in the outcome
    let session = chat::get_session(&service.pool, &session.session_id)
        .await?
        .unwrap_or(session);

    Ok(ChatOutcome {
        session,
        message,
        is_new_session,
    })
}

/// Retrieve top-k passages and format them as one attributed context block.
/// Any retrieval failure is logged and treated as "no context": a chat turn
/// never fails because retrieval did.
async fn retrieve_context(service: &Assistant, query: &str) -> Option<String> {
    let hits = match service.search(query, service.config.retrieval.top_k).await {
        Ok(hits) => hits,
        Err(e) => {
            warn!(error = %e, "context retrieval failed, continuing without context");
            return None;
        }
    };

    if hits.is_empty() {
        return None;
    }

    let blocks: Vec<String> = hits
        .iter()
        .map(|hit| format!("[Sumber: {}]\n{}", hit.filename, hit.text))
        .collect();

    Some(blocks.join("\n\n---\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;
    use crate::models::Passage;
    use crate::service::Assistant;
    use std::path::Path;

    fn test_config(root: &Path) -> Config {
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
                provider: "mock".to_string(),
                ..EmbeddingConfig::default()
            },
            llm: LlmConfig::default(),
            server: ServerConfig {
                bind: "127.0.0.1:0".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn empty_index_still_answers_with_placeholder() {
        let tmp = tempfile::tempdir().unwrap();
        let service = Assistant::init(test_config(tmp.path())).await.unwrap();

        let outcome = answer(&service, None, "Bagaimana cara menanam bayam?", None)
            .await
            .unwrap();

        assert!(outcome.is_new_session);
        assert_eq!(outcome.message.role, MessageRole::Assistant);
        // The mock model echoes the system instruction, which must carry the
        // no-context placeholder when the store was never populated.
        assert!(outcome.message.content.contains(NO_CONTEXT));
        assert_eq!(outcome.session.title, "Bagaimana cara menanam bayam?");
    }

    #[tokio::test]
    async fn grounded_answer_carries_source_attribution() {
        let tmp = tempfile::tempdir().unwrap();
        let service = Assistant::init(test_config(tmp.path())).await.unwrap();

        {
            let mut index = service.index.write().await;
            index
                .rebuild(
                    &service.config.embedding,
                    &[Passage {
                        text: "Bayam dapat dipanen 25 hari setelah tanam.".to_string(),
                        source: "/kb/bayam.txt".to_string(),
                        filename: "bayam.txt".to_string(),
                    }],
                )
                .await
                .unwrap();
        }

        let outcome = answer(&service, None, "Bagaimana cara menanam bayam?", None)
            .await
            .unwrap();
        assert!(outcome.message.content.contains("[Sumber: bayam.txt]"));
    }

    #[tokio::test]
    async fn disabled_embeddings_degrade_to_no_context() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = test_config(tmp.path());
        config.embedding = EmbeddingConfig::default(); // disabled
        let service = Assistant::init(config).await.unwrap();

        let outcome = answer(&service, None, "Apa itu hidroponik?", None)
            .await
            .unwrap();
        assert_eq!(outcome.message.role, MessageRole::Assistant);
        assert!(outcome.message.content.contains(NO_CONTEXT));
    }

    #[tokio::test]
    async fn existing_session_is_reused_and_history_grows() {
        let tmp = tempfile::tempdir().unwrap();
        let service = Assistant::init(test_config(tmp.path())).await.unwrap();

        let first = answer(&service, None, "Halo", None).await.unwrap();
        let second = answer(
            &service,
            Some(&first.session.session_id),
            "Bagaimana menanam cabai?",
            None,
        )
        .await
        .unwrap();

        assert!(!second.is_new_session);
        assert_eq!(second.session.session_id, first.session.session_id);
        // Title still comes from the first user message
        assert_eq!(second.session.title, "Halo");

        let history = chat::reconstruct_history(&service.pool, &first.session.session_id)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].0, "Halo");
    }

    #[tokio::test]
    async fn unknown_session_id_creates_a_new_session() {
        let tmp = tempfile::tempdir().unwrap();
        let service = Assistant::init(test_config(tmp.path())).await.unwrap();

        let outcome = answer(&service, Some("does-not-exist"), "Halo", None)
            .await
            .unwrap();
        assert!(outcome.is_new_session);
        assert_ne!(outcome.session.session_id, "does-not-exist");
    }
}
