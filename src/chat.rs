//! Chat session and message management.
//!
//! Owns the session/message lifecycle: creation with a welcome message,
//! append-only message storage, title derivation from the first user
//! message, history reconstruction for the responder, and cascading
//! deletion. Absent sessions are `None` at this layer; the surface decides
//! whether that is a 404.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{ChatMessage, ChatSession, MessageRole};
use crate::rag::WELCOME_MESSAGE;

/// Derived titles are truncated to this many characters, plus "...".
const TITLE_MAX_CHARS: usize = 50;

/// Create a session with a fresh opaque token and the fixed assistant
/// welcome message as its first turn.
pub async fn create_session(pool: &SqlitePool, user_id: Option<i64>) -> Result<ChatSession> {
    let session_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();

    let result = sqlx::query(
        "INSERT INTO chat_sessions (session_id, user_id, title, created_at, updated_at)
         VALUES (?, ?, 'New Chat', ?, ?)",
    )
    .bind(&session_id)
    .bind(user_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    let session = ChatSession {
        id: result.last_insert_rowid(),
        session_id,
        user_id,
        title: "New Chat".to_string(),
        created_at: now,
        updated_at: now,
    };

    append_message(pool, &session, MessageRole::Assistant, WELCOME_MESSAGE).await?;

    Ok(session)
}

pub async fn get_session(pool: &SqlitePool, session_id: &str) -> Result<Option<ChatSession>> {
    let row = sqlx::query(
        "SELECT id, session_id, user_id, title, created_at, updated_at
         FROM chat_sessions WHERE session_id = ?",
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(row_to_session))
}

/// Sessions ordered most-recently-updated first. With a `user_id`, only that
/// owner's sessions are returned.
pub async fn list_sessions(
    pool: &SqlitePool,
    user_id: Option<i64>,
    skip: i64,
    limit: i64,
) -> Result<Vec<ChatSession>> {
    let rows = match user_id {
        Some(uid) => {
            sqlx::query(
                "SELECT id, session_id, user_id, title, created_at, updated_at
                 FROM chat_sessions WHERE user_id = ?
                 ORDER BY updated_at DESC, id DESC LIMIT ? OFFSET ?",
            )
            .bind(uid)
            .bind(limit)
            .bind(skip)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                "SELECT id, session_id, user_id, title, created_at, updated_at
                 FROM chat_sessions
                 ORDER BY updated_at DESC, id DESC LIMIT ? OFFSET ?",
            )
            .bind(limit)
            .bind(skip)
            .fetch_all(pool)
            .await?
        }
    };

    Ok(rows.iter().map(row_to_session).collect())
}

/// All messages of a session in chronological order. Unknown session ⇒ empty.
pub async fn session_messages(pool: &SqlitePool, session_id: &str) -> Result<Vec<ChatMessage>> {
    let session = match get_session(pool, session_id).await? {
        Some(s) => s,
        None => return Ok(Vec::new()),
    };

    let rows = sqlx::query(
        "SELECT id, session_id, role, content, created_at
         FROM chat_messages WHERE session_id = ?
         ORDER BY created_at ASC, id ASC",
    )
    .bind(session.id)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_message).collect())
}

/// Append one message. On the first user message of the session the title is
/// derived from the content (truncated, never overwritten later). The
/// session's updated timestamp is always bumped.
pub async fn append_message(
    pool: &SqlitePool,
    session: &ChatSession,
    role: MessageRole,
    content: &str,
) -> Result<ChatMessage> {
    let now = chrono::Utc::now().timestamp();

    if role == MessageRole::User {
        let prior_user_messages: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chat_messages WHERE session_id = ? AND role = 'user'",
        )
        .bind(session.id)
        .fetch_one(pool)
        .await?;

        if prior_user_messages == 0 {
            sqlx::query("UPDATE chat_sessions SET title = ? WHERE id = ?")
                .bind(derive_title(content))
                .bind(session.id)
                .execute(pool)
                .await?;
        }
    }

    let result = sqlx::query(
        "INSERT INTO chat_messages (session_id, role, content, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(session.id)
    .bind(role.as_str())
    .bind(content)
    .bind(now)
    .execute(pool)
    .await?;

    sqlx::query("UPDATE chat_sessions SET updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(session.id)
        .execute(pool)
        .await?;

    Ok(ChatMessage {
        id: result.last_insert_rowid(),
        session_id: session.id,
        role,
        content: content.to_string(),
        created_at: now,
    })
}

/// Reconstruct the session history as (user, assistant) pairs.
///
/// Deterministic left-to-right scan: each user message is held until the
/// next assistant message confirms the pair. Unmatched turns are skipped —
/// a trailing unanswered user message, an assistant message with no pending
/// user message, or an earlier user message displaced by a consecutive one.
/// The result is usable as few-shot context; it is not a full transcript.
pub async fn reconstruct_history(
    pool: &SqlitePool,
    session_id: &str,
) -> Result<Vec<(String, String)>> {
    let messages = session_messages(pool, session_id).await?;

    let mut history = Vec::new();
    let mut pending_user: Option<String> = None;

    for msg in messages {
        match msg.role {
            MessageRole::User => pending_user = Some(msg.content),
            MessageRole::Assistant => {
                if let Some(user_text) = pending_user.take() {
                    history.push((user_text, msg.content));
                }
            }
            MessageRole::System => {}
        }
    }

    Ok(history)
}

/// Delete a session and all of its messages in one transaction.
/// Returns false if the session does not exist.
pub async fn delete_session(pool: &SqlitePool, session_id: &str) -> Result<bool> {
    let session = match get_session(pool, session_id).await? {
        Some(s) => s,
        None => return Ok(false),
    };

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM chat_messages WHERE session_id = ?")
        .bind(session.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM chat_sessions WHERE id = ?")
        .bind(session.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(true)
}

fn derive_title(content: &str) -> String {
    if content.chars().count() > TITLE_MAX_CHARS {
        let truncated: String = content.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", truncated)
    } else {
        content.to_string()
    }
}

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> ChatSession {
    ChatSession {
        id: row.get("id"),
        session_id: row.get("session_id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> ChatMessage {
    let role_str: String = row.get("role");
    ChatMessage {
        id: row.get("id"),
        session_id: row.get("session_id"),
        role: MessageRole::parse(&role_str).unwrap_or(MessageRole::System),
        content: row.get("content"),
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
    async fn new_session_starts_with_welcome_message() {
        let pool = test_pool().await;
        let session = create_session(&pool, None).await.unwrap();
        assert_eq!(session.title, "New Chat");

        let messages = session_messages(&pool, &session.session_id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::Assistant);
        assert_eq!(messages[0].content, WELCOME_MESSAGE);
    }

    #[tokio::test]
    async fn first_user_message_sets_truncated_title() {
        let pool = test_pool().await;
        let session = create_session(&pool, None).await.unwrap();

        let long = "x".repeat(80);
        append_message(&pool, &session, MessageRole::User, &long)
            .await
            .unwrap();

        let stored = get_session(&pool, &session.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.title.chars().count(), 53);
        assert_eq!(stored.title, format!("{}...", "x".repeat(50)));

        // A second user message never changes the title
        append_message(&pool, &session, MessageRole::Assistant, "jawaban")
            .await
            .unwrap();
        append_message(&pool, &session, MessageRole::User, "pertanyaan kedua")
            .await
            .unwrap();
        let stored = get_session(&pool, &session.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.title, format!("{}...", "x".repeat(50)));
    }

    #[tokio::test]
    async fn short_first_message_is_title_verbatim() {
        let pool = test_pool().await;
        let session = create_session(&pool, None).await.unwrap();
        append_message(&pool, &session, MessageRole::User, "Bagaimana cara menanam bayam?")
            .await
            .unwrap();
        let stored = get_session(&pool, &session.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.title, "Bagaimana cara menanam bayam?");
    }

    #[tokio::test]
    async fn history_pairs_drop_unanswered_trailing_user_message() {
        let pool = test_pool().await;
        let session = create_session(&pool, None).await.unwrap();

        append_message(&pool, &session, MessageRole::User, "A")
            .await
            .unwrap();
        append_message(&pool, &session, MessageRole::Assistant, "B")
            .await
            .unwrap();
        append_message(&pool, &session, MessageRole::User, "C")
            .await
            .unwrap();

        let history = reconstruct_history(&pool, &session.session_id)
            .await
            .unwrap();
        assert_eq!(history, vec![("A".to_string(), "B".to_string())]);
    }

    #[tokio::test]
    async fn consecutive_user_messages_keep_only_the_latest() {
        let pool = test_pool().await;
        let session = create_session(&pool, None).await.unwrap();

        append_message(&pool, &session, MessageRole::User, "pertama")
            .await
            .unwrap();
        append_message(&pool, &session, MessageRole::User, "kedua")
            .await
            .unwrap();
        append_message(&pool, &session, MessageRole::Assistant, "jawaban")
            .await
            .unwrap();

        let history = reconstruct_history(&pool, &session.session_id)
            .await
            .unwrap();
        assert_eq!(history, vec![("kedua".to_string(), "jawaban".to_string())]);
    }

    #[tokio::test]
    async fn delete_cascades_to_messages() {
        let pool = test_pool().await;
        let session = create_session(&pool, None).await.unwrap();
        append_message(&pool, &session, MessageRole::User, "halo")
            .await
            .unwrap();

        assert!(delete_session(&pool, &session.session_id).await.unwrap());
        assert!(get_session(&pool, &session.session_id)
            .await
            .unwrap()
            .is_none());

        let orphans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(orphans, 0);

        // Deleting again reports absence
        assert!(!delete_session(&pool, &session.session_id).await.unwrap());
    }

    #[tokio::test]
    async fn list_sessions_orders_by_recent_update_and_filters_owner() {
        let pool = test_pool().await;
        let a = create_session(&pool, Some(1)).await.unwrap();
        let b = create_session(&pool, Some(1)).await.unwrap();
        let _other = create_session(&pool, Some(2)).await.unwrap();

        // Force distinct update times
        sqlx::query("UPDATE chat_sessions SET updated_at = 100 WHERE id = ?")
            .bind(a.id)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("UPDATE chat_sessions SET updated_at = 200 WHERE id = ?")
            .bind(b.id)
            .execute(&pool)
            .await
            .unwrap();

        let sessions = list_sessions(&pool, Some(1), 0, 20).await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_id, b.session_id);
        assert_eq!(sessions[1].session_id, a.session_id);
    }
}
