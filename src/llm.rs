//! Language-model provider contract.
//!
//! `generate` submits a system instruction plus ordered conversation turns
//! and returns the model's reply text. Backends:
//! - `openai` — `POST /v1/chat/completions`, bearer key from `OPENAI_API_KEY`.
//! - `ollama` — `POST /api/chat` with `stream: false`.
//! - `mock` — offline stub that echoes the assembled system instruction, so
//!   development and tests can observe the grounding context in the reply.
//!
//! Failures surface as a single `anyhow` error; the responder decides what
//! the user sees. Same retry/backoff policy as the embedding providers.

use anyhow::{bail, Result};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::models::MessageRole;

/// One ordered turn submitted to the model, after the system instruction.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: MessageRole,
    pub content: String,
}

/// Generate a reply for `system` + `turns` using the configured provider.
pub async fn generate(config: &LlmConfig, system: &str, turns: &[ChatTurn]) -> Result<String> {
    match config.provider.as_str() {
        "openai" => generate_openai(config, system, turns).await,
        "ollama" => generate_ollama(config, system, turns).await,
        "mock" => Ok(mock_reply(system, turns)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

fn message_array(system: &str, turns: &[ChatTurn]) -> Vec<serde_json::Value> {
    let mut messages = Vec::with_capacity(turns.len() + 1);
    messages.push(serde_json::json!({ "role": "system", "content": system }));
    for turn in turns {
        messages.push(serde_json::json!({
            "role": turn.role.as_str(),
            "content": turn.content,
        }));
    }
    messages
}

async fn generate_openai(config: &LlmConfig, system: &str, turns: &[ChatTurn]) -> Result<String> {
    let api_key =
        std::env::var("OPENAI_API_KEY").map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("llm.model required"))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let body = serde_json::json!({
        "model": model,
        "temperature": config.temperature,
        "messages": message_array(system, turns),
    });

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return parse_openai_chat_response(&json);
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "OpenAI chat error {}: {}",
                        status,
                        body_text
                    ));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("OpenAI chat error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Chat completion failed after retries")))
}

fn parse_openai_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

async fn generate_ollama(config: &LlmConfig, system: &str, turns: &[ChatTurn]) -> Result<String> {
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("llm.model required"))?;
    let url = config.url.as_deref().unwrap_or("http://localhost:11434");

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let body = serde_json::json!({
        "model": model,
        "stream": false,
        "options": { "temperature": config.temperature },
        "messages": message_array(system, turns),
    });

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post(format!("{}/api/chat", url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return json
                        .get("message")
                        .and_then(|m| m.get("content"))
                        .and_then(|c| c.as_str())
                        .map(|s| s.to_string())
                        .ok_or_else(|| {
                            anyhow::anyhow!("Invalid Ollama response: missing message.content")
                        });
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "Ollama chat error {}: {}",
                        status,
                        body_text
                    ));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("Ollama chat error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    url,
                    e
                ));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Ollama chat failed after retries")))
}

fn mock_reply(system: &str, turns: &[ChatTurn]) -> String {
    let last_user = turns
        .iter()
        .rev()
        .find(|t| t.role == MessageRole::User)
        .map(|t| t.content.as_str())
        .unwrap_or_default();
    format!("[mock] pertanyaan: {}\n\n{}", last_user, system)
}
