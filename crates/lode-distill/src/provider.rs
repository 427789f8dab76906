//! Distillation provider trait and implementations.
//!
//! - `OpenAiDistiller` calls an OpenAI-compatible `/chat/completions` endpoint.
//! - `MockDistiller` answers deterministically from the passage text, with
//!   scripted overrides and call counting for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use lode_core::config::DistillConfig;
use lode_core::error::{LodeError, Result};
use lode_index::http;

/// Extracts the part of a passage that is relevant to a query.
///
/// Implementations are expected to answer with the canonical no-information
/// phrase when the passage has nothing relevant.
#[async_trait]
pub trait DistillationProvider: Send + Sync {
    async fn distill(&self, query: &str, passage: &str) -> Result<String>;
}

/// Instruction sent with every distillation request.
pub fn build_prompt(query: &str, passage: &str, no_info_phrase: &str) -> String {
    format!(
        "You are given a user query and a passage.\n\
         Task: extract only the information from the passage that helps answer the query.\n\
         Requirements:\n\
         - If the passage contains no relevant information, reply with exactly: {no_info_phrase}\n\
         - Otherwise write a concise distilled report using only facts stated in the passage.\n\
         - Do not invent facts or assumptions.\n\n\
         User query:\n{query}\n\nPassage:\n{passage}\n\nRespond now."
    )
}

// ---------------------------------------------------------------------------
// OpenAiDistiller - OpenAI-compatible chat completions
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

pub struct OpenAiDistiller {
    client: Client,
    url: String,
    model: String,
    api_key: String,
    no_info_phrase: String,
}

impl std::fmt::Debug for OpenAiDistiller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiDistiller")
            .field("url", &self.url)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiDistiller {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: impl Into<String>,
        no_info_phrase: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            url: http::endpoint(base_url, "chat/completions"),
            model: model.into(),
            api_key: api_key.into(),
            no_info_phrase: no_info_phrase.into(),
        }
    }

    /// Build from configuration, reading the API key from the environment.
    pub fn from_config(config: &DistillConfig) -> Result<Self> {
        let api_key = http::api_key_from_env(&config.api_key_env)?;
        let distiller = Self::new(
            &config.base_url,
            config.model.clone(),
            api_key,
            config.no_info.phrase.clone(),
        );
        info!(url = %distiller.url, model = %distiller.model, "Distillation provider configured");
        Ok(distiller)
    }
}

#[async_trait]
impl DistillationProvider for OpenAiDistiller {
    async fn distill(&self, query: &str, passage: &str) -> Result<String> {
        let prompt = build_prompt(query, passage, &self.no_info_phrase);
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&ChatRequest {
                model: &self.model,
                messages: vec![ChatMessage {
                    role: "user",
                    content: &prompt,
                }],
                temperature: 0.0,
            })
            .send()
            .await
            .map_err(http::request_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(http::status_error(status, &body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LodeError::provider(format!("invalid completion response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .ok_or_else(|| LodeError::provider("completion response contained no text"))
    }
}

// ---------------------------------------------------------------------------
// MockDistiller - deterministic offline distillation
// ---------------------------------------------------------------------------

/// Offline distiller.
///
/// Without a scripted answer, it returns the passage sentences that mention a
/// query word, or the no-information phrase when none do. Scripted answers,
/// failures, and delays are keyed by passage text.
#[derive(Debug, Default)]
pub struct MockDistiller {
    no_info_phrase: String,
    responses: HashMap<String, String>,
    failures: HashSet<String>,
    delays: HashMap<String, Duration>,
    calls: AtomicUsize,
    calls_by_passage: Mutex<HashMap<String, usize>>,
}

impl MockDistiller {
    pub fn new(no_info_phrase: impl Into<String>) -> Self {
        Self {
            no_info_phrase: no_info_phrase.into(),
            ..Self::default()
        }
    }

    pub fn with_response(mut self, passage: impl Into<String>, response: impl Into<String>) -> Self {
        self.responses.insert(passage.into(), response.into());
        self
    }

    pub fn with_failure(mut self, passage: impl Into<String>) -> Self {
        self.failures.insert(passage.into());
        self
    }

    pub fn with_delay(mut self, passage: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(passage.into(), delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, passage: &str) -> usize {
        self.calls_by_passage
            .lock()
            .map(|m| m.get(passage).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn record(&self, passage: &str) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut by_passage) = self.calls_by_passage.lock() {
            *by_passage.entry(passage.to_string()).or_insert(0) += 1;
        }
    }

    fn extract(&self, query: &str, passage: &str) -> String {
        let terms: Vec<String> = query
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() >= 3)
            .map(str::to_lowercase)
            .collect();

        let relevant: Vec<&str> = passage
            .split_inclusive(['.', '!', '?', '\n'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter(|s| {
                let lower = s.to_lowercase();
                terms.iter().any(|t| lower.contains(t.as_str()))
            })
            .collect();

        if relevant.is_empty() {
            self.no_info_phrase.clone()
        } else {
            relevant.join(" ")
        }
    }
}

#[async_trait]
impl DistillationProvider for MockDistiller {
    async fn distill(&self, query: &str, passage: &str) -> Result<String> {
        self.record(passage);

        if let Some(delay) = self.delays.get(passage).copied() {
            tokio::time::sleep(delay).await;
        }
        if self.failures.contains(passage) {
            return Err(LodeError::provider(format!(
                "scripted distillation failure for {:?}",
                passage
            )));
        }
        if let Some(response) = self.responses.get(passage) {
            return Ok(response.clone());
        }
        Ok(self.extract(query, passage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHRASE: &str = "there is no relevant information";

    #[test]
    fn test_prompt_carries_phrase_and_inputs() {
        let prompt = build_prompt("what are cats?", "cats are mammals", PHRASE);
        assert!(prompt.contains("reply with exactly: there is no relevant information"));
        assert!(prompt.contains("what are cats?"));
        assert!(prompt.contains("cats are mammals"));
    }

    #[tokio::test]
    async fn test_mock_extracts_matching_sentences() {
        let distiller = MockDistiller::new(PHRASE);
        let out = distiller
            .distill("mammal facts", "Cats are mammals. The sun is a star.")
            .await
            .unwrap();
        assert_eq!(out, "Cats are mammals.");
    }

    #[tokio::test]
    async fn test_mock_answers_phrase_when_irrelevant() {
        let distiller = MockDistiller::new(PHRASE);
        let out = distiller
            .distill("mammal", "The sun is a star.")
            .await
            .unwrap();
        assert_eq!(out, PHRASE);
    }

    #[tokio::test]
    async fn test_mock_scripted_overrides_and_counts() {
        let distiller = MockDistiller::new(PHRASE)
            .with_response("p1", "scripted")
            .with_failure("p2");

        assert_eq!(distiller.distill("q", "p1").await.unwrap(), "scripted");
        assert!(matches!(
            distiller.distill("q", "p2").await,
            Err(LodeError::Provider { .. })
        ));
        assert_eq!(distiller.calls(), 2);
        assert_eq!(distiller.calls_for("p1"), 1);
        assert_eq!(distiller.calls_for("p3"), 0);
    }

    #[test]
    fn test_chat_response_parsing() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"  facts  "}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("  facts  "));
    }
}
