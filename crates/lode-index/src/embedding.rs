//! Embedding service trait and implementations.
//!
//! - `OpenAiEmbedding` calls an OpenAI-compatible `/embeddings` endpoint.
//!   This is the production embedding backend.
//! - `MockEmbedding` provides deterministic hashed-trigram vectors.
//! - `ScriptedEmbedding` returns table-driven vectors and counts calls, for
//!   tests that need exact geometry or forced failures.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use lode_core::config::EmbeddingConfig;
use lode_core::error::{LodeError, Result};

use crate::http;

/// Service for generating text embeddings.
///
/// Implementations convert text into fixed-dimensional vectors that capture
/// semantic meaning. Used for ingestion, queries, and the no-information check.
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>>> + Send;
}

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// A blanket implementation is provided so that every `EmbeddingService`
/// automatically implements `DynEmbeddingService`.
pub trait DynEmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text (boxed future).
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>>> + Send + 'a>>;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>>> + Send + 'a>> {
        Box::pin(self.embed(text))
    }
}

/// Embed `text`, treating an elapsed `timeout` as a transient provider failure.
pub async fn embed_with_timeout(
    embedder: &dyn DynEmbeddingService,
    text: &str,
    timeout: Duration,
) -> Result<Vec<f32>> {
    match tokio::time::timeout(timeout, embedder.embed_boxed(text)).await {
        Ok(result) => result,
        Err(_) => Err(LodeError::Timeout {
            operation: "embedding".to_string(),
            secs: timeout.as_secs(),
        }),
    }
}

// ---------------------------------------------------------------------------
// OpenAiEmbedding - OpenAI-compatible HTTP API
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Embedding service backed by an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedding {
    client: Client,
    url: String,
    model: String,
    api_key: String,
}

impl std::fmt::Debug for OpenAiEmbedding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbedding")
            .field("url", &self.url)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiEmbedding {
    pub fn new(base_url: &str, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: http::endpoint(base_url, "embeddings"),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    /// Build from configuration, reading the API key from the environment.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = http::api_key_from_env(&config.api_key_env)?;
        let service = Self::new(&config.base_url, config.model.clone(), api_key);
        info!(url = %service.url, model = %service.model, "Embedding provider configured");
        Ok(service)
    }
}

impl EmbeddingService for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .map_err(http::request_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(http::status_error(status, &body));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| LodeError::provider(format!("invalid embedding response: {}", e)))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| LodeError::provider("embedding response contained no vector"))
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic hashed-trigram vectors
// ---------------------------------------------------------------------------

/// Mock embedding service that returns deterministic unit vectors.
///
/// Each alphanumeric token contributes its character trigrams to hashed
/// buckets, so texts that share vocabulary ("mammal", "mammals") land close
/// together while unrelated texts are near-orthogonal.
#[derive(Debug, Clone)]
pub struct MockEmbedding {
    dimensions: usize,
}

impl MockEmbedding {
    pub fn new() -> Self {
        Self::with_dimensions(384)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn grams(text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        let mut grams = Vec::new();
        for token in lowered.split(|c: char| !c.is_alphanumeric()) {
            let chars: Vec<char> = token.chars().collect();
            if chars.is_empty() {
                continue;
            }
            if chars.len() < 3 {
                grams.push(token.to_string());
                continue;
            }
            for window in chars.windows(3) {
                grams.push(window.iter().collect());
            }
        }
        if grams.is_empty() {
            grams.push(lowered.trim().to_string());
        }
        grams
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        let mut result = vec![0.0f32; self.dimensions];
        for gram in Self::grams(text) {
            let mut hasher = DefaultHasher::new();
            gram.hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimensions as u64) as usize;
            result[bucket] += 1.0;
        }

        let norm: f32 = result.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut result {
                *val /= norm;
            }
        }
        result
    }
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingService for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(LodeError::provider("Cannot embed empty text"));
        }
        Ok(self.hash_to_vector(text))
    }
}

// ---------------------------------------------------------------------------
// ScriptedEmbedding - table-driven vectors with call accounting
// ---------------------------------------------------------------------------

/// Embedding service that answers from a fixed table.
///
/// Unknown texts fail permanently. Every call is counted, including failed
/// ones, so tests can assert that a provider was or was not consulted.
#[derive(Debug, Default)]
pub struct ScriptedEmbedding {
    vectors: HashMap<String, Vec<f32>>,
    failures: HashMap<String, bool>,
    delays: HashMap<String, Duration>,
    calls: AtomicUsize,
    calls_by_text: Mutex<HashMap<String, usize>>,
}

impl ScriptedEmbedding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.into(), vector);
        self
    }

    /// Make calls for `text` fail; `transient` controls the error class.
    pub fn with_failure(mut self, text: impl Into<String>, transient: bool) -> Self {
        self.failures.insert(text.into(), transient);
        self
    }

    /// Delay the answer for `text`, to exercise timeouts.
    pub fn with_delay(mut self, text: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(text.into(), delay);
        self
    }

    /// Total number of embed calls made.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of embed calls made for exactly `text`.
    pub fn calls_for(&self, text: &str) -> usize {
        self.calls_by_text
            .lock()
            .map(|m| m.get(text).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Whether `text` was ever submitted.
    pub fn was_called_with(&self, text: &str) -> bool {
        self.calls_for(text) > 0
    }

    fn record(&self, text: &str) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut by_text) = self.calls_by_text.lock() {
            *by_text.entry(text.to_string()).or_insert(0) += 1;
        }
    }
}

impl EmbeddingService for ScriptedEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.record(text);

        if let Some(delay) = self.delays.get(text).copied() {
            tokio::time::sleep(delay).await;
        }

        if let Some(&transient) = self.failures.get(text) {
            let message = format!("scripted failure for {:?}", text);
            return Err(if transient {
                LodeError::transient(message)
            } else {
                LodeError::provider(message)
            });
        }

        self.vectors
            .get(text)
            .cloned()
            .ok_or_else(|| LodeError::provider(format!("no scripted vector for {:?}", text)))
    }
}
