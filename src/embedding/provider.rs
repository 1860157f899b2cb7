//! HTTP embedding providers.
//!
//! Each provider turns text into a vector by calling an external service.
//! Providers never fall back on their own; the [`super::ProviderChain`]
//! orders them and falls back to the local generator when all of them fail.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Errors raised by an external embedding provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Request to embedding provider failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Embedding provider '{provider}' timed out after {ms}ms")]
    Timeout { provider: &'static str, ms: u64 },

    #[error("Embedding provider '{provider}' returned {status}: {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("Embedding provider '{provider}' returned an invalid response: {reason}")]
    InvalidResponse {
        provider: &'static str,
        reason: String,
    },

    #[error(
        "Embedding provider '{0}' is not configured\nSuggestion: Set the provider credentials in .ragstore/settings.toml or the environment"
    )]
    NotConfigured(String),
}

/// A remote text-to-vector service.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable provider name, recorded in record metadata.
    fn name(&self) -> &'static str;

    /// Embeds a batch of texts, one vector per input.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// Embeds a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let batch = self.embed_batch(&[text.to_string()]).await?;
        batch
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse {
                provider: self.name(),
                reason: "no embedding returned".to_string(),
            })
    }
}

async fn error_for_status(
    provider: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Api {
        provider,
        status: status.as_u16(),
        body,
    })
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// OpenAI embeddings API.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiProvider {
    /// # Errors
    /// Returns [`ProviderError::NotConfigured`] for an empty API key.
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured("openai".to_string()));
        }
        Ok(Self {
            client: http_client(timeout)?,
            api_key,
            model: model.into(),
            endpoint: OPENAI_EMBEDDINGS_URL.to_string(),
        })
    }

    /// Points the provider at an OpenAI-compatible endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn parse(body: serde_json::Value, expected: usize) -> Result<Vec<Vec<f32>>, ProviderError> {
        #[derive(Deserialize)]
        struct EmbeddingResponse {
            data: Vec<EmbeddingData>,
        }

        #[derive(Deserialize)]
        struct EmbeddingData {
            embedding: Vec<f32>,
        }

        let parsed: EmbeddingResponse =
            serde_json::from_value(body).map_err(|e| ProviderError::InvalidResponse {
                provider: "openai",
                reason: e.to_string(),
            })?;
        if parsed.data.len() != expected {
            return Err(ProviderError::InvalidResponse {
                provider: "openai",
                reason: format!("expected {expected} embeddings, got {}", parsed.data.len()),
            });
        }
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "input": texts,
            }))
            .send()
            .await?;
        let response = error_for_status(self.name(), response).await?;
        let body: serde_json::Value = response.json().await?;
        Self::parse(body, texts.len())
    }
}

/// Ollama embeddings API on a local or remote Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaProvider {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into(),
            model: model.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embeddings", self.base_url.trim_end_matches('/'))
    }

    fn parse(body: &serde_json::Value) -> Result<Vec<f32>, ProviderError> {
        body.get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| ProviderError::InvalidResponse {
                provider: "ollama",
                reason: "missing 'embedding' array".to_string(),
            })?
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| ProviderError::InvalidResponse {
                        provider: "ollama",
                        reason: format!("non-numeric component {v}"),
                    })
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            let response = self
                .client
                .post(self.endpoint())
                .json(&json!({
                    "model": self.model,
                    "prompt": text,
                }))
                .send()
                .await?;
            let response = error_for_status(self.name(), response).await?;
            let body: serde_json::Value = response.json().await?;
            embeddings.push(Self::parse(&body)?);
        }
        Ok(embeddings)
    }
}
