use async_trait::async_trait;
use serde::Deserialize;

use crate::config::EmbeddingSettings;
use crate::error::{InferError, Result};

/// Anything that can turn one string into one vector.
///
/// Failures are reported as errors; callers on the indexing path treat them
/// as "no embedding produced" for that text only.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

pub enum EmbeddingProvider {
    Gemini { api_key: String, endpoint: String },
    OpenAI { api_key: String },
    OllamaLocal { endpoint: String },
}

impl EmbeddingProvider {
    /// Pick a provider from resolved settings: Gemini, then OpenAI, then local Ollama
    pub fn from_settings(settings: &EmbeddingSettings) -> Self {
        if let Some(ref key) = settings.gemini_api_key {
            return Self::Gemini {
                api_key: key.clone(),
                endpoint: settings.gemini_endpoint.clone(),
            };
        }

        if let Some(ref key) = settings.openai_api_key {
            return Self::OpenAI {
                api_key: key.clone(),
            };
        }

        Self::OllamaLocal {
            endpoint: settings.ollama_endpoint.clone(),
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Gemini { .. } => "Gemini text-embedding-004",
            Self::OpenAI { .. } => "OpenAI text-embedding-3-small",
            Self::OllamaLocal { .. } => "Ollama nomic-embed-text (local)",
        }
    }

    async fn embed_gemini(&self, text: &str, api_key: &str, endpoint: &str) -> Result<Vec<f32>> {
        let client = reqwest::Client::new();
        let response = client
            .post(format!(
                "{}/models/text-embedding-004:embedContent?key={}",
                endpoint, api_key
            ))
            .json(&serde_json::json!({
                "content": {
                    "parts": [{
                        "text": text
                    }]
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(InferError::EmbeddingUnavailable(format!(
                "Gemini API error: {}",
                text
            )));
        }

        let result: serde_json::Value = response.json().await?;
        let embedding: Vec<f32> = result
            .get("embedding")
            .and_then(|e| e.get("values"))
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                InferError::EmbeddingUnavailable("Invalid Gemini embedding response".into())
            })?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        Ok(embedding)
    }

    async fn embed_openai(&self, text: &str, api_key: &str) -> Result<Vec<f32>> {
        #[derive(Deserialize)]
        struct EmbeddingResponse {
            data: Vec<EmbeddingData>,
        }

        #[derive(Deserialize)]
        struct EmbeddingData {
            embedding: Vec<f32>,
        }

        let client = reqwest::Client::new();
        let response = client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&serde_json::json!({
                "model": "text-embedding-3-small",
                "input": text,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(InferError::EmbeddingUnavailable(format!(
                "OpenAI API error: {}",
                text
            )));
        }

        let result: EmbeddingResponse = response.json().await?;
        result
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| InferError::EmbeddingUnavailable("No embedding returned".into()))
    }

    async fn embed_ollama(&self, text: &str, endpoint: &str) -> Result<Vec<f32>> {
        let client = reqwest::Client::new();
        let response = client
            .post(format!("{}/api/embeddings", endpoint))
            .json(&serde_json::json!({
                "model": "nomic-embed-text",
                "prompt": text,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(InferError::EmbeddingUnavailable(format!(
                "Ollama API error: {}",
                text
            )));
        }

        let result: serde_json::Value = response.json().await?;
        let embedding: Vec<f32> = result
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                InferError::EmbeddingUnavailable("Invalid Ollama embedding response".into())
            })?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        Ok(embedding)
    }
}

#[async_trait]
impl Embedder for EmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embedding = match self {
            Self::Gemini { api_key, endpoint } => self.embed_gemini(text, api_key, endpoint).await?,
            Self::OpenAI { api_key } => self.embed_openai(text, api_key).await?,
            Self::OllamaLocal { endpoint } => self.embed_ollama(text, endpoint).await?,
        };

        if embedding.is_empty() {
            return Err(InferError::EmbeddingUnavailable(format!(
                "{} returned an empty vector",
                self.display_name()
            )));
        }

        Ok(embedding)
    }
}
