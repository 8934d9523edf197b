use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::embeddings::{DEFAULT_CHUNK_SIZE, DEFAULT_TOP_K};
use crate::error::{InferError, Result};
use crate::llm::retry::RetryPolicy;
use crate::llm::visual::PollPolicy;

pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
/// Local helper service exposing `/scrape` and `/chat/hf`
pub const DEFAULT_PROXY_URL: &str = "http://localhost:5000";
pub const DEFAULT_INFERENCE_BASE: &str = "https://api-inference.huggingface.co/models";
pub const DEFAULT_OLLAMA_ENDPOINT: &str = "http://localhost:11434";

/// Open models tried in order when the local proxy is unavailable
pub const DEFAULT_SECONDARY_CANDIDATES: &[&str] = &[
    "HuggingFaceH4/zephyr-7b-beta",
    "mistralai/Mistral-7B-Instruct-v0.2",
    "mistralai/Mixtral-8x7B-Instruct-v0.1",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSet {
    pub text: String,
    pub geo: String,
    pub image: String,
    pub video: String,
}

impl Default for ModelSet {
    fn default() -> Self {
        Self {
            text: "gemini-2.5-flash".into(),
            geo: "gemini-2.5-flash".into(),
            image: "gemini-2.5-flash-image".into(),
            video: "veo-3.1-fast-generate-preview".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrimarySettings {
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub models: ModelSet,
    pub request_timeout_secs: u64,
}

impl Default for PrimarySettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_GEMINI_ENDPOINT.into(),
            api_key: None,
            models: ModelSet::default(),
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gemini_api_key: Option<String>,
    pub gemini_endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
    pub ollama_endpoint: String,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            gemini_endpoint: DEFAULT_GEMINI_ENDPOINT.into(),
            openai_api_key: None,
            ollama_endpoint: DEFAULT_OLLAMA_ENDPOINT.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecondarySettings {
    pub proxy_url: String,
    pub inference_base: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub candidates: Vec<String>,
    /// Short timeout for the local proxy before falling back
    pub proxy_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for SecondarySettings {
    fn default() -> Self {
        Self {
            proxy_url: DEFAULT_PROXY_URL.into(),
            inference_base: DEFAULT_INFERENCE_BASE.into(),
            api_key: None,
            candidates: DEFAULT_SECONDARY_CANDIDATES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            proxy_timeout_secs: 3,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub chunk_size: usize,
    pub top_k: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            top_k: DEFAULT_TOP_K,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub primary: PrimarySettings,
    pub embedding: EmbeddingSettings,
    pub secondary: SecondarySettings,
    pub retrieval: RetrievalSettings,
    pub retry: RetryPolicy,
    pub video_poll: PollPolicy,
}

impl Config {
    /// Load `config.json` from the user config dir (if present), then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Path to config.json
    pub fn path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| InferError::Config("Could not determine config directory".into()))?;
        Ok(config_dir.join("infermate").join("config.json"))
    }

    /// Read a config file, returning defaults if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay environment variables. `lookup` is injected so tests don't touch the process env.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("GEMINI_API_KEY").filter(|k| !k.is_empty()) {
            self.primary.api_key = Some(key);
        }
        if let Some(endpoint) = lookup("INFERMATE_GEMINI_ENDPOINT") {
            self.primary.endpoint = endpoint.clone();
            self.embedding.gemini_endpoint = endpoint;
        }
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty()) {
            self.embedding.openai_api_key = Some(key);
        }
        if let Some(key) = lookup("HF_API_KEY").filter(|k| !k.is_empty()) {
            self.secondary.api_key = Some(key);
        }
        if let Some(url) = lookup("INFERMATE_PROXY_URL") {
            self.secondary.proxy_url = url;
        }

        // One Gemini key serves both generation and embeddings
        if self.embedding.gemini_api_key.is_none() {
            self.embedding.gemini_api_key = self.primary.api_key.clone();
        }
    }

    fn validate(&self) -> Result<()> {
        if self.retrieval.chunk_size == 0 {
            return Err(InferError::Config("retrieval.chunk_size must be > 0".into()));
        }
        if self.retrieval.top_k == 0 {
            return Err(InferError::Config("retrieval.top_k must be > 0".into()));
        }
        if self.video_poll.max_attempts == 0 {
            return Err(InferError::Config("video_poll.max_attempts must be > 0".into()));
        }
        Ok(())
    }
}
