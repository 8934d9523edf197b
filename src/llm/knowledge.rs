use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use super::client::{Content, GenerateRequest, GenerativeBackend, Part, Role, ToolConfig};
use super::prompts::{link_reader_prompt, SYSTEM_LINK_READER};
use super::retry::RetryPolicy;
use crate::error::{InferError, Result};

/// Pages are cut to this many characters before entering a prompt
pub const MAX_LINK_CHARS: usize = 5_000;

#[derive(Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    content: Option<String>,
}

/// Resolves links to text through the local `/scrape` proxy
pub struct KnowledgeFetcher {
    proxy_url: String,
    client: reqwest::Client,
}

impl KnowledgeFetcher {
    pub fn new(proxy_url: &str, timeout: Duration) -> Self {
        Self {
            proxy_url: proxy_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    pub async fn scrape(&self, url: &str, query: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/scrape", self.proxy_url))
            .json(&serde_json::json!({ "url": url, "query": query }))
            .send()
            .await
            .map_err(|e| InferError::ExternalServiceUnreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(InferError::ExternalServiceUnreachable(format!(
                "scrape proxy returned {}",
                response.status()
            )));
        }

        let body: ScrapeResponse = response.json().await?;
        body.content
            .filter(|c| !c.trim().is_empty())
            .map(|c| truncate_chars(&c, MAX_LINK_CHARS))
            .ok_or(InferError::EmptyResponse)
    }

    /// Proxy first, then a search-grounded generative call. `None` if both fail.
    pub async fn fetch(
        &self,
        url: &str,
        query: &str,
        backend: &dyn GenerativeBackend,
        model: &str,
        retry: &RetryPolicy,
    ) -> Option<String> {
        match self.scrape(url, query).await {
            Ok(content) => {
                debug!(url, chars = content.len(), "link fetched via proxy");
                return Some(content);
            }
            Err(e) => debug!(url, error = %e, "scrape proxy unavailable, using grounded call"),
        }

        let request = GenerateRequest {
            model: model.to_string(),
            system_instruction: Some(SYSTEM_LINK_READER.to_string()),
            tools: ToolConfig::WebSearch,
            contents: vec![Content {
                role: Role::User,
                parts: vec![Part::Text(link_reader_prompt(url, query))],
            }],
            want_image: false,
        };

        match retry.execute(|| backend.generate(&request)).await {
            Ok(response) if !response.text.trim().is_empty() => {
                Some(truncate_chars(&response.text, MAX_LINK_CHARS))
            }
            Ok(_) => None,
            Err(e) => {
                warn!(url, error = %e, "could not read link");
                None
            }
        }
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
