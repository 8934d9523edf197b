use std::time::Duration;

use tracing::{debug, info, warn};

use super::client::{ChatTurn, Role};
use crate::config::SecondarySettings;
use crate::error::{InferError, Result};

/// Prior turns included in a secondary-provider prompt
pub const HISTORY_WINDOW: usize = 6;

pub const ALL_CANDIDATES_FAILED: &str = "All of the open alternative models are unavailable right now (they may be starting up or rate limited). Please try again in a minute, or switch to the primary provider (Gemini) for this conversation.";

/// Chat markup expected by a family of open models
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptTemplate {
    /// `<|system|> … </s> <|user|> … </s> <|assistant|>`
    Zephyr,
    /// `<s>[INST] … [/INST] … </s>`
    Mistral,
}

impl PromptTemplate {
    pub fn for_model(model_id: &str) -> Self {
        let id = model_id.to_lowercase();
        if id.contains("mistral") || id.contains("mixtral") || id.contains("llama") {
            PromptTemplate::Mistral
        } else {
            PromptTemplate::Zephyr
        }
    }

    pub fn render(
        &self,
        query: &str,
        history: &[ChatTurn],
        system_instruction: &str,
        rag_context: Option<&str>,
    ) -> String {
        let mut system = system_instruction.trim().to_string();
        if let Some(context) = rag_context.filter(|c| !c.trim().is_empty()) {
            system.push_str("\n\nContext from the user's documents:\n");
            system.push_str(context.trim());
        }

        let window = &history[history.len().saturating_sub(HISTORY_WINDOW)..];

        match self {
            PromptTemplate::Zephyr => {
                let mut out = format!("<|system|>\n{}</s>\n", system);
                for turn in window {
                    let tag = match turn.role {
                        Role::User => "<|user|>",
                        Role::Model => "<|assistant|>",
                    };
                    out.push_str(&format!("{}\n{}</s>\n", tag, turn.text.trim()));
                }
                out.push_str(&format!("<|user|>\n{}</s>\n<|assistant|>\n", query.trim()));
                out
            }
            PromptTemplate::Mistral => {
                // Must open with a user turn
                let start = window
                    .iter()
                    .position(|t| t.role == Role::User)
                    .unwrap_or(window.len());

                let mut out = String::from("<s>");
                let mut system_pending = Some(system);
                let mut user_turn = |text: &str, out: &mut String| {
                    let text = match system_pending.take() {
                        Some(system) => format!("{}\n\n{}", system, text.trim()),
                        None => text.trim().to_string(),
                    };
                    out.push_str(&format!("[INST] {} [/INST]", text));
                };

                for turn in &window[start..] {
                    match turn.role {
                        Role::User => user_turn(&turn.text, &mut out),
                        Role::Model => out.push_str(&format!(" {}</s>", turn.text.trim())),
                    }
                }
                user_turn(query, &mut out);
                out
            }
        }
    }
}

/// Open-model fallback: local proxy first, then each hosted candidate in order
pub struct SecondaryAdapter {
    settings: SecondarySettings,
    proxy_client: reqwest::Client,
    client: reqwest::Client,
}

impl SecondaryAdapter {
    pub fn new(settings: SecondarySettings) -> Self {
        let proxy_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.proxy_timeout_secs))
            .build()
            .unwrap_or_default();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            settings,
            proxy_client,
            client,
        }
    }

    /// Never fails: exhausting every candidate yields an explanation text
    pub async fn chat(
        &self,
        query: &str,
        history: &[ChatTurn],
        system_instruction: &str,
        rag_context: Option<&str>,
    ) -> String {
        // The proxy forwards to a Zephyr-family model
        let prompt =
            PromptTemplate::Zephyr.render(query, history, system_instruction, rag_context);
        match self.call_proxy(&prompt).await {
            Ok(text) => return text,
            Err(e) => debug!(error = %e, "secondary proxy unavailable"),
        }

        for model in &self.settings.candidates {
            let template = PromptTemplate::for_model(model);
            let prompt = template.render(query, history, system_instruction, rag_context);
            match self.call_candidate(model, &prompt).await {
                Ok(text) => {
                    info!(model = %model, "secondary candidate answered");
                    return text;
                }
                Err(e) if e.is_transient() => info!(model = %model, "candidate still loading, trying next"),
                Err(e) => warn!(model = %model, error = %e, "candidate failed"),
            }
        }

        ALL_CANDIDATES_FAILED.to_string()
    }

    async fn call_proxy(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/chat/hf",
            self.settings.proxy_url.trim_end_matches('/')
        );
        let response = self
            .proxy_client
            .post(&url)
            .json(&generation_body(prompt))
            .send()
            .await
            .map_err(|e| InferError::ExternalServiceUnreachable(e.to_string()))?;

        read_generation(response).await
    }

    async fn call_candidate(&self, model: &str, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/{}",
            self.settings.inference_base.trim_end_matches('/'),
            model
        );
        let mut req = self.client.post(&url).json(&generation_body(prompt));

        if let Some(ref key) = self.settings.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = req
            .send()
            .await
            .map_err(|e| InferError::ExternalServiceUnreachable(e.to_string()))?;

        read_generation(response).await
    }
}

fn generation_body(prompt: &str) -> serde_json::Value {
    serde_json::json!({
        "inputs": prompt,
        "parameters": {
            "max_new_tokens": 512,
            "temperature": 0.7,
            "return_full_text": false,
        }
    })
}

async fn read_generation(response: reqwest::Response) -> Result<String> {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap_or(serde_json::Value::Null);
    parse_generation(status, &json, &text)
}

/// `[{generated_text}]` on success, `{error}` otherwise. A model that is
/// still loading is reported as transient.
pub fn parse_generation(status: u16, json: &serde_json::Value, raw: &str) -> Result<String> {
    if let Some(error) = json.get("error").and_then(|e| e.as_str()) {
        if error.to_lowercase().contains("loading") || json.get("estimated_time").is_some() {
            return Err(InferError::TransientBackend {
                status,
                message: error.to_string(),
            });
        }
        return Err(InferError::Backend {
            status,
            message: error.to_string(),
        });
    }

    if !(200..300).contains(&status) {
        return Err(InferError::Backend {
            status,
            message: raw.to_string(),
        });
    }

    json.get(0)
        .and_then(|g| g.get("generated_text"))
        .and_then(|t| t.as_str())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or(InferError::EmptyResponse)
}
