use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::client::{
    ChatTurn, Citation, Content, FunctionCall, GenerateRequest, GenerateResponse,
    GenerativeBackend, InlineMedia, Part, Role, ToolConfig, IMAGE_TOOL_NAME,
};
use super::intent::{classify, Intent, VisualMode};
use super::knowledge::KnowledgeFetcher;
use super::prompts::{compose_system_instruction, InstructionParts, Persona};
use super::retry::RetryPolicy;
use super::secondary::SecondaryAdapter;
use super::visual::{PollPolicy, VisualOutcome, VisualPipeline};
use crate::config::{Config, ModelSet, DEFAULT_PROXY_URL};
use crate::embeddings::search::format_context;
use crate::embeddings::{CorpusIndex, DEFAULT_TOP_K};
use crate::error::{InferError, Result};

const LINK_FETCH_TIMEOUT_SECS: u64 = 10;

pub const NEUTRAL_FAILURE: &str =
    "Sorry, I couldn't complete that request right now. Please try again in a moment.";

/// A document or image sent along with the query
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub media: InlineMedia,
}

#[derive(Debug, Clone, Default)]
pub struct ProviderRequest {
    pub query: String,
    pub history: Vec<ChatTurn>,
    pub attachment: Option<Attachment>,
    pub links: Vec<String>,
    pub persona: Persona,
    /// Caller-supplied context; skips corpus retrieval when set
    pub retrieved_context: Option<String>,
    pub rag_enabled: bool,
    /// Answer with the open-model adapter instead of the primary backend
    pub use_secondary: bool,
}

impl ProviderRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            rag_enabled: true,
            ..Default::default()
        }
    }

    fn has_image_attachment(&self) -> bool {
        self.attachment
            .as_ref()
            .map(|a| a.media.is_image())
            .unwrap_or(false)
    }
}

/// Normalized answer from any backend
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderResult {
    pub text: String,
    pub citations: Vec<Citation>,
    pub image: Option<InlineMedia>,
    pub video_uri: Option<String>,
}

impl ProviderResult {
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

impl From<VisualOutcome> for ProviderResult {
    fn from(outcome: VisualOutcome) -> Self {
        match outcome {
            VisualOutcome::Image { text, image } => Self {
                text,
                image: Some(image),
                ..Default::default()
            },
            VisualOutcome::Completed {
                text,
                image,
                video_uri,
            } => Self {
                text,
                image: Some(image),
                video_uri: Some(video_uri),
                ..Default::default()
            },
            VisualOutcome::ImageFailed { message } => Self::message(message),
            VisualOutcome::AnimationFailed {
                text,
                image,
                reason,
            } => Self {
                text: format!(
                    "{}\n\nThe animation could not be created ({}). Here is the still frame instead.",
                    text, reason
                ),
                image: Some(image),
                ..Default::default()
            },
            VisualOutcome::TimedOut {
                text,
                image,
                attempts,
            } => Self {
                text: format!(
                    "{}\n\nThe video is still processing after {} status checks. Here is the still frame for now; try again shortly for the animation.",
                    text, attempts
                ),
                image: Some(image),
                ..Default::default()
            },
        }
    }
}

/// Routes a conversational turn to the right backend, tools and prompt
pub struct ProviderRouter {
    backend: Arc<dyn GenerativeBackend>,
    corpus: Option<Arc<CorpusIndex>>,
    secondary: Option<SecondaryAdapter>,
    fetcher: KnowledgeFetcher,
    models: ModelSet,
    retry: RetryPolicy,
    poll: PollPolicy,
    top_k: usize,
}

impl ProviderRouter {
    pub fn new(backend: Arc<dyn GenerativeBackend>, models: ModelSet) -> Self {
        Self {
            backend,
            corpus: None,
            secondary: None,
            fetcher: KnowledgeFetcher::new(
                DEFAULT_PROXY_URL,
                Duration::from_secs(LINK_FETCH_TIMEOUT_SECS),
            ),
            models,
            retry: RetryPolicy::default(),
            poll: PollPolicy::default(),
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Router wired from configuration, with the secondary adapter enabled
    pub fn from_config(config: &Config, backend: Arc<dyn GenerativeBackend>) -> Self {
        Self::new(backend, config.primary.models.clone())
            .with_retry(config.retry.clone())
            .with_poll(config.video_poll.clone())
            .with_fetcher(KnowledgeFetcher::new(
                &config.secondary.proxy_url,
                Duration::from_secs(LINK_FETCH_TIMEOUT_SECS),
            ))
            .with_secondary(SecondaryAdapter::new(config.secondary.clone()))
            .with_top_k(config.retrieval.top_k)
    }

    pub fn with_corpus(mut self, corpus: Arc<CorpusIndex>) -> Self {
        self.corpus = Some(corpus);
        self
    }

    pub fn with_secondary(mut self, secondary: SecondaryAdapter) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub fn with_fetcher(mut self, fetcher: KnowledgeFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn intent_for(&self, request: &ProviderRequest) -> Intent {
        classify(
            &request.query,
            &request.persona,
            request.attachment.is_some(),
            request.has_image_attachment(),
        )
    }

    /// Answer one turn. The only error returned is `ElevatedAccessRequired`;
    /// every other failure becomes a user-facing message.
    pub async fn respond(&self, request: &ProviderRequest) -> Result<ProviderResult> {
        let intent = self.intent_for(request);
        info!(?intent, persona = %request.persona, "routing request");

        // One search per turn, shared by the primary and secondary paths
        let retrieved = self.retrieve_context(request, intent).await;

        if request.use_secondary && !intent.generates_media() {
            return Ok(self.respond_secondary(request, retrieved.as_deref()).await);
        }

        let outcome = match intent {
            Intent::Visual(mode) => self.respond_visual(request, mode).await,
            _ => self.respond_text(request, intent, retrieved.as_deref()).await,
        };

        match outcome {
            Ok(result) => Ok(result),
            Err(e @ InferError::ElevatedAccessRequired(_)) => Err(e),
            Err(e) => {
                error!(error = %e, "primary backend failed");
                match &self.secondary {
                    Some(_) if !intent.generates_media() => {
                        info!("falling back to the secondary provider");
                        Ok(self.respond_secondary(request, retrieved.as_deref()).await)
                    }
                    _ => Ok(ProviderResult::message(NEUTRAL_FAILURE)),
                }
            }
        }
    }

    async fn respond_text(
        &self,
        request: &ProviderRequest,
        intent: Intent,
        retrieved: Option<&str>,
    ) -> Result<ProviderResult> {
        let linked = self.resolve_links(request).await;

        let system = compose_system_instruction(&InstructionParts {
            persona: &request.persona,
            retrieved_context: retrieved,
            document_name: request.attachment.as_ref().map(|a| a.name.as_str()),
            linked_sources: &linked,
            geo: intent == Intent::Geo,
        });

        let model = match intent {
            Intent::Geo => self.models.geo.clone(),
            _ => self.models.text.clone(),
        };

        let generate = GenerateRequest {
            model,
            system_instruction: Some(system),
            tools: intent.tools(),
            contents: build_contents(request),
            want_image: false,
        };

        let (response, sent) = self.generate_with_fallback(generate).await?;
        let mut result = ProviderResult {
            text: response.text.clone(),
            citations: response.citations.clone(),
            ..Default::default()
        };

        if let Some(call) = response
            .function_calls
            .iter()
            .find(|c| c.name == IMAGE_TOOL_NAME)
        {
            self.close_image_call(&sent, &response, call, &request.query, &mut result)
                .await;
        }

        if result.text.trim().is_empty() && result.image.is_none() {
            return Err(InferError::EmptyResponse);
        }
        Ok(result)
    }

    /// Runs the call with retry. An access restriction while tools are on is
    /// retried once without tools; anything still restricted becomes
    /// `ElevatedAccessRequired`. Returns the request that actually succeeded.
    async fn generate_with_fallback(
        &self,
        request: GenerateRequest,
    ) -> Result<(GenerateResponse, GenerateRequest)> {
        let first = self
            .retry
            .execute(|| self.backend.generate(&request))
            .await;

        match first {
            Ok(response) => Ok((response, request)),
            Err(e) if e.is_access_restricted() && request.tools.is_enabled() => {
                warn!(tools = ?request.tools, error = %e, "access restricted, retrying without tools");
                let mut bare = request;
                bare.tools = ToolConfig::None;
                match self.retry.execute(|| self.backend.generate(&bare)).await {
                    Ok(response) => Ok((response, bare)),
                    Err(e) => Err(InferError::ElevatedAccessRequired(e.to_string())),
                }
            }
            Err(e) => Err(e.into_elevated()),
        }
    }

    /// Runs the image tool and reports the result back to the model. Once the
    /// image exists it is always returned, whatever happens to the follow-up.
    async fn close_image_call(
        &self,
        sent: &GenerateRequest,
        response: &GenerateResponse,
        call: &FunctionCall,
        query: &str,
        result: &mut ProviderResult,
    ) {
        let prompt = call
            .args
            .get("prompt")
            .and_then(|p| p.as_str())
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(query);

        let pipeline = VisualPipeline::new(self.backend.as_ref(), &self.models, &self.retry, &self.poll);
        let image = match pipeline.generate_image(prompt, None).await {
            Ok(image) => image,
            Err(e) => {
                warn!(error = %e, "image tool call failed");
                if !result.text.trim().is_empty() {
                    result.text.push_str("\n\n");
                }
                result
                    .text
                    .push_str("(The image could not be generated for this request.)");
                return;
            }
        };

        let mut model_parts = Vec::new();
        if !response.text.trim().is_empty() {
            model_parts.push(Part::Text(response.text.clone()));
        }
        model_parts.push(Part::FunctionCall(call.clone()));

        let mut follow_up = sent.clone();
        follow_up.contents.push(Content {
            role: Role::Model,
            parts: model_parts,
        });
        follow_up.contents.push(Content {
            role: Role::User,
            parts: vec![Part::FunctionResponse {
                name: call.name.clone(),
                response: serde_json::json!({
                    "result": "Image generated successfully and shown to the user."
                }),
            }],
        });

        match self.retry.execute(|| self.backend.generate(&follow_up)).await {
            Ok(closing) if !closing.text.trim().is_empty() => {
                result.text = closing.text;
                result.citations.extend(closing.citations);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "function response follow-up failed, keeping the image"),
        }

        if result.text.trim().is_empty() {
            result.text = "Here is the image you asked for.".to_string();
        }
        result.image = Some(image);
    }

    async fn respond_visual(&self, request: &ProviderRequest, mode: VisualMode) -> Result<ProviderResult> {
        let pipeline = VisualPipeline::new(self.backend.as_ref(), &self.models, &self.retry, &self.poll);
        let outcome = match mode {
            VisualMode::Animate => pipeline.animate_prompt(&request.query).await?,
            VisualMode::Still => {
                let reference = request
                    .attachment
                    .as_ref()
                    .map(|a| &a.media)
                    .filter(|m| m.is_image());
                pipeline.still(&request.query, reference).await
            }
        };
        Ok(outcome.into())
    }

    async fn respond_secondary(&self, request: &ProviderRequest, retrieved: Option<&str>) -> ProviderResult {
        let Some(secondary) = &self.secondary else {
            return ProviderResult::message(NEUTRAL_FAILURE);
        };

        let system = compose_system_instruction(&InstructionParts {
            persona: &request.persona,
            retrieved_context: None,
            document_name: None,
            linked_sources: &[],
            geo: false,
        });

        let text = secondary
            .chat(&request.query, &request.history, &system, retrieved)
            .await;
        ProviderResult::message(text)
    }

    /// Corpus context for this turn. Never combined with an attached document
    /// and skipped for media generation.
    async fn retrieve_context(&self, request: &ProviderRequest, intent: Intent) -> Option<String> {
        if request.attachment.is_some() || intent.generates_media() {
            return None;
        }
        if let Some(supplied) = &request.retrieved_context {
            return Some(supplied.clone()).filter(|c| !c.trim().is_empty());
        }
        if !request.rag_enabled {
            return None;
        }

        let corpus = self.corpus.as_ref()?;
        match corpus.similarity_search(&request.query, self.top_k).await {
            Ok(results) if !results.is_empty() => {
                debug!(fragments = results.len(), "retrieved corpus context");
                Some(format_context(&results))
            }
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "corpus search failed, answering without context");
                None
            }
        }
    }

    async fn resolve_links(&self, request: &ProviderRequest) -> Vec<(String, String)> {
        let mut sources = Vec::new();
        for url in &request.links {
            if let Some(content) = self
                .fetcher
                .fetch(
                    url,
                    &request.query,
                    self.backend.as_ref(),
                    &self.models.text,
                    &self.retry,
                )
                .await
            {
                sources.push((url.clone(), content));
            }
        }
        sources
    }
}

/// History turns followed by the current message (with its attachment)
fn build_contents(request: &ProviderRequest) -> Vec<Content> {
    let mut contents: Vec<Content> = request
        .history
        .iter()
        .map(|turn| Content {
            role: turn.role,
            parts: vec![Part::Text(turn.text.clone())],
        })
        .collect();

    let mut parts = vec![Part::Text(request.query.clone())];
    if let Some(attachment) = &request.attachment {
        parts.push(Part::Inline(attachment.media.clone()));
    }
    contents.push(Content {
        role: Role::User,
        parts,
    });
    contents
}
