use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::client::{
    Content, GenerateRequest, GenerativeBackend, InlineMedia, Part, Role, ToolConfig,
    VideoRequest,
};
use super::prompts::{enhance_prompt, SYSTEM_PROMPT_ENHANCER};
use super::retry::RetryPolicy;
use crate::config::ModelSet;
use crate::error::{InferError, Result};

/// Bounded polling of a long-running video operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    pub interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            max_attempts: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VisualOutcome {
    /// Single still image
    Image { text: String, image: InlineMedia },
    Completed {
        text: String,
        image: InlineMedia,
        video_uri: String,
    },
    /// The reference image could not be produced; nothing to show
    ImageFailed { message: String },
    AnimationFailed {
        text: String,
        image: InlineMedia,
        reason: String,
    },
    /// Poll budget exhausted while the video was still rendering
    TimedOut {
        text: String,
        image: InlineMedia,
        attempts: u32,
    },
}

pub const IMAGE_FAILED_MESSAGE: &str =
    "I couldn't create an image for that request. Try rephrasing the description.";

/// ENHANCE → IMAGE → ANIMATE
pub struct VisualPipeline<'a> {
    backend: &'a dyn GenerativeBackend,
    models: &'a ModelSet,
    retry: &'a RetryPolicy,
    poll: &'a PollPolicy,
}

impl<'a> VisualPipeline<'a> {
    pub fn new(
        backend: &'a dyn GenerativeBackend,
        models: &'a ModelSet,
        retry: &'a RetryPolicy,
        poll: &'a PollPolicy,
    ) -> Self {
        Self {
            backend,
            models,
            retry,
            poll,
        }
    }

    /// Full animation run. Only an access restriction at ENHANCE or ANIMATE
    /// is returned as an error (as `ElevatedAccessRequired`).
    pub async fn animate_prompt(&self, prompt: &str) -> Result<VisualOutcome> {
        let enhanced = match self.enhance(prompt).await {
            Ok(text) => text,
            Err(e) if e.is_access_restricted() => return Err(e.into_elevated()),
            Err(e) => {
                warn!(error = %e, "prompt enhancement failed, using the original prompt");
                prompt.trim().to_string()
            }
        };
        debug!(enhanced = %enhanced, "visual prompt");

        let image = match self.generate_image(&enhanced, None).await {
            Ok(image) => image,
            Err(e) => {
                warn!(error = %e, "reference image failed");
                return Ok(VisualOutcome::ImageFailed {
                    message: IMAGE_FAILED_MESSAGE.to_string(),
                });
            }
        };

        let text = format!("Animated scene: {}", enhanced);
        match self.animate(&image, &enhanced).await {
            Ok(video_uri) => Ok(VisualOutcome::Completed {
                text,
                image,
                video_uri,
            }),
            Err(e) if e.is_access_restricted() => Err(e.into_elevated()),
            Err(InferError::VideoTimeout { attempts }) => Ok(VisualOutcome::TimedOut {
                text,
                image,
                attempts,
            }),
            Err(e) => Ok(VisualOutcome::AnimationFailed {
                text,
                image,
                reason: e.to_string(),
            }),
        }
    }

    /// One image, optionally derived from a reference picture
    pub async fn still(&self, prompt: &str, reference: Option<&InlineMedia>) -> VisualOutcome {
        match self.generate_image(prompt, reference).await {
            Ok(image) => VisualOutcome::Image {
                text: "Here is your image.".to_string(),
                image,
            },
            Err(e) => {
                warn!(error = %e, "image generation failed");
                VisualOutcome::ImageFailed {
                    message: IMAGE_FAILED_MESSAGE.to_string(),
                }
            }
        }
    }

    pub async fn enhance(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            model: self.models.text.clone(),
            system_instruction: Some(SYSTEM_PROMPT_ENHANCER.to_string()),
            tools: ToolConfig::None,
            contents: vec![Content {
                role: Role::User,
                parts: vec![Part::Text(enhance_prompt(prompt))],
            }],
            want_image: false,
        };

        let response = self
            .retry
            .execute(|| self.backend.generate(&request))
            .await?;
        let text = response.text.trim().to_string();
        if text.is_empty() {
            return Err(InferError::EmptyResponse);
        }
        Ok(text)
    }

    pub async fn generate_image(
        &self,
        prompt: &str,
        reference: Option<&InlineMedia>,
    ) -> Result<InlineMedia> {
        let mut parts = vec![Part::Text(prompt.to_string())];
        if let Some(reference) = reference {
            parts.push(Part::Inline(reference.clone()));
        }

        let request = GenerateRequest {
            model: self.models.image.clone(),
            system_instruction: None,
            tools: ToolConfig::None,
            contents: vec![Content {
                role: Role::User,
                parts,
            }],
            want_image: true,
        };

        let response = self
            .retry
            .execute(|| self.backend.generate(&request))
            .await?;
        response
            .media
            .into_iter()
            .find(|m| m.is_image())
            .ok_or(InferError::EmptyResponse)
    }

    /// Submit the video job and poll until done or the poll budget runs out
    pub async fn animate(&self, image: &InlineMedia, prompt: &str) -> Result<String> {
        let request = VideoRequest {
            model: self.models.video.clone(),
            prompt: prompt.to_string(),
            image: image.clone(),
            aspect_ratio: "16:9".to_string(),
            resolution: "720p".to_string(),
        };

        let mut operation = self
            .retry
            .execute(|| self.backend.start_video(&request))
            .await?;
        info!(operation = %operation.name, "video generation started");

        let mut attempts = 0;
        while !operation.done {
            if attempts >= self.poll.max_attempts {
                return Err(InferError::VideoTimeout { attempts });
            }
            sleep(Duration::from_millis(self.poll.interval_ms)).await;
            let current = operation.clone();
            operation = self
                .retry
                .execute(|| self.backend.poll_video(&current))
                .await?;
            attempts += 1;
            debug!(attempts, done = operation.done, "polled video operation");
        }

        if let Some(error) = operation.error {
            return Err(InferError::VideoFailed(error));
        }
        operation
            .video_uri
            .ok_or_else(|| InferError::VideoFailed("no video returned".into()))
    }
}
