use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;

use crate::config::PrimarySettings;
use crate::error::{InferError, Result};

/// Name of the image tool offered to the model via function calling
pub const IMAGE_TOOL_NAME: &str = "generate_image";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// One prior message in the conversation
#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

/// Binary payload with its MIME type (attachments, generated images)
#[derive(Debug, Clone, PartialEq)]
pub struct InlineMedia {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl InlineMedia {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    Inline(InlineMedia),
    FunctionCall(FunctionCall),
    FunctionResponse {
        name: String,
        response: serde_json::Value,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<Part>,
}

/// Tooling attached to a single generative call. Exactly one variant per
/// call, so search grounding and function calling never coexist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolConfig {
    None,
    WebSearch,
    Maps,
    ImageGeneration,
}

impl ToolConfig {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, ToolConfig::None)
    }
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub system_instruction: Option<String>,
    pub tools: ToolConfig,
    pub contents: Vec<Content>,
    /// Ask for image output alongside text
    pub want_image: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Citation {
    pub uri: String,
    pub title: String,
}

#[derive(Debug, Clone, Default)]
pub struct GenerateResponse {
    pub text: String,
    pub function_calls: Vec<FunctionCall>,
    pub citations: Vec<Citation>,
    pub media: Vec<InlineMedia>,
}

#[derive(Debug, Clone)]
pub struct VideoRequest {
    pub model: String,
    pub prompt: String,
    pub image: InlineMedia,
    pub aspect_ratio: String,
    pub resolution: String,
}

/// Handle of a long-running video job
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoOperation {
    pub name: String,
    pub done: bool,
    pub video_uri: Option<String>,
    pub error: Option<String>,
}

/// A generative model service. Errors are classified so callers can tell
/// transient, access-restricted and other failures apart.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse>;

    async fn start_video(&self, request: &VideoRequest) -> Result<VideoOperation>;

    async fn poll_video(&self, operation: &VideoOperation) -> Result<VideoOperation>;
}

/// Gemini REST client
pub struct GeminiClient {
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(settings: &PrimarySettings) -> Result<Self> {
        let api_key = settings.api_key.clone().ok_or_else(|| {
            InferError::Config("No Gemini API key found. Set GEMINI_API_KEY".into())
        })?;

        Ok(Self {
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(settings.request_timeout_secs))
                .build()
                .unwrap_or_default(),
        })
    }

    async fn send_json(&self, url: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let response = self
            .client
            .post(url)
            .query(&[("key", &self.api_key)])
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_failure(status.as_u16(), text));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl GenerativeBackend for GeminiClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, request.model);
        let json = self.send_json(&url, &build_generate_body(request)).await?;
        parse_generate_response(&json)
    }

    async fn start_video(&self, request: &VideoRequest) -> Result<VideoOperation> {
        let url = format!(
            "{}/models/{}:predictLongRunning",
            self.endpoint, request.model
        );

        let body = serde_json::json!({
            "instances": [{
                "prompt": request.prompt,
                "image": {
                    "bytesBase64Encoded": BASE64.encode(&request.image.data),
                    "mimeType": request.image.mime_type,
                },
            }],
            "parameters": {
                "aspectRatio": request.aspect_ratio,
                "resolution": request.resolution,
                "numberOfVideos": 1,
            },
        });

        let json = self.send_json(&url, &body).await?;
        parse_operation(&json)
    }

    async fn poll_video(&self, operation: &VideoOperation) -> Result<VideoOperation> {
        let url = format!("{}/{}", self.endpoint, operation.name);
        let response = self
            .client
            .get(&url)
            .query(&[("key", &self.api_key)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_failure(status.as_u16(), text));
        }

        let json: serde_json::Value = response.json().await?;
        parse_operation(&json)
    }
}

/// Stand-in primary backend when no Gemini key is configured. Every call
/// fails as unreachable, so the router answers through its secondary path.
pub struct UnavailableBackend {
    reason: String,
}

impl UnavailableBackend {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn error(&self) -> InferError {
        InferError::ExternalServiceUnreachable(self.reason.clone())
    }
}

#[async_trait]
impl GenerativeBackend for UnavailableBackend {
    async fn generate(&self, _request: &GenerateRequest) -> Result<GenerateResponse> {
        Err(self.error())
    }

    async fn start_video(&self, _request: &VideoRequest) -> Result<VideoOperation> {
        Err(self.error())
    }

    async fn poll_video(&self, _operation: &VideoOperation) -> Result<VideoOperation> {
        Err(self.error())
    }
}

/// Map a non-success HTTP status onto the error taxonomy
pub fn classify_failure(status: u16, body: String) -> InferError {
    if (500..600).contains(&status) {
        return InferError::TransientBackend {
            status,
            message: body,
        };
    }

    let restricted = status == 401
        || status == 403
        || body.contains("PERMISSION_DENIED")
        || (status == 404 && body.contains("Requested entity was not found"));
    if restricted {
        return InferError::AccessRestricted(format!("{}: {}", status, body));
    }

    InferError::Backend {
        status,
        message: body,
    }
}

fn part_to_json(part: &Part) -> serde_json::Value {
    match part {
        Part::Text(text) => serde_json::json!({ "text": text }),
        Part::Inline(media) => serde_json::json!({
            "inlineData": {
                "mimeType": media.mime_type,
                "data": BASE64.encode(&media.data),
            }
        }),
        Part::FunctionCall(call) => serde_json::json!({
            "functionCall": { "name": call.name, "args": call.args }
        }),
        Part::FunctionResponse { name, response } => serde_json::json!({
            "functionResponse": { "name": name, "response": response }
        }),
    }
}

fn tools_to_json(tools: ToolConfig) -> Option<serde_json::Value> {
    match tools {
        ToolConfig::None => None,
        ToolConfig::WebSearch => Some(serde_json::json!([{ "googleSearch": {} }])),
        ToolConfig::Maps => Some(serde_json::json!([{ "googleMaps": {} }])),
        ToolConfig::ImageGeneration => Some(serde_json::json!([{
            "functionDeclarations": [{
                "name": IMAGE_TOOL_NAME,
                "description": "Generate an image from a detailed visual description.",
                "parameters": {
                    "type": "OBJECT",
                    "properties": {
                        "prompt": {
                            "type": "STRING",
                            "description": "Detailed description of the image to create",
                        }
                    },
                    "required": ["prompt"],
                }
            }]
        }])),
    }
}

pub fn build_generate_body(request: &GenerateRequest) -> serde_json::Value {
    let contents: Vec<serde_json::Value> = request
        .contents
        .iter()
        .map(|c| {
            serde_json::json!({
                "role": c.role.as_str(),
                "parts": c.parts.iter().map(part_to_json).collect::<Vec<_>>(),
            })
        })
        .collect();

    let mut body = serde_json::json!({ "contents": contents });

    if let Some(ref system) = request.system_instruction {
        body["systemInstruction"] = serde_json::json!({ "parts": [{ "text": system }] });
    }
    if let Some(tools) = tools_to_json(request.tools) {
        body["tools"] = tools;
    }
    if request.want_image {
        body["generationConfig"] = serde_json::json!({ "responseModalities": ["TEXT", "IMAGE"] });
    }

    body
}

pub fn parse_generate_response(json: &serde_json::Value) -> Result<GenerateResponse> {
    let candidate = json
        .get("candidates")
        .and_then(|c| c.get(0))
        .ok_or(InferError::EmptyResponse)?;

    let mut response = GenerateResponse::default();

    let parts = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .cloned()
        .unwrap_or_default();

    for part in &parts {
        if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
            response.text.push_str(text);
        } else if let Some(call) = part.get("functionCall") {
            response.function_calls.push(FunctionCall {
                name: call
                    .get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or_default()
                    .to_string(),
                args: call.get("args").cloned().unwrap_or(serde_json::Value::Null),
            });
        } else if let Some(inline) = part.get("inlineData") {
            let mime_type = inline
                .get("mimeType")
                .and_then(|m| m.as_str())
                .unwrap_or("application/octet-stream")
                .to_string();
            let data = inline
                .get("data")
                .and_then(|d| d.as_str())
                .and_then(|d| BASE64.decode(d).ok());
            if let Some(data) = data {
                response.media.push(InlineMedia { mime_type, data });
            }
        }
    }

    let chunks = candidate
        .get("groundingMetadata")
        .and_then(|g| g.get("groundingChunks"))
        .and_then(|c| c.as_array())
        .cloned()
        .unwrap_or_default();

    for chunk in &chunks {
        let source = chunk.get("web").or_else(|| chunk.get("maps"));
        if let Some(source) = source {
            let uri = source.get("uri").and_then(|u| u.as_str()).unwrap_or_default();
            if uri.is_empty() || response.citations.iter().any(|c| c.uri == uri) {
                continue;
            }
            let title = source
                .get("title")
                .and_then(|t| t.as_str())
                .unwrap_or(uri)
                .to_string();
            response.citations.push(Citation {
                uri: uri.to_string(),
                title,
            });
        }
    }

    if response.text.is_empty() && response.function_calls.is_empty() && response.media.is_empty() {
        return Err(InferError::EmptyResponse);
    }

    Ok(response)
}

fn parse_operation(json: &serde_json::Value) -> Result<VideoOperation> {
    let name = json
        .get("name")
        .and_then(|n| n.as_str())
        .ok_or(InferError::EmptyResponse)?
        .to_string();

    let done = json.get("done").and_then(|d| d.as_bool()).unwrap_or(false);

    let error = json
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(|s| s.to_string());

    let video_uri = json
        .get("response")
        .and_then(|r| r.get("generateVideoResponse"))
        .and_then(|r| r.get("generatedSamples"))
        .and_then(|s| s.get(0))
        .and_then(|s| s.get("video"))
        .and_then(|v| v.get("uri"))
        .and_then(|u| u.as_str())
        .map(|s| s.to_string());

    Ok(VideoOperation {
        name,
        done,
        video_uri,
        error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(tools: ToolConfig) -> GenerateRequest {
        GenerateRequest {
            model: "gemini-test".into(),
            system_instruction: Some("be brief".into()),
            tools,
            contents: vec![Content {
                role: Role::User,
                parts: vec![Part::Text("hello".into())],
            }],
            want_image: false,
        }
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_failure(503, "busy".into()).is_transient());
        assert!(classify_failure(500, String::new()).is_transient());
        assert!(classify_failure(403, "nope".into()).is_access_restricted());
        assert!(classify_failure(400, "{\"status\":\"PERMISSION_DENIED\"}".into())
            .is_access_restricted());
        assert!(classify_failure(404, "Requested entity was not found.".into())
            .is_access_restricted());
        assert!(matches!(
            classify_failure(429, "slow down".into()),
            InferError::Backend { status: 429, .. }
        ));
    }

    #[test]
    fn test_body_has_exactly_one_tool_kind() {
        let body = build_generate_body(&request(ToolConfig::WebSearch));
        let tools = body["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert!(tools[0].get("googleSearch").is_some());
        assert!(tools[0].get("functionDeclarations").is_none());

        let body = build_generate_body(&request(ToolConfig::ImageGeneration));
        let decl = &body["tools"][0]["functionDeclarations"][0];
        assert_eq!(decl["name"], IMAGE_TOOL_NAME);
        assert!(body["tools"][0].get("googleSearch").is_none());

        let body = build_generate_body(&request(ToolConfig::None));
        assert!(body.get("tools").is_none());
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
    }

    #[test]
    fn test_inline_attachment_is_base64() {
        let mut req = request(ToolConfig::None);
        req.contents[0].parts.push(Part::Inline(InlineMedia {
            mime_type: "text/plain".into(),
            data: b"hi".to_vec(),
        }));
        let body = build_generate_body(&req);
        let inline = &body["contents"][0]["parts"][1]["inlineData"];
        assert_eq!(inline["mimeType"], "text/plain");
        assert_eq!(inline["data"], "aGk=");
    }

    #[test]
    fn test_parse_text_citations_and_calls() {
        let json = serde_json::json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "Paris " },
                    { "text": "is nice." },
                    { "functionCall": { "name": "generate_image", "args": { "prompt": "a cat" } } },
                    { "inlineData": { "mimeType": "image/png", "data": "aGk=" } }
                ]},
                "groundingMetadata": { "groundingChunks": [
                    { "web": { "uri": "https://a.example", "title": "A" } },
                    { "web": { "uri": "https://a.example", "title": "A again" } },
                    { "maps": { "uri": "https://maps.example/p" } }
                ]}
            }]
        });

        let resp = parse_generate_response(&json).unwrap();
        assert_eq!(resp.text, "Paris is nice.");
        assert_eq!(resp.function_calls[0].name, "generate_image");
        assert_eq!(resp.function_calls[0].args["prompt"], "a cat");
        assert_eq!(resp.media[0].data, b"hi".to_vec());
        assert_eq!(resp.citations.len(), 2);
        assert_eq!(resp.citations[1].title, "https://maps.example/p");
    }

    #[test]
    fn test_parse_empty_candidate_is_error() {
        let json = serde_json::json!({ "candidates": [{ "content": { "parts": [] } }] });
        assert!(matches!(
            parse_generate_response(&json),
            Err(InferError::EmptyResponse)
        ));
    }

    #[test]
    fn test_parse_finished_operation() {
        let json = serde_json::json!({
            "name": "models/veo/operations/42",
            "done": true,
            "response": { "generateVideoResponse": { "generatedSamples": [
                { "video": { "uri": "https://video.example/42.mp4" } }
            ]}}
        });
        let op = parse_operation(&json).unwrap();
        assert!(op.done);
        assert_eq!(op.video_uri.as_deref(), Some("https://video.example/42.mp4"));
    }

    #[tokio::test]
    async fn test_generate_maps_server_error_to_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/models/gemini-test:generateContent")
            .match_query(mockito::Matcher::Any)
            .with_status(503)
            .with_body("unavailable")
            .create_async()
            .await;

        let settings = PrimarySettings {
            endpoint: server.url(),
            api_key: Some("k".into()),
            ..Default::default()
        };
        let client = GeminiClient::new(&settings).unwrap();
        let err = client.generate(&request(ToolConfig::None)).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_generate_round_trip() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-test:generateContent")
            .match_query(mockito::Matcher::UrlEncoded("key".into(), "k".into()))
            .with_status(200)
            .with_body(r#"{"candidates":[{"content":{"parts":[{"text":"hi there"}]}}]}"#)
            .create_async()
            .await;

        let settings = PrimarySettings {
            endpoint: server.url(),
            api_key: Some("k".into()),
            ..Default::default()
        };
        let client = GeminiClient::new(&settings).unwrap();
        let resp = client.generate(&request(ToolConfig::None)).await.unwrap();
        assert_eq!(resp.text, "hi there");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unavailable_backend_is_unreachable() {
        let backend = UnavailableBackend::new("no key");
        let err = backend.generate(&request(ToolConfig::None)).await.unwrap_err();
        assert!(matches!(err, InferError::ExternalServiceUnreachable(_)));
        assert!(!err.is_transient());
        assert!(!err.is_access_restricted());
    }

    #[test]
    fn test_missing_key_is_config_error() {
        assert!(matches!(
            GeminiClient::new(&PrimarySettings::default()),
            Err(InferError::Config(_))
        ));
    }
}
