use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::shape::{Prompt, PromptPart};
use crate::types::{describe_schema, to_response_schema, TypeDef};

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const GEMINI_DEFAULT_MODEL: &str = "gemini-2.0-flash";
const OLLAMA_ENDPOINT: &str = "http://localhost:11434";
const OLLAMA_DEFAULT_MODEL: &str = "llama3.2:3b";
const MOCK_ENDPOINT: &str = "http://localhost:8081/llm";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ERROR_BODY: usize = 200;

/// One structured-output request to a hosted model.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub shape_id: &'a str,
    pub prompt: &'a Prompt,
    pub output_schema: &'a TypeDef,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP error calling {url}: {message}")]
    Transport { url: String, message: String },
    #[error("model backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),
    #[error("{provider} backend does not accept {mime_type} media")]
    UnsupportedMedia {
        provider: &'static str,
        mime_type: String,
    },
    #[error("model backend returned no output")]
    NoOutput,
    #[error("invalid backend configuration: {0}")]
    Config(String),
}

impl BackendError {
    /// Whether another attempt could succeed. Rate limits and server-side
    /// failures can; bad requests, credentials and configuration cannot.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Transport { .. } | BackendError::Timeout(_) | BackendError::NoOutput => {
                true
            }
            BackendError::Status { status, .. } => *status == 429 || *status >= 500,
            BackendError::UnsupportedMedia { .. } | BackendError::Config(_) => false,
        }
    }
}

/// The hosted generative-model service, seen as a black box that returns
/// the raw text of a structured (JSON) answer.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn generate(&self, request: ModelRequest<'_>) -> Result<String, BackendError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LlmProvider {
    /// Google Gemini generateContent with responseSchema.
    Gemini,
    /// Local Ollama /api/generate in JSON mode.
    Ollama,
    /// The bundled mock-llm-server.
    Mock,
}

impl LlmProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            LlmProvider::Gemini => "gemini",
            LlmProvider::Ollama => "ollama",
            LlmProvider::Mock => "mock",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    provider: LlmProvider,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl LlmClient {
    pub fn new(settings: LlmSettings) -> Result<Self, BackendError> {
        let (default_url, default_model) = match settings.provider {
            LlmProvider::Gemini => (GEMINI_ENDPOINT, GEMINI_DEFAULT_MODEL),
            LlmProvider::Ollama => (OLLAMA_ENDPOINT, OLLAMA_DEFAULT_MODEL),
            LlmProvider::Mock => (MOCK_ENDPOINT, "mock"),
        };

        let api_key = settings.api_key.filter(|k| !k.trim().is_empty());
        if settings.provider == LlmProvider::Gemini && api_key.is_none() {
            return Err(BackendError::Config("Gemini API key is required".to_string()));
        }

        // No request timeout here: the flow's invocation policy owns it.
        let mut builder = Client::builder().connect_timeout(CONNECT_TIMEOUT);
        if settings.provider != LlmProvider::Gemini {
            // Ollama and the mock server run locally; bypass any system proxy.
            builder = builder.no_proxy();
        }
        let http = builder
            .build()
            .map_err(|e| BackendError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            provider: settings.provider,
            base_url: settings.base_url.unwrap_or_else(|| default_url.to_string()),
            model: settings.model.unwrap_or_else(|| default_model.to_string()),
            api_key,
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn call_gemini(&self, request: ModelRequest<'_>) -> Result<String, BackendError> {
        let url = format!(
            "{}/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let body = gemini_request_body(request.prompt, request.output_schema);
        let key = self.api_key.as_deref().unwrap_or_default();
        let key = HeaderValue::from_str(key)
            .map_err(|e| BackendError::Config(format!("invalid API key header: {e}")))?;

        let resp = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header("x-goog-api-key", key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport(&url, e))?;
        let resp = check_status(resp).await?;

        let parsed: GeminiResponse = resp.json().await.map_err(|e| transport(&url, e))?;
        extract_gemini_text(&parsed)
            .map(|text| clean_json_response(&text))
            .ok_or(BackendError::NoOutput)
    }

    async fn call_ollama(&self, request: ModelRequest<'_>) -> Result<String, BackendError> {
        #[derive(Serialize)]
        struct OllamaRequest<'a> {
            model: &'a str,
            prompt: &'a str,
            format: &'a str,
            stream: bool,
            #[serde(skip_serializing_if = "Vec::is_empty")]
            images: Vec<&'a str>,
        }

        #[derive(Deserialize)]
        struct OllamaResponse {
            response: String,
        }

        let mut images = Vec::new();
        for media in request.prompt.media_parts() {
            if !media.is_image() {
                return Err(BackendError::UnsupportedMedia {
                    provider: "ollama",
                    mime_type: media.mime_type().to_string(),
                });
            }
            images.push(media.data());
        }

        let url = if self.base_url.ends_with("/api/generate") {
            self.base_url.clone()
        } else {
            format!("{}/api/generate", self.base_url.trim_end_matches('/'))
        };
        let prompt = build_text_prompt(request.prompt, request.output_schema);

        let resp = self
            .http
            .post(&url)
            .json(&OllamaRequest {
                model: &self.model,
                prompt: &prompt,
                format: "json",
                stream: false,
                images,
            })
            .send()
            .await
            .map_err(|e| transport(&url, e))?;
        let resp = check_status(resp).await?;

        let body: OllamaResponse = resp.json().await.map_err(|e| transport(&url, e))?;
        Ok(clean_json_response(&body.response))
    }

    async fn call_mock_server(&self, request: ModelRequest<'_>) -> Result<String, BackendError> {
        #[derive(Serialize)]
        struct MockRequest<'a> {
            shape_id: &'a str,
            prompt: &'a str,
            media: Vec<&'a str>,
        }

        #[derive(Deserialize)]
        struct MockResponse {
            output: String,
        }

        let prompt = build_text_prompt(request.prompt, request.output_schema);
        let media = request.prompt.media_parts().map(|m| m.mime_type()).collect();

        let resp = self
            .http
            .post(&self.base_url)
            .json(&MockRequest {
                shape_id: request.shape_id,
                prompt: &prompt,
                media,
            })
            .send()
            .await
            .map_err(|e| transport(&self.base_url, e))?;
        let resp = check_status(resp).await?;

        let body: MockResponse = resp.json().await.map_err(|e| transport(&self.base_url, e))?;
        Ok(clean_json_response(&body.output))
    }
}

#[async_trait]
impl ModelBackend for LlmClient {
    async fn generate(&self, request: ModelRequest<'_>) -> Result<String, BackendError> {
        info!(
            provider = self.provider.as_str(),
            model = %self.model,
            shape = request.shape_id,
            prompt_bytes = request.prompt.byte_len(),
            "calling model backend"
        );
        match self.provider {
            LlmProvider::Gemini => self.call_gemini(request).await,
            LlmProvider::Ollama => self.call_ollama(request).await,
            LlmProvider::Mock => self.call_mock_server(request).await,
        }
    }
}

fn transport(url: &str, e: reqwest::Error) -> BackendError {
    BackendError::Transport {
        url: url.to_string(),
        message: e.to_string(),
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let mut body = resp.text().await.unwrap_or_default();
    // Truncate to avoid echoing large or sensitive payloads.
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(BackendError::Status {
        status: status.as_u16(),
        body,
    })
}

// -- Gemini wire types --

#[derive(Debug, Deserialize)]
pub struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

pub fn gemini_request_body(prompt: &Prompt, output_schema: &TypeDef) -> Value {
    let parts: Vec<Value> = prompt
        .parts()
        .iter()
        .map(|part| match part {
            PromptPart::Text(text) => json!({ "text": text }),
            PromptPart::Media(uri) => json!({
                "inlineData": { "mimeType": uri.mime_type(), "data": uri.data() }
            }),
        })
        .collect();

    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": to_response_schema(output_schema)
        }
    })
}

pub fn extract_gemini_text(response: &GeminiResponse) -> Option<String> {
    let content = response.candidates.first()?.content.as_ref()?;
    let text: String = content
        .parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .collect();
    if text.trim().is_empty() {
        debug!("Gemini response had no text parts");
        None
    } else {
        Some(text)
    }
}

/// Text-only prompt for backends without a structured-output mode: the
/// schema goes into the instructions instead.
pub fn build_text_prompt(prompt: &Prompt, output_schema: &TypeDef) -> String {
    let mut s = String::new();

    s.push_str("You are a system that strictly outputs JSON.\n");
    s.push_str("You must produce a JSON object that matches this schema:\n\n");
    s.push_str(&describe_schema(output_schema, 0));
    s.push_str("\nThe JSON must be parseable and not contain comments or explanations.\n");
    s.push_str("Do not wrap it in markdown code fences.\n\n");
    s.push_str("Task:\n");
    s.push_str(&prompt.render_text());
    s.push('\n');

    s
}

/// Strip markdown code fences that some models add around JSON.
pub fn clean_json_response(response: &str) -> String {
    let mut cleaned = response.trim();

    if let Some(rest) = cleaned.strip_prefix("```") {
        // Drop the info string (```json) along with the fence.
        cleaned = match rest.find('\n') {
            Some(idx) => &rest[idx + 1..],
            None => rest,
        };
        if let Some(body) = cleaned.trim_end().strip_suffix("```") {
            cleaned = body;
        }
    }

    cleaned.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldDef;

    fn schema() -> TypeDef {
        TypeDef::Object(vec![FieldDef::required("summary", TypeDef::Text, "A summary.")])
    }

    fn image_prompt() -> Prompt {
        Prompt::new()
            .text("Image: ")
            .media("$.image", "data:image/png;base64,AAA=")
            .unwrap()
    }

    #[test]
    fn gemini_body_carries_inline_media_and_schema() {
        let body = gemini_request_body(&image_prompt(), &schema());
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], "Image: ");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[1]["inlineData"]["data"], "AAA=");
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["responseSchema"]["required"][0], "summary");
    }

    #[test]
    fn gemini_text_parts_are_joined() {
        let response: GeminiResponse = serde_json::from_value(json!({
            "candidates": [{ "content": { "parts": [{ "text": "{\"summary\":" }, { "text": "\"ok\"}" }] } }]
        }))
        .unwrap();
        assert_eq!(extract_gemini_text(&response).as_deref(), Some("{\"summary\":\"ok\"}"));
    }

    #[test]
    fn gemini_without_candidates_has_no_output() {
        let response: GeminiResponse = serde_json::from_value(json!({ "candidates": [] })).unwrap();
        assert!(extract_gemini_text(&response).is_none());

        let blocked: GeminiResponse =
            serde_json::from_value(json!({ "candidates": [{ "finishReason": "SAFETY" }] })).unwrap();
        assert!(extract_gemini_text(&blocked).is_none());
    }

    #[test]
    fn text_prompt_embeds_schema_and_media_reference() {
        let text = build_text_prompt(&image_prompt(), &schema());
        assert!(text.contains("- summary (string, required): A summary."));
        assert!(text.contains("Image: {{media 0: image/png}}"));
    }

    #[test]
    fn code_fences_are_stripped() {
        assert_eq!(clean_json_response("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(clean_json_response("```{\"a\":1}```"), "{\"a\":1}");
        assert_eq!(clean_json_response("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn gemini_requires_api_key() {
        let settings = LlmSettings {
            provider: LlmProvider::Gemini,
            base_url: None,
            model: None,
            api_key: Some("  ".into()),
        };
        assert!(matches!(LlmClient::new(settings), Err(BackendError::Config(_))));
    }

    #[test]
    fn defaults_follow_provider() {
        let client = LlmClient::new(LlmSettings {
            provider: LlmProvider::Ollama,
            base_url: None,
            model: None,
            api_key: None,
        })
        .unwrap();
        assert_eq!(client.model(), OLLAMA_DEFAULT_MODEL);
        assert_eq!(client.provider(), LlmProvider::Ollama);
    }

    #[tokio::test]
    async fn mock_dialect_sends_shape_id_and_media_types() {
        use axum::routing::post;
        use axum::{Json, Router};

        async fn echo(Json(req): Json<Value>) -> Json<Value> {
            let output = json!({ "summary": format!("{} {}", req["shape_id"], req["media"]) });
            Json(json!({ "output": format!("```json\n{output}\n```") }))
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, Router::new().route("/llm", post(echo)))
                .await
                .unwrap();
        });

        let client = LlmClient::new(LlmSettings {
            provider: LlmProvider::Mock,
            base_url: Some(format!("http://{addr}/llm")),
            model: None,
            api_key: None,
        })
        .unwrap();
        let text = client
            .generate(ModelRequest {
                shape_id: "xray-analysis",
                prompt: &image_prompt(),
                output_schema: &schema(),
            })
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["summary"], r#""xray-analysis" ["image/png"]"#);
    }

    #[tokio::test]
    async fn ollama_rejects_audio_before_sending() {
        let client = LlmClient::new(LlmSettings {
            provider: LlmProvider::Ollama,
            base_url: Some("http://127.0.0.1:9".into()),
            model: None,
            api_key: None,
        })
        .unwrap();
        let prompt = Prompt::new()
            .media("$.audioDataUri", "data:audio/webm;base64,AAAA")
            .unwrap();
        let err = client
            .generate(ModelRequest {
                shape_id: "clinical-transcription",
                prompt: &prompt,
                output_schema: &schema(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::UnsupportedMedia { provider: "ollama", .. }));
    }
}
