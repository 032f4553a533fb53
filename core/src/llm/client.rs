//! LLM Client implementation
//!
//! Supports two backends:
//! - Ollama chat (`/api/chat`, NDJSON streaming, `format` schema)
//! - OpenAI-compatible chat completions (`response_format` schema)

use super::chat::{ChatMessage, ChatRequest};
use super::stream::{LineBuffer, NdjsonBuffer};
use super::ModelClient;
use crate::error::{ClaError, ModelError};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client as HttpClient, Response,
};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default Ollama endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434/api/generate";
pub const DEFAULT_MODEL: &str = "mistral:instruct";

/// LLM Provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Ollama native chat API
    #[default]
    Ollama,
    /// OpenAI-compatible API (OpenAI, LM Studio, vLLM, llama.cpp server)
    #[serde(alias = "openai-compatible")]
    OpenAi,
}

impl std::str::FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(LlmProvider::Ollama),
            "openai" | "openai-compatible" | "lmstudio" | "local" | "vllm" => Ok(LlmProvider::OpenAi),
            _ => Err(format!("Unknown LLM provider: {}", s)),
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::Ollama => write!(f, "Ollama"),
            LlmProvider::OpenAi => write!(f, "OpenAI Compatible"),
        }
    }
}

/// Connection settings for [`LlmClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub request_timeout: Duration,
    /// Declare the response schema to the backend
    pub structured_output: bool,
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Ollama,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            request_timeout: Duration::from_secs(120),
            structured_output: true,
            api_key: None,
        }
    }
}

impl LlmConfig {
    /// URL the chat request is posted to.
    pub fn chat_url(&self) -> String {
        let endpoint = self.endpoint.trim_end_matches('/');
        match self.provider {
            LlmProvider::Ollama => {
                if let Some(base) = endpoint.strip_suffix("/api/generate") {
                    format!("{}/api/chat", base)
                } else if endpoint.ends_with("/api/chat") {
                    endpoint.to_string()
                } else {
                    format!("{}/api/chat", endpoint)
                }
            }
            LlmProvider::OpenAi => {
                if endpoint.ends_with("/chat/completions") {
                    endpoint.to_string()
                } else {
                    format!("{}/chat/completions", endpoint)
                }
            }
        }
    }
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a serde_json::Value>,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiStreamResponse {
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiDelta,
}

#[derive(Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
}

/// HTTP model client
pub struct LlmClient {
    config: LlmConfig,
    http_client: HttpClient,
}

impl LlmClient {
    /// Create a new LLM client
    pub fn new(config: LlmConfig) -> Result<Self, ClaError> {
        if !(config.endpoint.starts_with("http://") || config.endpoint.starts_with("https://")) {
            return Err(ClaError::invalid_config(format!(
                "endpoint must start with http:// or https://, got '{}'",
                config.endpoint
            )));
        }

        let http_client = HttpClient::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("cla/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClaError::invalid_config(format!("failed to build HTTP client: {}", e)))?;

        Ok(LlmClient {
            config,
            http_client,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn provider(&self) -> LlmProvider {
        self.config.provider
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Send one request; retries once without the schema if the backend
    /// refuses it.
    pub async fn chat(&self, request: &ChatRequest) -> Result<String, ModelError> {
        let request_owned;
        let request = if self.config.structured_output {
            request
        } else {
            request_owned = request.without_schema();
            &request_owned
        };

        let started = std::time::Instant::now();
        debug!(
            provider = %self.config.provider,
            messages = request.messages.len(),
            chars = request.size(),
            structured = request.schema.is_some(),
            "sending model request"
        );

        let result = match self.send_once(request).await {
            Err(e) if request.schema.is_some() && e.is_schema_rejection() => {
                warn!(error = %e, "backend rejected response schema, retrying as free text");
                self.send_once(&request.without_schema()).await
            }
            other => other,
        };

        match &result {
            Ok(text) => info!(
                chars = text.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "model responded"
            ),
            Err(e) => warn!(error = %e, "model request failed"),
        }
        result
    }

    async fn send_once(&self, request: &ChatRequest) -> Result<String, ModelError> {
        let limit = self.config.request_timeout;
        let call = async {
            match self.config.provider {
                LlmProvider::Ollama => self.chat_ollama(request).await,
                LlmProvider::OpenAi => self.chat_openai(request).await,
            }
        };
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(ModelError::Timeout { duration: limit }),
        }
    }

    async fn post<T: Serialize + ?Sized>(&self, body: &T) -> Result<Response, ModelError> {
        let response = self
            .http_client
            .post(self.config.chat_url())
            .headers(self.build_headers()?)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                v.get("error")
                    .and_then(|e| e.get("message").or(Some(e)))
                    .and_then(|m| m.as_str().map(str::to_string))
            })
            .unwrap_or(body);
        Err(ModelError::Http {
            status: status.as_u16(),
            message,
        })
    }

    async fn chat_ollama(&self, request: &ChatRequest) -> Result<String, ModelError> {
        let body = OllamaRequest {
            model: &self.config.model,
            messages: &request.messages,
            stream: true,
            format: request.schema.as_ref(),
            options: OllamaOptions {
                temperature: self.config.temperature,
            },
        };

        let response = self.post(&body).await?;
        let mut stream = response.bytes_stream();
        let mut buffer = NdjsonBuffer::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.map_transport_error(e))?;
            buffer.push(&chunk)?;
            if buffer.is_done() {
                break;
            }
        }

        buffer.finish()
    }

    async fn chat_openai(&self, request: &ChatRequest) -> Result<String, ModelError> {
        let body = OpenAiRequest {
            model: &self.config.model,
            messages: &request.messages,
            temperature: self.config.temperature,
            stream: false,
            response_format: request.schema.as_ref().map(|schema| {
                serde_json::json!({
                    "type": "json_schema",
                    "json_schema": {
                        "name": "action_response",
                        "schema": schema,
                        "strict": true
                    }
                })
            }),
        };

        let response = self.post(&body).await?;
        let text = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        let parsed: OpenAiResponse = serde_json::from_str(&text)
            .map_err(|e| ModelError::protocol(format!("Failed to parse OpenAI response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| ModelError::protocol("response contained no choices"))
    }

    /// Stream text deltas for free-form chat. No schema is declared.
    pub fn chat_stream<'a>(
        &'a self,
        messages: &'a [ChatMessage],
    ) -> Pin<Box<dyn Stream<Item = Result<String, ModelError>> + Send + 'a>> {
        Box::pin(async_stream::try_stream! {
            match self.config.provider {
                LlmProvider::Ollama => {
                    let body = OllamaRequest {
                        model: &self.config.model,
                        messages,
                        stream: true,
                        format: None,
                        options: OllamaOptions {
                            temperature: self.config.temperature,
                        },
                    };
                    let response = self.post(&body).await?;
                    let mut stream = response.bytes_stream();
                    let mut buffer = NdjsonBuffer::new();
                    while let Some(chunk) = stream.next().await {
                        let chunk = chunk.map_err(|e| self.map_transport_error(e))?;
                        for delta in buffer.push(&chunk)? {
                            yield delta;
                        }
                        if buffer.is_done() {
                            break;
                        }
                    }
                    buffer.finish()?;
                }
                LlmProvider::OpenAi => {
                    let body = OpenAiRequest {
                        model: &self.config.model,
                        messages,
                        temperature: self.config.temperature,
                        stream: true,
                        response_format: None,
                    };
                    let response = self.post(&body).await?;
                    let mut stream = response.bytes_stream();
                    let mut lines = LineBuffer::new();
                    'outer: while let Some(chunk) = stream.next().await {
                        let chunk = chunk.map_err(|e| self.map_transport_error(e))?;
                        for line in lines.push(&chunk) {
                            let Some(data) = line.strip_prefix("data: ") else {
                                continue;
                            };
                            if data.trim() == "[DONE]" {
                                break 'outer;
                            }
                            if let Ok(parsed) = serde_json::from_str::<OpenAiStreamResponse>(data) {
                                if let Some(delta) = parsed.choices.into_iter().next().and_then(|c| c.delta.content) {
                                    yield delta;
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    /// Build headers for API requests
    fn build_headers(&self) -> Result<HeaderMap, ModelError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|_| ModelError::protocol("API key contains characters not allowed in a header"))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    fn map_transport_error(&self, err: reqwest::Error) -> ModelError {
        if err.is_timeout() {
            ModelError::Timeout {
                duration: self.config.request_timeout,
            }
        } else {
            ModelError::from(err)
        }
    }
}

#[async_trait]
impl ModelClient for LlmClient {
    async fn send(&self, request: &ChatRequest) -> Result<String, ModelError> {
        self.chat(request).await
    }
}
