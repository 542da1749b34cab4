//! Provider gateway
//!
//! One call interface over every model backend. Callers build a
//! [`CompletionRequest`] and get back completion text or a classified
//! [`ProviderError`]; endpoint, auth and payload shape stay in here.
//!
//! Supports OpenAI-compatible APIs (OpenAI, Ollama, LM Studio, Groq, ...)
//! and Anthropic Claude.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::{GatewayConfig, WireKind};

/// Classified provider failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited: {0}")]
    RateLimit(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimit(_) | ProviderError::Timeout(_) | ProviderError::Network(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ProviderError::Timeout(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: &str) -> Self {
        Self { role: ChatRole::System, content: content.to_string() }
    }

    pub fn user(content: &str) -> Self {
        Self { role: ChatRole::User, content: content.to_string() }
    }
}

/// Sampling parameters sent with every request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

/// Ordered role/content messages plus sampling parameters
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub sampling: SamplingParams,
}

impl CompletionRequest {
    /// Role context (system prompt) followed by the prompt itself
    pub fn new(system: &str, user: &str) -> Self {
        Self {
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            sampling: SamplingParams::default(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.sampling.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.sampling.max_tokens = max_tokens;
        self
    }

    /// All system messages joined, if any
    pub fn system_prompt(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect();
        (!parts.is_empty()).then(|| parts.join("\n\n"))
    }

    /// The last user message
    pub fn prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
    }
}

/// Uniform interface over model backends
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Send one request and return the completion text
    async fn send(&self, request: &CompletionRequest) -> Result<String, ProviderError>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Human-readable provider name
    fn provider_name(&self) -> &str;

    /// `Provider (model)` label used in reports
    fn label(&self) -> String {
        format!("{} ({})", self.provider_name(), self.model_name())
    }
}

/// OpenAI-compatible backend
pub struct OpenAiCompatibleGateway {
    client: Client<OpenAIConfig>,
    config: GatewayConfig,
}

impl OpenAiCompatibleGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, ProviderError> {
        let mut openai_config = OpenAIConfig::new().with_api_base(&config.base_url);

        if let Some(api_key) = &config.api_key {
            openai_config = openai_config.with_api_key(api_key);
        }

        let client = Client::with_config(openai_config);

        Ok(Self { client, config })
    }

    fn to_openai_message(message: &ChatMessage) -> Result<ChatCompletionRequestMessage, ProviderError> {
        let built = match message.role {
            ChatRole::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(message.content.as_str())
                .build()
                .map(ChatCompletionRequestMessage::System),
            ChatRole::User => ChatCompletionRequestUserMessageArgs::default()
                .content(message.content.as_str())
                .build()
                .map(ChatCompletionRequestMessage::User),
        };
        built.map_err(|e| ProviderError::Config(e.to_string()))
    }
}

/// Map an `async-openai` error onto the provider taxonomy
pub fn classify_openai_error(error: OpenAIError) -> ProviderError {
    match error {
        OpenAIError::Reqwest(e) if e.is_timeout() => ProviderError::Timeout(e.to_string()),
        OpenAIError::Reqwest(e) => ProviderError::Network(e.to_string()),
        OpenAIError::ApiError(api) => {
            // type/code/message all carry classification hints; search them together
            let haystack = format!("{:?}", api).to_lowercase();
            classify_api_message(&haystack, api.message)
        }
        OpenAIError::JSONDeserialize(e) => ProviderError::InvalidResponse(e.to_string()),
        OpenAIError::InvalidArgument(msg) => ProviderError::Config(msg),
        other => ProviderError::Network(other.to_string()),
    }
}

fn classify_api_message(haystack: &str, message: String) -> ProviderError {
    if haystack.contains("invalid_api_key")
        || haystack.contains("authentication")
        || haystack.contains("api key")
        || haystack.contains("unauthorized")
    {
        ProviderError::Auth(message)
    } else if haystack.contains("rate_limit")
        || haystack.contains("rate limit")
        || haystack.contains("insufficient_quota")
    {
        ProviderError::RateLimit(message)
    } else if haystack.contains("server_error") || haystack.contains("overloaded") {
        ProviderError::Network(message)
    } else {
        ProviderError::InvalidResponse(message)
    }
}

#[async_trait]
impl ProviderGateway for OpenAiCompatibleGateway {
    async fn send(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let messages = request
            .messages
            .iter()
            .map(Self::to_openai_message)
            .collect::<Result<Vec<_>, _>>()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.config.model)
            .messages(messages)
            .temperature(request.sampling.temperature)
            .max_tokens(request.sampling.max_tokens)
            .build()
            .map_err(|e| ProviderError::Config(e.to_string()))?;

        debug!("Sending chat completion to {} ({})", self.config.base_url, self.config.model);

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(classify_openai_error)?;

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| ProviderError::InvalidResponse("response has no message content".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn provider_name(&self) -> &str {
        &self.config.provider_name
    }
}

/// Anthropic API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Claude backend
pub struct AnthropicGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl AnthropicGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, ProviderError> {
        if config.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(ProviderError::Config("Anthropic requires an API key".to_string()));
        }
        let client = reqwest::Client::new();
        Ok(Self { client, config })
    }

    /// Anthropic wants the system prompt outside the message list
    fn request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| serde_json::json!({"role": m.role, "content": m.content}))
            .collect();

        let mut body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": request.sampling.max_tokens,
            "temperature": request.sampling.temperature,
            "messages": messages,
        });
        if let Some(system) = request.system_prompt() {
            body["system"] = serde_json::Value::String(system);
        }
        body
    }
}

/// Map a non-success HTTP status onto the provider taxonomy
pub fn classify_status(status: u16, body: &str) -> ProviderError {
    let detail = format!("HTTP {}: {}", status, truncate(body, 500));
    match status {
        401 | 403 => ProviderError::Auth(detail),
        429 => ProviderError::RateLimit(detail),
        408 | 504 => ProviderError::Timeout(detail),
        500..=599 => ProviderError::Network(detail),
        _ => ProviderError::InvalidResponse(detail),
    }
}

/// Pull the first text block out of an Anthropic messages response
pub fn parse_anthropic_response(json: &serde_json::Value) -> Result<String, ProviderError> {
    json["content"]
        .as_array()
        .and_then(|arr| arr.iter().find(|block| block["type"] == "text" || block["text"].is_string()))
        .and_then(|block| block["text"].as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ProviderError::InvalidResponse("response has no text content".to_string()))
}

#[async_trait]
impl ProviderGateway for AnthropicGateway {
    async fn send(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        let api_key = self.config.api_key.as_deref().unwrap_or_default();

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        parse_anthropic_response(&json)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn provider_name(&self) -> &str {
        &self.config.provider_name
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Thread-safe reference to a gateway
pub type SharedGateway = Arc<dyn ProviderGateway>;

/// Create the gateway matching the configured wire kind
pub fn create_gateway(config: GatewayConfig) -> Result<SharedGateway, ProviderError> {
    match config.kind {
        WireKind::OpenAiCompatible => Ok(Arc::new(OpenAiCompatibleGateway::new(config)?)),
        WireKind::Anthropic => Ok(Arc::new(AnthropicGateway::new(config)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GatewayConfig;

    #[test]
    fn test_retryable_kinds() {
        assert!(ProviderError::RateLimit("x".into()).is_retryable());
        assert!(ProviderError::Timeout("x".into()).is_retryable());
        assert!(ProviderError::Network("x".into()).is_retryable());
        assert!(!ProviderError::Auth("x".into()).is_retryable());
        assert!(!ProviderError::InvalidResponse("x".into()).is_retryable());
        assert!(!ProviderError::Config("x".into()).is_retryable());
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(classify_status(401, "bad key"), ProviderError::Auth(_)));
        assert!(matches!(classify_status(403, ""), ProviderError::Auth(_)));
        assert!(matches!(classify_status(429, "slow down"), ProviderError::RateLimit(_)));
        assert!(matches!(classify_status(504, ""), ProviderError::Timeout(_)));
        assert!(matches!(classify_status(529, "overloaded"), ProviderError::Network(_)));
        assert!(matches!(classify_status(400, "bad request"), ProviderError::InvalidResponse(_)));
    }

    #[test]
    fn test_classify_api_message() {
        let auth = "apierror { message: \"incorrect api key provided\", code: some(\"invalid_api_key\") }";
        assert!(matches!(classify_api_message(auth, "m".into()), ProviderError::Auth(_)));

        let limited = "apierror { code: some(\"rate_limit_exceeded\") }";
        assert!(matches!(classify_api_message(limited, "m".into()), ProviderError::RateLimit(_)));

        let other = "apierror { message: \"model not found\" }";
        assert!(matches!(classify_api_message(other, "m".into()), ProviderError::InvalidResponse(_)));
    }

    #[test]
    fn test_parse_anthropic_response() {
        let ok = serde_json::json!({"content": [{"type": "text", "text": "hello"}]});
        assert_eq!(parse_anthropic_response(&ok).unwrap(), "hello");

        let empty = serde_json::json!({"content": []});
        assert!(matches!(parse_anthropic_response(&empty), Err(ProviderError::InvalidResponse(_))));

        let garbage = serde_json::json!({"error": "nope"});
        assert!(parse_anthropic_response(&garbage).is_err());
    }

    #[test]
    fn test_anthropic_body_moves_system_prompt() {
        let config = GatewayConfig::from_preset("anthropic", Some("sk-ant"), None, None).unwrap();
        let gateway = AnthropicGateway::new(config).unwrap();
        let request = CompletionRequest::new("be brief", "hi").with_temperature(0.5);

        let body = gateway.request_body(&request);
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["temperature"], 0.5);
    }

    #[test]
    fn test_anthropic_requires_key() {
        let mut config = GatewayConfig::from_preset("anthropic", Some("k"), None, None).unwrap();
        config.api_key = None;
        assert!(matches!(AnthropicGateway::new(config), Err(ProviderError::Config(_))));
    }

    #[test]
    fn test_request_accessors() {
        let request = CompletionRequest::new("sys", "user text");
        assert_eq!(request.system_prompt().as_deref(), Some("sys"));
        assert_eq!(request.prompt(), Some("user text"));
    }

    #[test]
    fn test_create_gateway_selects_backend_by_kind() {
        let local = GatewayConfig::from_preset("ollama", None, None, None).unwrap();
        let gateway = create_gateway(local).unwrap();
        assert_eq!(gateway.label(), "Ollama (llama3.2)");

        let claude = GatewayConfig::from_preset("anthropic", Some("sk-ant"), None, None).unwrap();
        let gateway = create_gateway(claude).unwrap();
        assert_eq!(gateway.provider_name(), "Anthropic");
    }
}
