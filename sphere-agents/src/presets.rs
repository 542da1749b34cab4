//! Provider presets
//!
//! Known backends with their wire format, default endpoint and model. A
//! [`GatewayConfig`] is resolved from a preset plus user overrides, and
//! decides which gateway implementation gets constructed.

use crate::ProviderError;

/// Request/response shape spoken by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireKind {
    OpenAiCompatible,
    Anthropic,
}

#[derive(Debug, Clone, Copy)]
pub struct ProviderPreset {
    pub id: &'static str,
    pub name: &'static str,
    pub kind: WireKind,
    pub base_url: Option<&'static str>,
    /// Placeholder key for local servers that ignore auth
    pub api_key: Option<&'static str>,
    pub default_model: Option<&'static str>,
    pub requires_key: bool,
}

pub const PRESETS: &[ProviderPreset] = &[
    ProviderPreset {
        id: "ollama",
        name: "Ollama",
        kind: WireKind::OpenAiCompatible,
        base_url: Some("http://localhost:11434/v1"),
        api_key: Some("ollama"),
        default_model: Some("llama3.2"),
        requires_key: false,
    },
    ProviderPreset {
        id: "lmstudio",
        name: "LM Studio",
        kind: WireKind::OpenAiCompatible,
        base_url: Some("http://localhost:1234/v1"),
        api_key: Some("lm-studio"),
        default_model: Some("local-model"),
        requires_key: false,
    },
    ProviderPreset {
        id: "openai",
        name: "OpenAI",
        kind: WireKind::OpenAiCompatible,
        base_url: Some("https://api.openai.com/v1"),
        api_key: None,
        default_model: Some("gpt-4o"),
        requires_key: true,
    },
    ProviderPreset {
        id: "anthropic",
        name: "Anthropic",
        kind: WireKind::Anthropic,
        base_url: Some("https://api.anthropic.com"),
        api_key: None,
        default_model: Some("claude-3-5-sonnet-20241022"),
        requires_key: true,
    },
    ProviderPreset {
        id: "morpheus",
        name: "Morpheus",
        kind: WireKind::OpenAiCompatible,
        base_url: Some("https://api.mor.org/v1"),
        api_key: None,
        default_model: Some("morpheus-default"),
        requires_key: true,
    },
    ProviderPreset {
        id: "groq",
        name: "Groq",
        kind: WireKind::OpenAiCompatible,
        base_url: Some("https://api.groq.com/openai/v1"),
        api_key: None,
        default_model: Some("llama-3.3-70b-versatile"),
        requires_key: true,
    },
    ProviderPreset {
        id: "together",
        name: "Together AI",
        kind: WireKind::OpenAiCompatible,
        base_url: Some("https://api.together.xyz/v1"),
        api_key: None,
        default_model: Some("meta-llama/Llama-3.3-70B-Instruct-Turbo"),
        requires_key: true,
    },
    ProviderPreset {
        id: "openrouter",
        name: "OpenRouter",
        kind: WireKind::OpenAiCompatible,
        base_url: Some("https://openrouter.ai/api/v1"),
        api_key: None,
        default_model: Some("anthropic/claude-3.5-sonnet"),
        requires_key: true,
    },
    ProviderPreset {
        id: "deepseek",
        name: "DeepSeek",
        kind: WireKind::OpenAiCompatible,
        base_url: Some("https://api.deepseek.com/v1"),
        api_key: None,
        default_model: Some("deepseek-chat"),
        requires_key: true,
    },
    ProviderPreset {
        id: "custom",
        name: "Custom OpenAI-Compatible",
        kind: WireKind::OpenAiCompatible,
        base_url: None,
        api_key: None,
        default_model: None,
        requires_key: false,
    },
];

/// Look up a preset by id (case-insensitive)
pub fn preset(id: &str) -> Option<&'static ProviderPreset> {
    PRESETS.iter().find(|p| p.id.eq_ignore_ascii_case(id))
}

pub fn preset_ids() -> Vec<&'static str> {
    PRESETS.iter().map(|p| p.id).collect()
}

/// Resolved backend configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Preset id
    pub provider: String,
    pub provider_name: String,
    pub kind: WireKind,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl GatewayConfig {
    /// Resolve a preset with optional overrides, validating required fields
    pub fn from_preset(
        provider: &str,
        api_key: Option<&str>,
        model: Option<&str>,
        base_url: Option<&str>,
    ) -> Result<Self, ProviderError> {
        let preset = preset(provider).ok_or_else(|| {
            ProviderError::Config(format!(
                "Unknown provider '{}'. Known providers: {}",
                provider,
                preset_ids().join(", ")
            ))
        })?;

        let base_url = base_url
            .or(preset.base_url)
            .ok_or_else(|| ProviderError::Config("Base URL is required for this provider".to_string()))?;

        let model = model
            .or(preset.default_model)
            .ok_or_else(|| ProviderError::Config("Model is required for this provider".to_string()))?;

        let api_key = api_key.filter(|k| !k.is_empty()).or(preset.api_key);
        if preset.requires_key && api_key.is_none() {
            return Err(ProviderError::Config(format!(
                "API key required for {}",
                preset.name
            )));
        }

        Ok(Self {
            provider: preset.id.to_string(),
            provider_name: preset.name.to_string(),
            kind: preset.kind,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(str::to_string),
            model: model.to_string(),
        })
    }
}
