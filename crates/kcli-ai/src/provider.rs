//! Provider abstraction: a narrow {name, validate, query} seam over a tagged
//! provider kind, value-typed with one shared HTTP client captured at
//! construction.

use async_trait::async_trait;
use kcli_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_COMPLETION_TOKENS: u32 = 1024;

/// The seam the analysis pipeline talks through; the production
/// implementation is [`ProviderClient`], tests substitute a counter-backed
/// mock.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn provider_name(&self) -> String;
    fn validate(&self) -> Result<()>;
    async fn query(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    OpenRouter,
}

impl ProviderKind {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" => Ok(ProviderKind::Anthropic),
            "openrouter" => Ok(ProviderKind::OpenRouter),
            other => Err(Error::InvalidArgument(format!("unknown provider '{other}'"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenRouter => "openrouter",
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::Anthropic => "claude-3-5-haiku-latest",
            ProviderKind::OpenRouter => "meta-llama/llama-3.3-70b-instruct",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_key: String,
    pub model: String,
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind, api_key: String, model: Option<String>) -> Self {
        let model = model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| kind.default_model().to_string());
        Self {
            kind,
            api_key: api_key.trim().to_string(),
            model,
        }
    }
}

// OpenAI-compatible wire shapes (OpenAI and OpenRouter).
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

// Anthropic messages API shapes.
#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: String,
}

pub struct ProviderClient {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl ProviderClient {
    pub fn new(config: ProviderConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, http }
    }

    fn map_status(status: reqwest::StatusCode, body: String) -> Error {
        if status.is_server_error() {
            Error::Transient(format!("provider HTTP {status}: {body}"))
        } else if status.as_u16() == 429 {
            Error::Transient(format!("provider rate limited: {body}"))
        } else {
            Error::InvalidArgument(format!("provider HTTP {status}: {body}"))
        }
    }

    async fn query_openai_compatible(&self, base: &str, system: &str, user: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.2,
            max_tokens: MAX_COMPLETION_TOKENS,
        };
        let response = self
            .http
            .post(format!("{base}/chat/completions"))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Transient(format!("provider request: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, body));
        }
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Internal(format!("provider response decode: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::Internal("provider returned no choices".into()))
    }

    async fn query_anthropic(&self, system: &str, user: &str) -> Result<String> {
        let body = AnthropicRequest {
            model: &self.config.model,
            max_tokens: MAX_COMPLETION_TOKENS,
            system,
            messages: vec![ChatMessage {
                role: "user",
                content: user,
            }],
        };
        let response = self
            .http
            .post(format!("{ANTHROPIC_API_BASE}/messages"))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Transient(format!("provider request: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, body));
        }
        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| Error::Internal(format!("provider response decode: {e}")))?;
        let text: String = parsed
            .content
            .into_iter()
            .map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            return Err(Error::Internal("provider returned no content".into()));
        }
        Ok(text)
    }
}

#[async_trait]
impl ChatBackend for ProviderClient {
    fn provider_name(&self) -> String {
        self.config.kind.as_str().to_string()
    }

    fn validate(&self) -> Result<()> {
        if self.config.api_key.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "provider '{}' has no API key configured",
                self.config.kind.as_str()
            )));
        }
        Ok(())
    }

    async fn query(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        match self.config.kind {
            ProviderKind::OpenAi => {
                self.query_openai_compatible(OPENAI_API_BASE, system_prompt, user_prompt)
                    .await
            }
            ProviderKind::OpenRouter => {
                self.query_openai_compatible(OPENROUTER_API_BASE, system_prompt, user_prompt)
                    .await
            }
            ProviderKind::Anthropic => self.query_anthropic(system_prompt, user_prompt).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_parsing() {
        assert_eq!(ProviderKind::parse("OpenAI").unwrap(), ProviderKind::OpenAi);
        assert_eq!(
            ProviderKind::parse(" anthropic ").unwrap(),
            ProviderKind::Anthropic
        );
        assert!(ProviderKind::parse("palm").is_err());
    }

    #[test]
    fn model_defaults_per_kind() {
        let c = ProviderConfig::new(ProviderKind::Anthropic, "key".into(), None);
        assert_eq!(c.model, "claude-3-5-haiku-latest");
        let c = ProviderConfig::new(ProviderKind::OpenAi, "key".into(), Some("gpt-4o".into()));
        assert_eq!(c.model, "gpt-4o");
    }

    #[test]
    fn empty_key_fails_validation() {
        let client = ProviderClient::new(ProviderConfig::new(
            ProviderKind::OpenAi,
            "  ".into(),
            None,
        ));
        assert!(client.validate().is_err());
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            ProviderClient::map_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR, String::new()),
            Error::Transient(_)
        ));
        assert!(matches!(
            ProviderClient::map_status(reqwest::StatusCode::TOO_MANY_REQUESTS, String::new()),
            Error::Transient(_)
        ));
        assert!(matches!(
            ProviderClient::map_status(reqwest::StatusCode::BAD_REQUEST, String::new()),
            Error::InvalidArgument(_)
        ));
    }
}
