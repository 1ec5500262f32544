//! Provider HTTP clients that turn a prompt into one suggested command.
//!
//! Model ids use the `provider/model` form (e.g. `openai/gpt-4o-mini`). Each
//! provider gets the same deterministic request: temperature 0, 256 output
//! tokens, one system message and one user message.

use crate::config::{TutrConfig, DEFAULT_OLLAMA_HOST};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const MAX_TOKENS: u32 = 256;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{provider} API error ({status}): {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("unexpected {provider} response: {detail}")]
    Malformed {
        provider: &'static str,
        detail: String,
    },

    #[error("no API key configured for {provider} (set {env_key} or run `tutr configure`)")]
    MissingApiKey {
        provider: &'static str,
        env_key: &'static str,
    },

    #[error("unsupported model '{0}': expected <provider>/<model> with provider gemini, anthropic, openai, xai, or ollama")]
    UnknownProvider(String),
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Parsed suggestion from the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub command: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub source: Option<String>,
}

impl CommandResponse {
    #[must_use]
    pub fn command_only(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            explanation: String::new(),
            source: None,
        }
    }
}

/// Anything that can answer a chat prompt with raw text.
pub trait ChatModel {
    /// # Errors
    ///
    /// Returns an [`LlmError`] on transport, auth, or response-shape failures.
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence line.
    match body.split_once('\n') {
        Some((tag, inner)) if !tag.contains(' ') => inner.trim(),
        _ => body.trim(),
    }
}

/// Parse model output; anything that is not the expected JSON becomes the command.
#[must_use]
pub fn parse_command_response(raw: &str) -> CommandResponse {
    let content = strip_code_fence(raw);
    match serde_json::from_str::<CommandResponse>(content) {
        Ok(response) => response,
        Err(err) => {
            debug!(%err, "model reply is not JSON; using raw content as command");
            CommandResponse::command_only(raw.trim())
        }
    }
}

/// Send `messages` through `model` and parse the reply.
///
/// # Errors
///
/// Propagates the model's [`LlmError`].
pub fn query_llm(messages: &[ChatMessage], model: &dyn ChatModel) -> Result<CommandResponse, LlmError> {
    let raw = model.complete(messages)?;
    debug!(raw = %raw, "raw model reply");
    Ok(parse_command_response(&raw))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provider {
    Gemini,
    Anthropic,
    OpenAi,
    Xai,
    Ollama,
}

impl Provider {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "gemini" => Some(Self::Gemini),
            "anthropic" => Some(Self::Anthropic),
            "openai" => Some(Self::OpenAi),
            "xai" => Some(Self::Xai),
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Xai => "xai",
            Self::Ollama => "ollama",
        }
    }

    fn env_key(self) -> &'static str {
        match self {
            Self::Gemini => "GEMINI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Xai => "XAI_API_KEY",
            Self::Ollama => "",
        }
    }
}

/// Blocking HTTP client for the configured provider.
#[derive(Debug)]
pub struct LlmClient {
    provider: Provider,
    model: String,
    api_key: Option<String>,
    base_url: String,
    http: reqwest::blocking::Client,
}

impl LlmClient {
    /// Build a client from the resolved config.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown providers, missing API keys, or when the
    /// HTTP client cannot be constructed.
    pub fn from_config(config: &TutrConfig) -> Result<Self, LlmError> {
        let (prefix, model) = config
            .model
            .split_once('/')
            .ok_or_else(|| LlmError::UnknownProvider(config.model.clone()))?;
        let provider =
            Provider::parse(prefix).ok_or_else(|| LlmError::UnknownProvider(config.model.clone()))?;
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(ToString::to_string);
        if provider != Provider::Ollama && api_key.is_none() {
            return Err(LlmError::MissingApiKey {
                provider: provider.name(),
                env_key: provider.env_key(),
            });
        }
        let base_url = match provider {
            Provider::Gemini => "https://generativelanguage.googleapis.com/v1beta".to_string(),
            Provider::Anthropic => "https://api.anthropic.com/v1".to_string(),
            Provider::OpenAi => "https://api.openai.com/v1".to_string(),
            Provider::Xai => "https://api.x.ai/v1".to_string(),
            Provider::Ollama => config
                .ollama_host
                .as_deref()
                .unwrap_or(DEFAULT_OLLAMA_HOST)
                .trim_end_matches('/')
                .to_string(),
        };
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            provider,
            model: model.to_string(),
            api_key,
            base_url,
            http,
        })
    }

    fn key(&self) -> &str {
        self.api_key.as_deref().unwrap_or_default()
    }

    fn post(&self, request: reqwest::blocking::RequestBuilder) -> Result<Value, LlmError> {
        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::Api {
                provider: self.provider.name(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<Value>()?)
    }

    fn malformed(&self, detail: &str) -> LlmError {
        LlmError::Malformed {
            provider: self.provider.name(),
            detail: detail.to_string(),
        }
    }

    fn complete_chat_completions(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0,
            "max_tokens": MAX_TOKENS,
        });
        let reply = self.post(
            self.http
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(self.key())
                .json(&body),
        )?;
        reply
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| self.malformed("missing choices[0].message.content"))
    }

    fn complete_anthropic(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let (system, rest) = split_system(messages);
        let body = json!({
            "model": self.model,
            "system": system,
            "messages": rest,
            "temperature": 0,
            "max_tokens": MAX_TOKENS,
        });
        let reply = self.post(
            self.http
                .post(format!("{}/messages", self.base_url))
                .header("x-api-key", self.key())
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body),
        )?;
        reply
            .pointer("/content/0/text")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| self.malformed("missing content[0].text"))
    }

    fn complete_gemini(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let (system, rest) = split_system(messages);
        let contents: Vec<Value> = rest
            .iter()
            .map(|message| {
                let role = if message.role == "assistant" { "model" } else { "user" };
                json!({ "role": role, "parts": [{ "text": message.content }] })
            })
            .collect();
        let body = json!({
            "systemInstruction": { "parts": [{ "text": system }] },
            "contents": contents,
            "generationConfig": { "temperature": 0, "maxOutputTokens": MAX_TOKENS },
        });
        let reply = self.post(
            self.http
                .post(format!(
                    "{}/models/{}:generateContent",
                    self.base_url, self.model
                ))
                .query(&[("key", self.key())])
                .json(&body),
        )?;
        reply
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| self.malformed("missing candidates[0].content.parts[0].text"))
    }

    fn complete_ollama(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": { "temperature": 0, "num_predict": MAX_TOKENS },
        });
        let reply = self.post(
            self.http
                .post(format!("{}/api/chat", self.base_url))
                .json(&body),
        )?;
        reply
            .pointer("/message/content")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| self.malformed("missing message.content"))
    }
}

impl ChatModel for LlmClient {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        debug!(provider = self.provider.name(), model = %self.model, "sending completion request");
        match self.provider {
            Provider::OpenAi | Provider::Xai => self.complete_chat_completions(messages),
            Provider::Anthropic => self.complete_anthropic(messages),
            Provider::Gemini => self.complete_gemini(messages),
            Provider::Ollama => self.complete_ollama(messages),
        }
    }
}

/// Join system messages into one string and return the remaining turns.
fn split_system(messages: &[ChatMessage]) -> (String, Vec<&ChatMessage>) {
    let system = messages
        .iter()
        .filter(|message| message.role == "system")
        .map(|message| message.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let rest = messages
        .iter()
        .filter(|message| message.role != "system")
        .collect();
    (system, rest)
}
