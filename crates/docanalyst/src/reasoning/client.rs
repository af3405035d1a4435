use std::time::Duration;

use log::debug;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::ReasoningConfig;
use crate::error::ConfigError;
use crate::pipeline::StageError;

/// Maximum length for error bodies copied into stage errors.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// A single-turn text completion.
pub trait CompletionClient: Send + Sync {
    fn complete(&self, system: &str, prompt: &str) -> Result<String, StageError>;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct ChatClient {
    http: reqwest::blocking::Client,
    url: String,
    model: String,
    temperature: f32,
    api_key: SecretString,
    timeout_secs: u64,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("url", &self.url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl ChatClient {
    pub fn new(config: &ReasoningConfig, api_key: SecretString) -> Result<Self, ConfigError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ConfigError::Validation {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            http,
            url: completions_url(&config.endpoint),
            model: config.model.clone(),
            temperature: config.temperature,
            api_key,
            timeout_secs: config.request_timeout_secs,
        })
    }

    /// Reads the API key from the environment variable named in the config.
    pub fn from_env(config: &ReasoningConfig) -> Result<Self, ConfigError> {
        let key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnv {
                name: config.api_key_env.clone(),
            })?;
        Self::new(config, SecretString::from(key))
    }
}

fn completions_url(endpoint: &str) -> String {
    format!("{}/chat/completions", endpoint.trim_end_matches('/'))
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: [ChatMessage<'a>; 2],
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
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

fn truncate_body(body: &str) -> String {
    crate::sanitize::truncate_for_log(body, MAX_ERROR_BODY_LENGTH)
}

/// Maps a non-success HTTP status to a stage error.
/// Rate limits and server errors may clear up; other client errors will not.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> StageError {
    let detail = format!("HTTP {}: {}", status.as_u16(), truncate_body(body));
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        StageError::Unavailable(detail)
    } else {
        StageError::Rejected(detail)
    }
}

fn extract_content(response: ChatResponse) -> Result<String, StageError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| StageError::MalformedResponse("completion has no content".to_string()))
}

impl CompletionClient for ChatClient {
    fn complete(&self, system: &str, prompt: &str) -> Result<String, StageError> {
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        debug!("POST {} (model {})", self.url, self.model);

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    StageError::Timeout(format!("request timed out after {}s", self.timeout_secs))
                } else {
                    StageError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| StageError::MalformedResponse(e.to_string()))?;

        extract_content(parsed)
    }
}
