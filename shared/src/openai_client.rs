use std::time::Duration;

use async_trait::async_trait;
use openai::chat::{ChatCompletionMessage, ChatCompletionMessageRole};
use reqwest::header;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::Settings;

/// Request body for an OpenAI-compatible `/chat/completions` endpoint.
///
/// `top_k` is not part of the OpenAI schema but is honoured by Together and
/// most other hosted Llama endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatCompletionMessage>,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub message: Option<ChoiceMessage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatResponse {
    /// Content of the first choice, if any.
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.as_deref())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ModelError {
    #[error("network error: {0}")]
    Network(String),
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("parse error: {0}")]
    Parse(serde_json::Error),
    #[error("no response content from model")]
    EmptyResponse,
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),
}

/// The hosted text-generation service.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn create_chat_completion(&self, req: &ChatRequest) -> Result<ChatResponse, ModelError>;
}

pub fn msg(role: ChatCompletionMessageRole, txt: &str) -> ChatCompletionMessage {
    ChatCompletionMessage {
        role,
        content: Some(txt.to_string()),
        ..Default::default()
    }
}

/// Talks to `{base_url}/chat/completions` with a bearer key.
#[derive(Clone)]
pub struct HttpChatBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpChatBackend {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModelError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ModelError> {
        Self::new(
            &settings.model_api_base,
            &settings.model_api_key,
            Duration::from_secs(settings.model_timeout_secs),
        )
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn create_chat_completion(&self, req: &ChatRequest) -> Result<ChatResponse, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!("\u{2192} model request: model = {}", req.model);
        let res = self
            .client
            .post(&url)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(req)
            .send()
            .await
            .map_err(|e| {
                error!("network error to model service: {e}");
                ModelError::Network(e.to_string())
            })?;

        let status = res.status();
        let bytes = res
            .bytes()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;
        debug!(
            %status,
            "\u{2190} body = {}",
            String::from_utf8_lossy(&bytes[..bytes.len().min(1024)])
        );

        if !status.is_success() {
            return Err(ModelError::Http {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        serde_json::from_slice(&bytes).map_err(ModelError::Parse)
    }
}
