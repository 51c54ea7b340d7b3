//! OpenAI-compatible chat completions client.

use crate::core::config::TranslationConfig;
use crate::error::{FolioError, Result};
use crate::translation::Translator;
use crate::translation::prompts::{CORRECTION_CONTEXT, correction_instruction, translation_instruction};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Translator backed by a chat completions endpoint.
pub struct HttpTranslator {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f32,
}

impl std::fmt::Debug for HttpTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTranslator")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl HttpTranslator {
    /// Build a client from configuration.
    ///
    /// Fails with a configuration error when no API key is set in the config
    /// or in the environment variable named by `api_key_env`.
    pub fn from_config(config: &TranslationConfig) -> Result<Self> {
        let api_key = config.resolve_api_key().ok_or_else(|| {
            FolioError::configuration(format!(
                "No API key for translation: set translation.api_key or {}",
                config.api_key_env
            ))
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FolioError::configuration_with_source("Failed to build HTTP client", e))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
        })
    }

    fn messages(text: &str, target_language: &str, context: Option<&str>) -> Vec<Message> {
        let system = match context {
            Some(CORRECTION_CONTEXT) => correction_instruction(target_language),
            other => translation_instruction(target_language, other),
        };
        vec![
            Message {
                role: "system",
                content: system,
            },
            Message {
                role: "user",
                content: text.to_string(),
            },
        ]
    }
}

fn is_quota_error(status: StatusCode, body: &str) -> bool {
    let body = body.to_lowercase();
    status == StatusCode::TOO_MANY_REQUESTS || body.contains("quota") || body.contains("insufficient_quota")
}

#[async_trait]
impl Translator for HttpTranslator {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn translate(&self, text: &str, target_language: &str, context: Option<&str>) -> Result<String> {
        let start = Instant::now();
        let request = ChatRequest {
            model: &self.model,
            messages: Self::messages(text, target_language, context),
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| FolioError::translation_with_source("Failed to send translation request", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if is_quota_error(status, &error_text) {
                return Err(FolioError::translation(format!(
                    "Translation quota exceeded ({status}): {error_text}"
                )));
            }
            return Err(FolioError::translation(format!(
                "Translation API error ({status}): {error_text}"
            )));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| FolioError::translation_with_source("Failed to parse translation response", e))?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| FolioError::translation("Translation response contained no choices"))?;

        tracing::debug!(
            model = %self.model,
            context = ?context,
            latency_ms = start.elapsed().as_millis() as u64,
            "Translation request completed"
        );

        Ok(content.trim().to_string())
    }
}
