use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::inference::{InferenceBackend, InferenceError, InferenceRequest, InferenceResponse};
use super::ollama::map_transport_error;
use crate::config::CloudModelConfig;
use crate::models::BackendKind;

/// OpenAI-compatible `/chat/completions` backend.
///
/// The bearer key is read once, at construction, from the environment
/// variable named in the config. Without a key every call fails with
/// `NotConfigured`.
pub struct CloudBackend {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
    timeout: Duration,
}

impl CloudBackend {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::Unavailable(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client,
            timeout,
        })
    }

    pub fn from_config(config: &CloudModelConfig) -> Result<Self, InferenceError> {
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            tracing::debug!(
                env = %config.api_key_env,
                "Cloud API key not set, cloud backend disabled"
            );
        }
        Self::new(
            &config.base_url,
            &config.model,
            api_key,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
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
    content: Option<String>,
}

fn chat_request<'a>(model: &'a str, request: &'a InferenceRequest) -> ChatRequest<'a> {
    ChatRequest {
        model,
        messages: [
            ChatMessage {
                role: "system",
                content: &request.system,
            },
            ChatMessage {
                role: "user",
                content: &request.prompt,
            },
        ],
        temperature: 0.0,
        response_format: ResponseFormat {
            kind: "json_object",
        },
    }
}

#[async_trait]
impl InferenceBackend for CloudBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cloud
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(InferenceError::NotConfigured(BackendKind::Cloud))?;

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&chat_request(&self.model, request))
            .send()
            .await
            .map_err(|e| map_transport_error(e, &self.base_url, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::MalformedResponse(e.to_string()))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| InferenceError::MalformedResponse("no completion choices".into()))?;

        Ok(InferenceResponse {
            text,
            backend: BackendKind::Cloud,
            model: self.model.clone(),
        })
    }
}
