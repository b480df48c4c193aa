use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::inference::{InferenceBackend, InferenceError, InferenceRequest, InferenceResponse};
use crate::config::LocalModelConfig;
use crate::models::BackendKind;

/// Ollama HTTP client for local inference (`/api/generate`, JSON mode).
pub struct OllamaBackend {
    base_url: String,
    model: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl OllamaBackend {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::Unavailable(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
            timeout,
        })
    }

    pub fn from_config(config: &LocalModelConfig) -> Result<Self, InferenceError> {
        Self::new(
            &config.url,
            &config.model,
            Duration::from_secs(config.request_timeout_secs),
        )
    }
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    format: &'a str,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

/// Map a transport failure the way every HTTP backend does.
pub(crate) fn map_transport_error(e: reqwest::Error, url: &str, timeout: Duration) -> InferenceError {
    if e.is_timeout() {
        InferenceError::Timeout(timeout)
    } else if e.is_connect() {
        InferenceError::Unavailable(format!("cannot connect to {url}"))
    } else {
        InferenceError::Unavailable(e.to_string())
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaGenerateRequest {
            model: &self.model,
            prompt: &request.prompt,
            system: &request.system,
            stream: false,
            format: "json",
            options: OllamaOptions { temperature: 0.0 },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
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

        let parsed: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::MalformedResponse(e.to_string()))?;

        Ok(InferenceResponse {
            text: parsed.response,
            backend: BackendKind::Local,
            model: self.model.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentType;

    #[test]
    fn request_body_shape() {
        let body = OllamaGenerateRequest {
            model: "llama3.1:8b",
            prompt: "p",
            system: "s",
            stream: false,
            format: "json",
            options: OllamaOptions { temperature: 0.0 },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["format"], "json");
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["temperature"], 0.0);
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let backend =
            OllamaBackend::new("http://localhost:11434/", "m", Duration::from_secs(5)).unwrap();
        assert_eq!(backend.base_url, "http://localhost:11434");
        assert_eq!(backend.model(), "m");
    }

    #[test]
    fn from_config_uses_local_settings() {
        let config = LocalModelConfig::default();
        let backend = OllamaBackend::from_config(&config).unwrap();
        assert_eq!(backend.model(), config.model);
        assert_eq!(backend.kind(), BackendKind::Local);
    }

    #[tokio::test]
    async fn unreachable_server_is_transient() {
        // Port 9 (discard) is almost never listening locally.
        let backend = OllamaBackend::new("http://127.0.0.1:9", "m", Duration::from_secs(5)).unwrap();
        let err = backend
            .infer(&InferenceRequest {
                document_type: DocumentType::Invoice,
                system: String::new(),
                prompt: "x".into(),
            })
            .await
            .unwrap_err();
        assert!(err.is_transient(), "got {err:?}");
    }
}
