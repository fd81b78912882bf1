//! Ollama `/api/generate` client (local vision models such as LLaVA).

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ImageInput, VisionClient};
use crate::error::{ExtractError, Result};

pub const DEFAULT_URL: &str = "http://localhost:11434";

pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[async_trait::async_trait]
impl VisionClient for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, images: &[ImageInput]) -> Result<String> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            images: images.iter().map(|img| BASE64.encode(&img.data)).collect(),
            stream: false,
        };

        debug!(
            "Sending request to Ollama: model={}, images={}, prompt={} chars",
            self.model,
            request.images.len(),
            prompt.len()
        );

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::ModelStatus {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse =
            response
                .json()
                .await
                .map_err(|e| ExtractError::ModelResponse {
                    reason: e.to_string(),
                })?;

        info!(
            "Ollama response: {} chars ({} eval tokens)",
            parsed.response.len(),
            parsed.eval_count.unwrap_or(0)
        );

        Ok(parsed.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = GenerateRequest {
            model: "llava",
            prompt: "Extract all text",
            images: vec![BASE64.encode(b"img")],
            stream: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "llava",
                "prompt": "Extract all text",
                "images": ["aW1n"],
                "stream": false
            })
        );
    }

    #[test]
    fn test_text_only_request_omits_images() {
        let request = GenerateRequest {
            model: "llava",
            prompt: "p",
            images: Vec::new(),
            stream: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("images").is_none());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = OllamaClient::new("http://localhost:11434/", "llava", 30).unwrap();
        assert_eq!(client.base_url, "http://localhost:11434");
        assert_eq!(client.model(), "llava");
    }
}
