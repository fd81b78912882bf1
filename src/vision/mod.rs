//! Vision model client abstraction.
//!
//! Defines the [`VisionClient`] trait so different model backends (a local
//! Ollama server, OpenRouter) can be swapped via configuration.

pub mod ollama;
pub mod openrouter;

use std::sync::Arc;

use anyhow::Context;

use crate::config::ServiceSettings;
use crate::error::Result;

pub use ollama::OllamaClient;
pub use openrouter::OpenRouterClient;

/// Raw image bytes plus the MIME type they were encoded with.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub mime_type: &'static str,
    pub data: Vec<u8>,
}

impl ImageInput {
    pub fn png(data: Vec<u8>) -> Self {
        Self {
            mime_type: "image/png",
            data,
        }
    }
}

/// Async trait implemented by each model backend.
///
/// `generate` sends one prompt (and zero or more images) and returns the
/// completion text verbatim. Implementations do not retry.
#[async_trait::async_trait]
pub trait VisionClient: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    async fn generate(&self, prompt: &str, images: &[ImageInput]) -> Result<String>;
}

/// Known backend identifiers used for configuration lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisionProviderKind {
    Ollama,
    OpenRouter,
}

impl VisionProviderKind {
    /// Parse a config/CLI string into a provider kind.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Some(Self::Ollama),
            "openrouter" => Some(Self::OpenRouter),
            _ => None,
        }
    }
}

/// Build the configured backend.
pub fn build_client(settings: &ServiceSettings) -> anyhow::Result<Arc<dyn VisionClient>> {
    let client: Arc<dyn VisionClient> = match settings.provider {
        VisionProviderKind::Ollama => Arc::new(
            OllamaClient::new(&settings.ollama_url, &settings.model, settings.timeout_secs)
                .context("Failed to build Ollama client")?,
        ),
        VisionProviderKind::OpenRouter => {
            let api_key = settings
                .openrouter_api_key
                .clone()
                .context("OPENROUTER_API_KEY environment variable not set")?;
            Arc::new(
                OpenRouterClient::new(api_key, &settings.model, settings.timeout_secs)
                    .context("Failed to build OpenRouter client")?,
            )
        }
    };
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_provider_kind() {
        assert_eq!(VisionProviderKind::parse("ollama"), Some(VisionProviderKind::Ollama));
        assert_eq!(
            VisionProviderKind::parse(" OpenRouter "),
            Some(VisionProviderKind::OpenRouter)
        );
        assert_eq!(VisionProviderKind::parse("mistral"), None);
    }
}
