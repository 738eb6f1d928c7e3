pub mod client;
pub mod ndjson;
pub mod ollama;

use async_trait::async_trait;
use serde::Serialize;
use wayfinder_core::config::BackendConfig;
use wayfinder_core::Result;

/// Receives streamed text deltas. Returning `false` means the consumer has
/// gone away and no further chunks should be pulled.
pub type TextSink<'a> = dyn FnMut(&str) -> bool + Send + 'a;

/// Sampling parameters sent with every generation request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl GenerationOptions {
    /// Options for free-form answers.
    pub fn answer(config: &BackendConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
        }
    }

    /// Options for the tool-selection prompt.
    pub fn classification(config: &BackendConfig) -> Self {
        Self {
            temperature: config.classify_temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens.min(512),
        }
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self::answer(&BackendConfig::default())
    }
}

/// Health snapshot of a backend.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub available: bool,
    pub url: String,
    pub model: String,
}

/// A text-completion service used for classification and answer synthesis.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Buffered mode: one request, one complete text.
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String>;

    /// Streaming mode: forwards each non-empty delta to `sink` as it arrives.
    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        sink: &mut TextSink<'_>,
    ) -> Result<()>;

    /// Liveness check. Never fails; any error means unavailable.
    async fn check_available(&self) -> bool;

    fn model(&self) -> &str;

    fn endpoint(&self) -> &str;

    async fn status(&self) -> BackendStatus {
        BackendStatus {
            available: self.check_available().await,
            url: self.endpoint().to_string(),
            model: self.model().to_string(),
        }
    }
}

pub use ndjson::NdjsonDecoder;
pub use ollama::OllamaBackend;
