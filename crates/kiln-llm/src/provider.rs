//! The provider contract consumed by the planner and executor

use async_trait::async_trait;
use kiln_core::config::{ProviderConfig, ProviderKind};
use kiln_core::Result;
use std::sync::Arc;

use crate::{AnthropicProvider, OllamaProvider};

/// Per-call overrides
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateOptions {
    pub model: Option<String>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub system: Option<String>,
}

/// Mutable provider settings
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub model: String,
    pub endpoint: String,
    pub timeout_secs: u64,
    pub max_tokens: usize,
    pub temperature: Option<f32>,
}

/// Single-shot text completion.
///
/// Connectivity failures surface as `ProviderError::Connection`, timeouts as
/// `ProviderError::Timeout` and unknown models as
/// `ProviderError::ModelNotFound`. Providers never retry on their own.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider name for logs
    fn name(&self) -> &str;

    /// Generate a completion for `prompt`
    async fn generate(&self, prompt: &str, options: Option<&GenerateOptions>) -> Result<String>;

    /// Stream a completion chunk by chunk.
    ///
    /// Providers without native streaming deliver the whole completion as
    /// one chunk.
    async fn generate_stream(
        &self,
        prompt: &str,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<()> {
        let text = self.generate(prompt, None).await?;
        on_chunk(&text);
        Ok(())
    }

    /// Models available from this provider
    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Current settings
    fn config(&self) -> ProviderSettings;

    /// Replace settings for subsequent calls
    fn update_config(&self, settings: ProviderSettings);

    /// Release held resources
    async fn dispose(&self) {}
}

/// Build the provider named in the configuration
pub fn provider_from_config(config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match config.kind {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::from_config(config)?),
        ProviderKind::Ollama => Arc::new(OllamaProvider::from_config(config)?),
    };
    tracing::info!(
        "Using {} provider with model {}",
        provider.name(),
        provider.config().model
    );
    Ok(provider)
}

/// Map a transport error onto the provider error taxonomy
pub(crate) fn map_transport_error(
    err: reqwest::Error,
    endpoint: &str,
    timeout_secs: u64,
) -> kiln_core::ProviderError {
    if err.is_timeout() {
        kiln_core::ProviderError::Timeout(timeout_secs)
    } else if err.is_connect() || err.is_request() {
        kiln_core::ProviderError::Connection {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
        }
    } else if err.is_decode() {
        kiln_core::ProviderError::InvalidResponse(err.to_string())
    } else {
        kiln_core::ProviderError::Connection {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
        }
    }
}

pub(crate) fn build_http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| kiln_core::KilnError::Config(format!("Failed to build HTTP client: {}", e)))
}
