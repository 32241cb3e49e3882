//! Anthropic messages API provider
//!
//! Each call is stateless: no conversation history is kept between prompts.

use async_trait::async_trait;
use kiln_core::config::ProviderConfig;
use kiln_core::{ProviderError, Result};
use std::sync::RwLock;

use crate::auth;
use crate::provider::{build_http_client, map_transport_error};
use crate::types::{
    AnthropicErrorResponse, AnthropicMessage, AnthropicRequest, AnthropicResponse,
};
use crate::{GenerateOptions, LlmProvider, ProviderSettings};

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Provider backed by the Anthropic messages API
pub struct AnthropicProvider {
    settings: RwLock<ProviderSettings>,
    api_key_env: String,
    client: RwLock<reqwest::Client>,
}

impl AnthropicProvider {
    pub fn new(settings: ProviderSettings, api_key_env: impl Into<String>) -> Result<Self> {
        let client = build_http_client(settings.timeout_secs)?;
        Ok(Self {
            settings: RwLock::new(settings),
            api_key_env: api_key_env.into(),
            client: RwLock::new(client),
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        Self::new(
            ProviderSettings {
                model: config.model.clone(),
                endpoint: config
                    .endpoint
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
                timeout_secs: config.timeout_secs,
                max_tokens: config.max_tokens,
                temperature: config.temperature,
            },
            config.api_key_env.clone(),
        )
    }

    fn snapshot(&self) -> (ProviderSettings, reqwest::Client) {
        let settings = match self.settings.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let client = match self.client.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        (settings, client)
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(&self, prompt: &str, options: Option<&GenerateOptions>) -> Result<String> {
        let (settings, client) = self.snapshot();
        let api_key = auth::resolve_api_key(&self.api_key_env)?;

        let model = options
            .and_then(|o| o.model.clone())
            .unwrap_or_else(|| settings.model.clone());
        let request = AnthropicRequest {
            model: model.clone(),
            max_tokens: options
                .and_then(|o| o.max_tokens)
                .unwrap_or(settings.max_tokens),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            system: options.and_then(|o| o.system.clone()),
            temperature: options
                .and_then(|o| o.temperature)
                .or(settings.temperature),
        };

        let url = format!("{}/v1/messages", settings.endpoint.trim_end_matches('/'));
        tracing::debug!("Sending request to Anthropic API ({} chars)", prompt.len());

        let response = client
            .post(&url)
            .header("x-api-key", &api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| map_transport_error(e, &settings.endpoint, settings.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown".to_string());
            let parsed = serde_json::from_str::<AnthropicErrorResponse>(&error_text).ok();

            let err = match (status.as_u16(), parsed) {
                (401 | 403, _) => ProviderError::Auth(error_text),
                (404, Some(body)) if body.error.error_type == "not_found_error" => {
                    ProviderError::ModelNotFound(model)
                }
                (code, Some(body)) => ProviderError::Api {
                    status: code,
                    message: body.error.message,
                },
                (code, None) => ProviderError::Api {
                    status: code,
                    message: error_text,
                },
            };
            tracing::error!("Anthropic API error: {}", err);
            return Err(err.into());
        }

        let body: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        let output: String = body
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text.as_str())
            .collect();

        if output.is_empty() {
            return Err(ProviderError::InvalidResponse("No text content in response".to_string()).into());
        }

        tracing::info!("Anthropic completion received ({} chars)", output.len());
        Ok(output)
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(vec![self.config().model])
    }

    fn config(&self) -> ProviderSettings {
        self.snapshot().0
    }

    fn update_config(&self, settings: ProviderSettings) {
        let rebuilt = build_http_client(settings.timeout_secs);
        if let Ok(mut guard) = self.settings.write() {
            *guard = settings;
        }
        match rebuilt {
            Ok(client) => {
                if let Ok(mut guard) = self.client.write() {
                    *guard = client;
                }
            }
            Err(e) => tracing::warn!("Keeping previous HTTP client: {}", e),
        }
    }
}
