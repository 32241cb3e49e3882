//! Local Ollama provider
//!
//! Talks to `/api/generate` (optionally streaming newline-delimited JSON) and
//! `/api/tags` for model discovery.

use async_trait::async_trait;
use kiln_core::config::ProviderConfig;
use kiln_core::{ProviderError, Result};
use std::sync::RwLock;

use crate::provider::{build_http_client, map_transport_error};
use crate::types::{
    OllamaError, OllamaGenerateRequest, OllamaGenerateResponse, OllamaOptions, OllamaTagsResponse,
};
use crate::{GenerateOptions, LlmProvider, ProviderSettings};

const DEFAULT_ENDPOINT: &str = "http://localhost:11434";

/// Provider backed by an Ollama server
pub struct OllamaProvider {
    settings: RwLock<ProviderSettings>,
    client: RwLock<reqwest::Client>,
}

impl OllamaProvider {
    pub fn new(settings: ProviderSettings) -> Result<Self> {
        let client = build_http_client(settings.timeout_secs)?;
        Ok(Self {
            settings: RwLock::new(settings),
            client: RwLock::new(client),
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        Self::new(ProviderSettings {
            model: config.model.clone(),
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            timeout_secs: config.timeout_secs,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
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

    fn request(
        settings: &ProviderSettings,
        prompt: &str,
        options: Option<&GenerateOptions>,
        stream: bool,
    ) -> OllamaGenerateRequest {
        OllamaGenerateRequest {
            model: options
                .and_then(|o| o.model.clone())
                .unwrap_or_else(|| settings.model.clone()),
            prompt: prompt.to_string(),
            stream,
            system: options.and_then(|o| o.system.clone()),
            options: OllamaOptions {
                temperature: options
                    .and_then(|o| o.temperature)
                    .or(settings.temperature),
                num_predict: Some(
                    options
                        .and_then(|o| o.max_tokens)
                        .unwrap_or(settings.max_tokens),
                ),
            },
        }
    }

    async fn send(
        &self,
        request: &OllamaGenerateRequest,
    ) -> Result<(reqwest::Response, ProviderSettings)> {
        let (settings, client) = self.snapshot();
        let url = format!("{}/api/generate", settings.endpoint.trim_end_matches('/'));

        let response = client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| map_transport_error(e, &settings.endpoint, settings.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<OllamaError>(&text)
                .map(|e| e.error)
                .unwrap_or(text);
            let err = if status.as_u16() == 404 && message.contains("not found") {
                ProviderError::ModelNotFound(request.model.clone())
            } else {
                ProviderError::Api {
                    status: status.as_u16(),
                    message,
                }
            };
            return Err(err.into());
        }

        Ok((response, settings))
    }
}

/// Feed complete lines from `buffer` to `on_line`, keeping any trailing
/// partial line in the buffer.
///
/// Lines are decoded only once complete, so a multi-byte character split
/// across network chunks survives. `on_line` returns `false` to stop.
fn drain_lines(
    buffer: &mut Vec<u8>,
    mut on_line: impl FnMut(&str) -> Result<bool>,
) -> Result<bool> {
    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = buffer.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&line);
        let line = line.trim();
        if !line.is_empty() && !on_line(line)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn parse_stream_line(line: &str) -> Result<OllamaGenerateResponse> {
    serde_json::from_str(line).map_err(|e| {
        ProviderError::InvalidResponse(format!("Bad stream line '{}': {}", line, e)).into()
    })
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, prompt: &str, options: Option<&GenerateOptions>) -> Result<String> {
        let (settings, _) = self.snapshot();
        let request = Self::request(&settings, prompt, options, false);
        let (response, _) = self.send(&request).await?;

        let body: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        tracing::info!("Ollama completion received ({} chars)", body.response.len());
        Ok(body.response)
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<()> {
        let (settings, _) = self.snapshot();
        let request = Self::request(&settings, prompt, None, true);
        let (mut response, settings) = self.send(&request).await?;

        let mut buffer = Vec::new();
        let mut emit = |line: &str| -> Result<bool> {
            let part = parse_stream_line(line)?;
            if !part.response.is_empty() {
                on_chunk(&part.response);
            }
            Ok(!part.done)
        };
        while let Some(bytes) = response
            .chunk()
            .await
            .map_err(|e| map_transport_error(e, &settings.endpoint, settings.timeout_secs))?
        {
            buffer.extend_from_slice(&bytes);
            if !drain_lines(&mut buffer, &mut emit)? {
                return Ok(());
            }
        }

        let rest = String::from_utf8_lossy(&buffer);
        let rest = rest.trim();
        if !rest.is_empty() {
            emit(rest)?;
        }
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let (settings, client) = self.snapshot();
        let url = format!("{}/api/tags", settings.endpoint.trim_end_matches('/'));

        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| map_transport_error(e, &settings.endpoint, settings.timeout_secs))?;

        if !response.status().is_success() {
            return Err(ProviderError::Api {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            }
            .into());
        }

        let tags: OllamaTagsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_lines_keeps_partial_tail() {
        let mut buffer = b"{\"response\":\"a\"}\n{\"response\":\"b\"}\n{\"resp".to_vec();
        let mut seen = Vec::new();
        let more = drain_lines(&mut buffer, |line| {
            seen.push(parse_stream_line(line)?.response);
            Ok(true)
        })
        .unwrap();
        assert!(more);
        assert_eq!(seen, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(buffer, b"{\"resp".to_vec());
    }

    #[test]
    fn test_drain_lines_multibyte_split_across_chunks() {
        let line = "{\"response\":\"caf\u{e9}\"}\n".as_bytes();
        let split = line.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut buffer = Vec::new();
        let mut seen = Vec::new();
        for chunk in [&line[..split], &line[split..]] {
            buffer.extend_from_slice(chunk);
            drain_lines(&mut buffer, |line| {
                seen.push(parse_stream_line(line)?.response);
                Ok(true)
            })
            .unwrap();
        }
        assert_eq!(seen, vec!["caf\u{e9}".to_string()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_lines_stops_at_done() {
        let mut buffer =
            b"{\"response\":\"a\",\"done\":true}\n{\"response\":\"b\"}\n".to_vec();
        let mut seen = Vec::new();
        let more = drain_lines(&mut buffer, |line| {
            let part = parse_stream_line(line)?;
            seen.push(part.response);
            Ok(!part.done)
        })
        .unwrap();
        assert!(!more);
        assert_eq!(seen, vec!["a".to_string()]);
    }

    #[test]
    fn test_request_uses_overrides() {
        let settings = ProviderSettings {
            model: "llama3".to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_secs: 5,
            max_tokens: 256,
            temperature: Some(0.2),
        };
        let options = GenerateOptions {
            model: Some("codellama".to_string()),
            ..GenerateOptions::default()
        };
        let request = OllamaProvider::request(&settings, "hi", Some(&options), false);
        assert_eq!(request.model, "codellama");
        assert_eq!(request.options.num_predict, Some(256));
        assert_eq!(request.options.temperature, Some(0.2));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        let provider = OllamaProvider::new(ProviderSettings {
            model: "llama3".to_string(),
            endpoint: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            max_tokens: 16,
            temperature: None,
        })
        .unwrap();
        let err = provider.list_models().await.unwrap_err();
        assert!(matches!(
            err,
            kiln_core::KilnError::Provider(ProviderError::Connection { .. })
                | kiln_core::KilnError::Provider(ProviderError::Timeout(_))
        ));
    }
}
