//! Scripted provider for tests
//!
//! Returns queued responses in order and records every prompt it receives.
//! Once the queue is empty it answers with the default response, or with a
//! connection error when no default is set.

use async_trait::async_trait;
use kiln_core::{ProviderError, Result};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::{GenerateOptions, LlmProvider, ProviderSettings};

type Scripted = std::result::Result<String, ProviderError>;

pub struct ScriptedProvider {
    queue: Mutex<VecDeque<Scripted>>,
    default_response: Option<String>,
    prompts: Mutex<Vec<String>>,
    settings: Mutex<ProviderSettings>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            default_response: None,
            prompts: Mutex::new(Vec::new()),
            settings: Mutex::new(ProviderSettings {
                model: "scripted".to_string(),
                endpoint: "memory://scripted".to_string(),
                timeout_secs: 0,
                max_tokens: 0,
                temperature: None,
            }),
        }
    }

    pub fn with_response(self, response: impl Into<String>) -> Self {
        self.push(Ok(response.into()));
        self
    }

    pub fn with_error(self, error: ProviderError) -> Self {
        self.push(Err(error));
        self
    }

    pub fn with_default(mut self, response: impl Into<String>) -> Self {
        self.default_response = Some(response.into());
        self
    }

    fn push(&self, item: Scripted) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(item);
        }
    }

    /// Prompts received so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str, _options: Option<&GenerateOptions>) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        let next = self.queue.lock().ok().and_then(|mut q| q.pop_front());
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(e)) => Err(e.into()),
            None => match &self.default_response {
                Some(text) => Ok(text.clone()),
                None => Err(ProviderError::Connection {
                    endpoint: "memory://scripted".to_string(),
                    message: "no scripted response left".to_string(),
                }
                .into()),
            },
        }
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(vec![self.config().model])
    }

    fn config(&self) -> ProviderSettings {
        match self.settings.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn update_config(&self, settings: ProviderSettings) {
        if let Ok(mut guard) = self.settings.lock() {
            *guard = settings;
        }
    }
}
