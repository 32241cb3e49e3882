//! # kiln-llm
//!
//! Language model providers for kiln.
//!
//! The planner and executor only see the [`LlmProvider`] trait: a single-shot
//! text completion plus optional streaming and model listing. Concrete
//! providers are constructed by the caller and injected.
//!
//! - [`AnthropicProvider`] - Anthropic messages API
//! - [`OllamaProvider`] - local Ollama server
//! - [`ScriptedProvider`] - queued responses for tests

mod anthropic;
mod auth;
mod ollama;
mod provider;
mod scripted;
mod types;

pub use anthropic::AnthropicProvider;
pub use auth::resolve_api_key;
pub use ollama::OllamaProvider;
pub use provider::{provider_from_config, GenerateOptions, LlmProvider, ProviderSettings};
pub use scripted::ScriptedProvider;
