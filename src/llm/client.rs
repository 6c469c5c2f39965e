//! `CodeGenerator` trait: abstraction over LLM backends.
//!
//! Providers (Ollama, Anthropic, OpenAI, Gemini) implement this trait so
//! the engine can turn a prompt into text without knowing which backend
//! is active. [`GeneratorFactory`] picks the implementation from a
//! resolved [`ProviderConfig`] on every `plan()`.

use async_trait::async_trait;

use crate::config::GenerationConfig;
use crate::error::{Error, Result};
use crate::provider::{ProviderConfig, ProviderKind};
use crate::sink::OutputSink;

use super::{AnthropicClient, GeminiClient, OllamaClient, OpenAiClient};

/// Abstraction over text generation backends.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Sends `prompt` and returns the full generated text.
    ///
    /// Streaming backends forward each token to `sink` as it arrives;
    /// the others forward the complete response once.
    async fn generate(&self, prompt: &str, sink: &mut dyn OutputSink) -> Result<String>;

    /// Human-readable description of the provider and model.
    ///
    /// Used in status output, e.g. `"ollama (llama3.2)"`.
    fn description(&self) -> String;
}

/// Builds the generator for a resolved provider.
pub trait GeneratorFactory: Send + Sync {
    fn build(&self, config: &ProviderConfig) -> Result<Box<dyn CodeGenerator>>;
}

/// Factory for the real HTTP backends.
pub struct LlmFactory {
    settings: GenerationConfig,
}

impl LlmFactory {
    pub fn new(settings: GenerationConfig) -> Self {
        Self { settings }
    }
}

impl GeneratorFactory for LlmFactory {
    fn build(&self, config: &ProviderConfig) -> Result<Box<dyn CodeGenerator>> {
        let missing_key = |var: &str| {
            Error::Configuration(format!(
                "provider '{}' selected but {var} is not set",
                config.kind
            ))
        };

        let generator: Box<dyn CodeGenerator> = match config.kind {
            ProviderKind::Ollama => Box::new(OllamaClient::new(
                &config.ollama_base_url,
                &config.ollama_codegen_model,
            )),
            ProviderKind::Anthropic => {
                let key = config
                    .anthropic_api_key
                    .clone()
                    .ok_or_else(|| missing_key("ANTHROPIC_API_KEY"))?;
                Box::new(AnthropicClient::new(
                    key,
                    &self.settings.anthropic_model,
                    self.settings.max_tokens,
                ))
            }
            ProviderKind::OpenAi => {
                let key = config
                    .openai_api_key
                    .clone()
                    .ok_or_else(|| missing_key("OPENAI_API_KEY"))?;
                Box::new(OpenAiClient::new(
                    key,
                    &self.settings.openai_model,
                    self.settings.max_tokens,
                ))
            }
            ProviderKind::Gemini => {
                let key = config
                    .gemini_api_key
                    .clone()
                    .ok_or_else(|| missing_key("GEMINI_API_KEY"))?;
                Box::new(GeminiClient::new(
                    key,
                    &self.settings.gemini_model,
                    self.settings.max_tokens,
                ))
            }
        };
        Ok(generator)
    }
}
