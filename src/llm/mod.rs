pub mod anthropic;
pub mod client;
pub mod gemini;
pub mod ollama;
pub mod openai;

pub use anthropic::AnthropicClient;
pub use client::{CodeGenerator, GeneratorFactory, LlmFactory};
pub use gemini::GeminiClient;
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;
