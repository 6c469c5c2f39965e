//! OpenAI Chat Completions provider.
//!
//! Calls `POST https://api.openai.com/v1/chat/completions` with Bearer
//! token authentication and returns the first choice's content.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::client::CodeGenerator;
use crate::error::Result;
use crate::provider::Credential;
use crate::sink::OutputSink;

// ── OpenAI API types ─────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

// ── OpenAiClient ─────────────────────────────────────────

pub struct OpenAiClient {
    client: Client,
    api_key: Credential,
    model: String,
    max_tokens: u32,
}

impl OpenAiClient {
    pub fn new(api_key: Credential, model: &str, max_tokens: u32) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model: model.to_string(),
            max_tokens,
        }
    }

    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let request = ChatRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        debug!("Calling OpenAI API ({})", self.model);

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key.expose()))
            .json(&request)
            .send()
            .await
            .context("OpenAI API request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI API returned {status}: {body}");
        }

        let resp: ChatResponse = response.json().await?;
        if let Some(ref usage) = resp.usage {
            info!(
                "LLM response: {} in / {} out tokens",
                usage.prompt_tokens, usage.completion_tokens
            );
        }
        Ok(first_choice(resp))
    }
}

fn first_choice(resp: ChatResponse) -> String {
    resp.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default()
}

#[async_trait]
impl CodeGenerator for OpenAiClient {
    async fn generate(&self, prompt: &str, sink: &mut dyn OutputSink) -> Result<String> {
        let text = self.complete(prompt).await?;
        sink.emit(&text);
        Ok(text)
    }

    fn description(&self) -> String {
        format!("openai ({})", self.model)
    }
}
