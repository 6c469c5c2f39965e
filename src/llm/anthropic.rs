use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::client::CodeGenerator;
use crate::error::Result;
use crate::provider::Credential;
use crate::sink::OutputSink;

/// Client for Anthropic Messages API
pub struct AnthropicClient {
    client: Client,
    api_key: Credential,
    model: String,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

impl MessagesResponse {
    /// Concatenates the text blocks, ignoring anything else.
    fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| {
                if block.block_type == "text" {
                    block.text.clone()
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl AnthropicClient {
    pub fn new(api_key: Credential, model: &str, max_tokens: u32) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model: model.to_string(),
            max_tokens,
        }
    }

    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        debug!("Calling Claude API ({})", self.model);

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", self.api_key.expose())
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Claude API request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Claude API error ({status}): {body}");
        }

        let resp: MessagesResponse = response.json().await?;
        let (input_tokens, output_tokens) = resp
            .usage
            .as_ref()
            .map(|u| (u.input_tokens, u.output_tokens))
            .unwrap_or((0, 0));

        info!("LLM response: {input_tokens} in / {output_tokens} out tokens");

        Ok(resp.text())
    }
}

#[async_trait]
impl CodeGenerator for AnthropicClient {
    async fn generate(&self, prompt: &str, sink: &mut dyn OutputSink) -> Result<String> {
        let text = self.complete(prompt).await?;
        sink.emit(&text);
        Ok(text)
    }

    fn description(&self) -> String {
        format!("anthropic ({})", self.model)
    }
}
