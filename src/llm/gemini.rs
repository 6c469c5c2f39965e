//! Google Gemini provider.
//!
//! Calls `POST .../v1beta/models/{model}:generateContent` with the API key
//! in the `x-goog-api-key` header. The reply's candidate parts are joined.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::client::CodeGenerator;
use crate::error::Result;
use crate::provider::Credential;
use crate::sink::OutputSink;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationOptions,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<OutgoingPart<'a>>,
}

#[derive(Serialize)]
struct OutgoingPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationOptions {
    max_output_tokens: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<IncomingPart>,
}

#[derive(Deserialize)]
struct IncomingPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

impl GenerateContentResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

pub struct GeminiClient {
    client: Client,
    api_key: Credential,
    model: String,
    max_tokens: u32,
}

impl GeminiClient {
    pub fn new(api_key: Credential, model: &str, max_tokens: u32) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model: model.to_string(),
            max_tokens,
        }
    }

    fn url(&self) -> String {
        format!("{GEMINI_API_BASE}/{}:generateContent", self.model)
    }

    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![OutgoingPart { text: prompt }],
            }],
            generation_config: GenerationOptions {
                max_output_tokens: self.max_tokens,
            },
        };

        debug!("Calling Gemini API ({})", self.model);

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", self.api_key.expose())
            .json(&request)
            .send()
            .await
            .context("Gemini API request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini API returned {status}: {body}");
        }

        let resp: GenerateContentResponse = response.json().await?;
        if let Some(ref usage) = resp.usage_metadata {
            info!(
                "LLM response: {} in / {} out tokens",
                usage.prompt_token_count, usage.candidates_token_count
            );
        }
        Ok(resp.text())
    }
}

#[async_trait]
impl CodeGenerator for GeminiClient {
    async fn generate(&self, prompt: &str, sink: &mut dyn OutputSink) -> Result<String> {
        let text = self.complete(prompt).await?;
        sink.emit(&text);
        Ok(text)
    }

    fn description(&self) -> String {
        format!("gemini ({})", self.model)
    }
}
