//! Ollama API provider.
//!
//! Calls `POST {host}/api/generate` with `stream: true`. Ollama answers
//! with newline-delimited JSON objects, one per token batch:
//!
//! ```text
//! {"model":"llama3.2","response":"print","done":false}
//! {"model":"llama3.2","response":"(1)","done":false}
//! ...
//! {"model":"llama3.2","response":"","done":true,"eval_count":42}
//! ```
//!
//! Each `response` fragment is forwarded to the output sink as soon as its
//! line is complete. Any failure (connection refused, HTTP error, an
//! `error` line, a broken stream) is reported as
//! [`Error::BackendUnavailable`] carrying the endpoint.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::client::CodeGenerator;
use crate::error::{Error, Result};
use crate::sink::OutputSink;

// ── Ollama API types ─────────────────────────────────────

/// Ollama `/api/generate` request body.
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// One NDJSON line of a streamed `/api/generate` response.
#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

/// Reassembles NDJSON lines from arbitrarily split byte chunks.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Appends `bytes` and drains every complete (non-blank) line.
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// Whatever is left once the stream ends without a trailing newline.
    fn finish(&mut self) -> Option<String> {
        let rest = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        (!rest.is_empty()).then_some(rest)
    }
}

// ── OllamaClient ────────────────────────────────────────

/// Streaming client for a self-hosted Ollama server.
pub struct OllamaClient {
    client: Client,
    host: String,
    model: String,
}

impl OllamaClient {
    pub fn new(host: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            // Strip trailing slash for consistent URL construction
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    fn unavailable(&self, reason: impl ToString) -> Error {
        Error::BackendUnavailable {
            provider: "ollama".to_string(),
            endpoint: self.host.clone(),
            reason: reason.to_string(),
        }
    }

    /// Applies one decoded line: forwards the token, returns whether the
    /// stream is finished.
    fn apply_line(
        &self,
        line: &str,
        text: &mut String,
        sink: &mut dyn OutputSink,
    ) -> Result<bool> {
        let chunk: GenerateChunk = serde_json::from_str(line)
            .map_err(|e| self.unavailable(format!("malformed stream line: {e}")))?;
        if let Some(error) = chunk.error {
            return Err(self.unavailable(error));
        }
        if !chunk.response.is_empty() {
            sink.emit(&chunk.response);
            text.push_str(&chunk.response);
        }
        if chunk.done {
            info!(
                "LLM response: {} in / {} out tokens",
                chunk.prompt_eval_count.unwrap_or(0),
                chunk.eval_count.unwrap_or(0)
            );
        }
        Ok(chunk.done)
    }
}

#[async_trait]
impl CodeGenerator for OllamaClient {
    async fn generate(&self, prompt: &str, sink: &mut dyn OutputSink) -> Result<String> {
        let url = format!("{}/api/generate", self.host);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: true,
        };

        debug!("Calling Ollama API ({}) at {url}", self.model);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.unavailable(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.unavailable(format!("HTTP {status}: {body}")));
        }

        let mut text = String::new();
        let mut lines = LineBuffer::default();
        let mut stream = response.bytes_stream();

        while let Some(bytes) = stream.next().await {
            let bytes = bytes.map_err(|e| self.unavailable(e))?;
            for line in lines.push(&bytes) {
                if self.apply_line(&line, &mut text, sink)? {
                    return Ok(text);
                }
            }
        }
        if let Some(line) = lines.finish() {
            self.apply_line(&line, &mut text, sink)?;
        }

        Ok(text)
    }

    fn description(&self) -> String {
        format!("ollama ({})", self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::Collector;
    use crate::testing::serve_chunked;

    fn client() -> OllamaClient {
        OllamaClient::new("http://localhost:11434/", "llama3.2")
    }

    #[test]
    fn test_description() {
        assert_eq!(client().description(), "ollama (llama3.2)");
    }

    #[test]
    fn test_host_trailing_slash_stripped() {
        assert_eq!(client().host, "http://localhost:11434");
    }

    #[test]
    fn test_request_serialization() {
        let request = GenerateRequest {
            model: "llama3.2",
            prompt: "list files",
            stream: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "llama3.2");
        assert_eq!(json["prompt"], "list files");
        assert_eq!(json["stream"], true);
    }

    // ── Line reassembly ──────────────────────────────────

    #[test]
    fn test_line_buffer_split_across_chunks() {
        let mut buf = LineBuffer::default();
        assert!(buf.push(br#"{"response":"he"#).is_empty());
        let lines = buf.push(b"llo\"}\n{\"response\":\"!\"}\n");
        assert_eq!(lines, vec![r#"{"response":"hello"}"#, r#"{"response":"!"}"#]);
        assert!(buf.finish().is_none());
    }

    #[test]
    fn test_line_buffer_skips_blank_lines_and_keeps_tail() {
        let mut buf = LineBuffer::default();
        let lines = buf.push(b"\n\r\n{\"done\":false}\n{\"done\":true}");
        assert_eq!(lines, vec![r#"{"done":false}"#]);
        assert_eq!(buf.finish().as_deref(), Some(r#"{"done":true}"#));
    }

    #[test]
    fn test_line_buffer_multibyte_split() {
        let line = "{\"response\":\"é\"}\n".as_bytes();
        let (a, b) = line.split_at(14);
        let mut buf = LineBuffer::default();
        assert!(buf.push(a).is_empty());
        assert_eq!(buf.push(b), vec!["{\"response\":\"é\"}"]);
    }

    // ── Chunk handling ───────────────────────────────────

    #[test]
    fn test_apply_line_forwards_tokens() {
        let c = client();
        let mut text = String::new();
        let mut sink = Collector::default();
        assert!(!c
            .apply_line(r#"{"response":"```py","done":false}"#, &mut text, &mut sink)
            .unwrap());
        assert!(c
            .apply_line(
                r#"{"response":"","done":true,"prompt_eval_count":10,"eval_count":2}"#,
                &mut text,
                &mut sink
            )
            .unwrap());
        assert_eq!(text, "```py");
        assert_eq!(sink.chunks, vec!["```py"]);
    }

    #[test]
    fn test_apply_line_error_is_backend_unavailable() {
        let c = client();
        let mut text = String::new();
        let mut sink = Collector::default();
        let err = c
            .apply_line(r#"{"error":"model 'x' not found"}"#, &mut text, &mut sink)
            .unwrap_err();
        match err {
            Error::BackendUnavailable {
                provider,
                endpoint,
                reason,
            } => {
                assert_eq!(provider, "ollama");
                assert_eq!(endpoint, "http://localhost:11434");
                assert!(reason.contains("not found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_apply_line_malformed_json() {
        let c = client();
        let mut text = String::new();
        let mut sink = Collector::default();
        assert!(c.apply_line("not json", &mut text, &mut sink).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_backend_unavailable() {
        let c = OllamaClient::new("http://127.0.0.1:9", "llama3.2");
        let mut sink = Collector::default();
        let err = c.generate("hello", &mut sink).await.unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable { .. }));
        assert!(sink.chunks.is_empty());
    }

    // ── Against a local server ───────────────────────────

    #[tokio::test]
    async fn test_generate_streams_tokens_split_across_chunks() {
        let (url, request) = serve_chunked(
            "200 OK",
            &[
                concat!(r#"{"response":"```py","done":false}"#, "\n", r#"{"resp"#),
                concat!(r#"onse":"thon\nprint(1)\n```","done":false}"#, "\n"),
                // Final line without a trailing newline
                r#"{"response":"","done":true,"prompt_eval_count":12,"eval_count":3}"#,
            ],
        )
        .await;
        let c = OllamaClient::new(&url, "llama3.2");
        let mut sink = Collector::default();

        let text = c.generate("print one", &mut sink).await.unwrap();

        assert_eq!(text, "```python\nprint(1)\n```");
        assert_eq!(sink.chunks, vec!["```py", "thon\nprint(1)\n```"]);
        assert_eq!(request.await.unwrap(), "POST /api/generate HTTP/1.1");
    }

    #[tokio::test]
    async fn test_generate_stops_at_done() {
        let (url, _request) = serve_chunked(
            "200 OK",
            &[
                concat!(
                    r#"{"response":"ls","done":false}"#,
                    "\n",
                    r#"{"response":"","done":true}"#,
                    "\n",
                    r#"{"response":" -la","done":false}"#,
                    "\n"
                ),
                concat!(r#"{"response":" /tmp","done":false}"#, "\n"),
            ],
        )
        .await;
        let c = OllamaClient::new(&url, "llama3.2");
        let mut sink = Collector::default();

        let text = c.generate("list", &mut sink).await.unwrap();

        assert_eq!(text, "ls");
        assert_eq!(sink.chunks, vec!["ls"]);
    }

    #[tokio::test]
    async fn test_generate_error_line_is_backend_unavailable() {
        let (url, _request) = serve_chunked(
            "200 OK",
            &[concat!(r#"{"error":"model 'llama9' not found"}"#, "\n")],
        )
        .await;
        let c = OllamaClient::new(&url, "llama9");
        let mut sink = Collector::default();

        let err = c.generate("hi", &mut sink).await.unwrap_err();

        match err {
            Error::BackendUnavailable { endpoint, reason, .. } => {
                assert_eq!(endpoint, url);
                assert!(reason.contains("llama9"));
            }
            other => panic!("expected backend unavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_generate_http_error_is_backend_unavailable() {
        let (url, _request) =
            serve_chunked("404 Not Found", &[r#"{"error":"model not found"}"#]).await;
        let c = OllamaClient::new(&url, "llama3.2");
        let mut sink = Collector::default();

        let err = c.generate("hi", &mut sink).await.unwrap_err();

        assert!(err.to_string().contains("HTTP 404"));
        assert!(sink.chunks.is_empty());
    }
}
