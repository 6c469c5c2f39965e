//! Code block extraction from generated text.
//!
//! Backends are asked for fenced code only, but they don't always comply.
//! The extractor is deliberately forgiving: untagged fences and bare text
//! both become shell blocks, and an unterminated fence runs to the end.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical language of a block. Exactly two exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Run with `/bin/bash -c`
    Shell,
    /// Run with `python3 -c`
    Code,
}

impl Language {
    /// Maps a fence tag to its canonical language.
    ///
    /// Unknown and empty tags fall back to `Shell`.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "py" | "python" | "python3" | "code" => Language::Code,
            // sh, bash, zsh, shell, console, "" and anything unrecognised
            _ => Language::Shell,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Shell => "shell",
            Language::Code => "code",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One executable segment of generated text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlock {
    #[serde(rename = "code")]
    pub text: String,
    pub language: Language,
}

impl CodeBlock {
    pub fn new(text: impl Into<String>, language: Language) -> Self {
        Self {
            text: text.into(),
            language,
        }
    }
}

const FENCE: &str = "```";

/// Splits `raw` into code blocks.
///
/// An empty result means the text is a plain answer, not a request.
pub fn extract(raw: &str) -> Vec<CodeBlock> {
    if raw.trim().is_empty() {
        return Vec::new();
    }

    let mut blocks = Vec::new();
    let mut saw_fence = false;
    // (language, body lines) of the fence currently open
    let mut open: Option<(Language, Vec<&str>)> = None;

    for line in raw.lines() {
        let trimmed = line.trim_start();
        match open.take() {
            None => {
                if let Some(info) = trimmed.strip_prefix(FENCE) {
                    saw_fence = true;
                    // Longer fences (````python) carry extra backticks before the tag
                    let tag = info
                        .trim_start_matches('`')
                        .split_whitespace()
                        .next()
                        .unwrap_or("");
                    open = Some((Language::from_tag(tag), Vec::new()));
                }
            }
            Some((language, mut body)) => {
                if trimmed.starts_with(FENCE) {
                    push_block(&mut blocks, language, &body);
                } else {
                    body.push(line);
                    open = Some((language, body));
                }
            }
        }
    }

    if let Some((language, body)) = open {
        push_block(&mut blocks, language, &body);
    }

    if !saw_fence {
        blocks.push(CodeBlock::new(raw.trim(), Language::Shell));
    }

    blocks
}

fn push_block(blocks: &mut Vec<CodeBlock>, language: Language, body: &[&str]) {
    let text = body.join("\n");
    if !text.trim().is_empty() {
        blocks.push(CodeBlock::new(text, language));
    }
}
