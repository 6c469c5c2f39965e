//! Provider resolution and local-backend health gating.
//!
//! All provider-related environment reading lives here so the engine and
//! the front-ends share a single contract:
//!
//! - `PROVIDER` explicitly selects a backend (validated against an allow-list).
//! - Otherwise the first present credential wins, probed in a fixed order:
//!   `GEMINI_API_KEY` → `ANTHROPIC_API_KEY` → `OPENAI_API_KEY`.
//! - Otherwise Gemini is the default.
//!
//! Ollama settings are always resolved, even when another provider is active,
//! so `/status`-style surfaces can report them.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.2";

/// Upper bound for the `/api/tags` reachability probe.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Credential signals probed when no explicit override is set, in order.
const CREDENTIAL_SIGNALS: [(&str, ProviderKind); 3] = [
    ("GEMINI_API_KEY", ProviderKind::Gemini),
    ("ANTHROPIC_API_KEY", ProviderKind::Anthropic),
    ("OPENAI_API_KEY", ProviderKind::OpenAi),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProviderKind {
    /// Self-hosted Ollama
    Ollama,
    Gemini,
    Anthropic,
    OpenAi,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Ollama,
        ProviderKind::Gemini,
        ProviderKind::Anthropic,
        ProviderKind::OpenAi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::Gemini => "gemini",
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Ollama)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An API key. Never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Immutable snapshot of the active backend configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Ollama endpoint, without trailing slash.
    pub ollama_base_url: String,
    /// Model used by the planning (conversational) agent.
    pub ollama_planning_model: String,
    /// Model used to generate code blocks.
    pub ollama_codegen_model: String,
    pub gemini_api_key: Option<Credential>,
    pub anthropic_api_key: Option<Credential>,
    pub openai_api_key: Option<Credential>,
}

impl ProviderConfig {
    /// Credential for the active cloud provider, if any.
    pub fn credential(&self) -> Option<&Credential> {
        match self.kind {
            ProviderKind::Ollama => None,
            ProviderKind::Gemini => self.gemini_api_key.as_ref(),
            ProviderKind::Anthropic => self.anthropic_api_key.as_ref(),
            ProviderKind::OpenAi => self.openai_api_key.as_ref(),
        }
    }

    /// Endpoint shown in error messages and banners.
    pub fn endpoint(&self) -> &str {
        match self.kind {
            ProviderKind::Ollama => &self.ollama_base_url,
            ProviderKind::Gemini => "generativelanguage.googleapis.com",
            ProviderKind::Anthropic => "api.anthropic.com",
            ProviderKind::OpenAi => "api.openai.com",
        }
    }
}

/// Resolves the provider from the process environment.
pub fn resolve() -> Result<ProviderConfig> {
    resolve_with(|key| std::env::var(key).ok())
}

/// Resolves the provider from an arbitrary variable lookup.
///
/// Blank values are treated as unset.
pub fn resolve_with<F>(lookup: F) -> Result<ProviderConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| {
        lookup(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let kind = match get("PROVIDER") {
        Some(raw) => ProviderKind::parse(&raw).ok_or_else(|| {
            let mut valid: Vec<&str> = ProviderKind::ALL.iter().map(|k| k.as_str()).collect();
            valid.sort_unstable();
            Error::Configuration(format!(
                "unknown PROVIDER={:?}; valid values are: {}",
                raw.to_lowercase(),
                valid.join(", ")
            ))
        })?,
        None => CREDENTIAL_SIGNALS
            .iter()
            .find(|(var, _)| get(var).is_some())
            .map(|(_, kind)| *kind)
            .unwrap_or(ProviderKind::Gemini),
    };

    let ollama_base_url = get("OLLAMA_BASE_URL")
        .unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.to_string())
        .trim_end_matches('/')
        .to_string();
    // Only the active backend's endpoint has to be usable
    if kind.is_local() {
        validate_endpoint(&ollama_base_url)?;
    }

    let shared_model = get("OLLAMA_MODEL").unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string());
    let ollama_planning_model = get("OLLAMA_AGENT_MODEL").unwrap_or_else(|| shared_model.clone());
    let ollama_codegen_model = get("OLLAMA_CODEGEN_MODEL").unwrap_or(shared_model);

    let config = ProviderConfig {
        kind,
        ollama_base_url,
        ollama_planning_model,
        ollama_codegen_model,
        gemini_api_key: get("GEMINI_API_KEY").map(Credential::new),
        anthropic_api_key: get("ANTHROPIC_API_KEY").map(Credential::new),
        openai_api_key: get("OPENAI_API_KEY").map(Credential::new),
    };
    debug!("Resolved provider: {}", config.kind);
    Ok(config)
}

fn validate_endpoint(raw: &str) -> Result<()> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| Error::Configuration(format!("invalid OLLAMA_BASE_URL {raw:?}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::Configuration(format!(
            "invalid OLLAMA_BASE_URL {raw:?}: unsupported scheme '{other}'"
        ))),
    }
}

// ── Health gating ────────────────────────────────────────

/// Result of probing the local backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub reachable: bool,
    pub models: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

/// Probes `GET {base}/api/tags`. Never fails: any error, non-200 status
/// or timeout degrades to an unreachable status with no models.
pub async fn health_check(config: &ProviderConfig) -> HealthStatus {
    let url = format!("{}/api/tags", config.ollama_base_url);
    match probe_tags(&url).await {
        Ok(models) => HealthStatus {
            reachable: true,
            models,
        },
        Err(e) => {
            debug!("Ollama health check failed ({url}): {e}");
            HealthStatus::default()
        }
    }
}

async fn probe_tags(url: &str) -> anyhow::Result<Vec<String>> {
    // Covers connect, headers and body: the probe can't outlive it.
    let client = reqwest::Client::builder()
        .timeout(HEALTH_CHECK_TIMEOUT)
        .build()?;
    let response = client.get(url).send().await?;
    if response.status() != reqwest::StatusCode::OK {
        anyhow::bail!("status {}", response.status());
    }
    let tags: TagsResponse = response.json().await?;
    Ok(tags.models.into_iter().map(|m| m.name).collect())
}

/// Required local models (planning + codegen) not present in `available`.
///
/// A required id matches exactly, or, when it carries no `:tag`, matches any
/// available entry with the same base name (Ollama stores `llama3.2` as
/// `llama3.2:latest`). The result is sorted and de-duplicated.
pub fn missing_models(config: &ProviderConfig, available: &[String]) -> Vec<String> {
    let required: BTreeSet<&str> = [
        config.ollama_planning_model.as_str(),
        config.ollama_codegen_model.as_str(),
    ]
    .into_iter()
    .collect();

    let available_bases: BTreeSet<&str> = available.iter().map(|m| base_name(m)).collect();

    required
        .into_iter()
        .filter(|model| {
            let exact = available.iter().any(|a| a.as_str() == *model);
            let untagged = !model.contains(':');
            !(exact || (untagged && available_bases.contains(model)))
        })
        .map(str::to_string)
        .collect()
}

fn base_name(model: &str) -> &str {
    model.split(':').next().unwrap_or(model)
}

/// One-line description of the active provider for startup output.
pub fn banner(config: &ProviderConfig) -> String {
    match config.kind {
        ProviderKind::Ollama => format!(
            "Provider: Ollama (planning: {}, codegen: {}) at {}",
            config.ollama_planning_model, config.ollama_codegen_model, config.ollama_base_url
        ),
        ProviderKind::Gemini => "Provider: Gemini (cloud)".to_string(),
        ProviderKind::Anthropic => "Provider: Anthropic (cloud)".to_string(),
        ProviderKind::OpenAi => "Provider: OpenAI (cloud)".to_string(),
    }
}
