use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Image name that is built from the local `Dockerfile` when missing.
pub const DEFAULT_IMAGE: &str = "warden-agent";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    /// Image reference; the default one is built locally when a recipe exists
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_container_name")]
    pub container_name: String,
    /// Host directory bind-mounted at /workspace
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,
    /// Directory holding the Dockerfile used to build `image`
    #[serde(default = "default_build_context")]
    pub build_context: PathBuf,
    /// Stop and remove the container when the front-end exits
    #[serde(default)]
    pub stop_on_exit: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_anthropic_model")]
    pub anthropic_model: String,
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,
}

fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

fn default_container_name() -> String {
    "warden-sandbox".to_string()
}

fn default_workspace() -> PathBuf {
    PathBuf::from("./workspace")
}

fn default_build_context() -> PathBuf {
    PathBuf::from(".")
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_anthropic_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

fn default_gemini_model() -> String {
    "gemini-2.0-flash".to_string()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            container_name: default_container_name(),
            workspace: default_workspace(),
            build_context: default_build_context(),
            stop_on_exit: false,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            anthropic_model: default_anthropic_model(),
            openai_model: default_openai_model(),
            gemini_model: default_gemini_model(),
        }
    }
}

impl SandboxConfig {
    /// Path of the local build recipe for the sandbox image
    pub fn dockerfile(&self) -> PathBuf {
        self.build_context.join("Dockerfile")
    }

    /// Only the default image is built locally; anything else is pulled
    pub fn builds_locally(&self) -> bool {
        self.image == DEFAULT_IMAGE && self.dockerfile().is_file()
    }
}

impl Config {
    /// Loads the TOML file at `path`, expanding `${VAR}` references.
    /// A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
            .map_err(|e| Error::Configuration(format!("{}: {e}", path.display())))
    }

    fn parse(content: &str) -> std::result::Result<Self, String> {
        // Expand environment variables like ${HOME}
        let expanded = shellexpand::env(content).map_err(|e| e.to_string())?;
        toml::from_str(&expanded).map_err(|e| e.to_string())
    }
}
