//! Error taxonomy shared by every layer of the crate.
//!
//! Configuration and runtime errors are fatal at startup; backend errors
//! surface from `plan()` and are never retried automatically. Whether to
//! try again is always the human's call.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Unknown provider override, malformed endpoint, missing credential,
    /// unreadable config file.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The local backend could not be reached (or failed) during generation.
    #[error(
        "backend unavailable: {provider} at {endpoint}: {reason} \
         (is Ollama running? try `ollama serve`)"
    )]
    BackendUnavailable {
        provider: String,
        endpoint: String,
        reason: String,
    },

    /// A cloud provider failed; the underlying error is passed through as-is.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),

    /// The container runtime (Docker daemon) is not reachable.
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// The sandbox image could neither be built nor pulled.
    #[error("could not resolve sandbox image {image}: {reason}")]
    ImageResolution { image: String, reason: String },

    /// Container create/start/exec failure.
    #[error("container error: {0}")]
    Container(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors that must abort startup before any plan/confirm.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_) | Error::RuntimeUnavailable(_) | Error::ImageResolution { .. }
        )
    }
}
