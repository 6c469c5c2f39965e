//! Execution sandbox.
//!
//! Approved code runs inside one long-lived Docker container. The container
//! keeps a no-op foreground process (`tail -f /dev/null`) so it stays up
//! between requests, and bind-mounts the host workspace read-write at
//! `/workspace`, so anything a block writes there survives and can be
//! inspected from the host.
//!
//! The Docker daemon is reached through the [`ContainerRuntime`] seam;
//! [`DockerCli`] drives the `docker` binary, tests use an in-memory fake.

pub mod docker;
pub mod manager;
pub mod runtime;

use std::fmt;
use std::path::PathBuf;

pub use docker::DockerCli;
pub use manager::SandboxManager;
pub use runtime::ContainerRuntime;

/// Mount point of the host workspace inside the container.
pub const WORKSPACE_MOUNT: &str = "/workspace";

/// Whether a container is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Stopped,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Handle to the persistent execution environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxEnvironment {
    pub name: String,
    pub image: String,
    /// Host path bound at [`WORKSPACE_MOUNT`]
    pub workspace: PathBuf,
    pub state: ContainerState,
}

/// Everything needed to create the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    /// `host:container:mode` bind strings
    pub binds: Vec<String>,
    pub working_dir: String,
    /// `uid:gid` to run as, when known
    pub user: Option<String>,
}

/// Captured output of one executed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Interleaved stdout and stderr, in arrival order
    pub output: String,
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}
