//! `ContainerRuntime` trait: abstraction over the container engine.

use std::path::Path;

use async_trait::async_trait;

use super::{ContainerSpec, ContainerState, ExecOutput};
use crate::error::Result;
use crate::sink::OutputSink;

/// Primitive container operations the sandbox manager is built on.
///
/// Implementations map failures onto the crate taxonomy:
/// [`Error::RuntimeUnavailable`](crate::Error::RuntimeUnavailable) when the
/// daemon can't be reached, [`Error::ImageResolution`](crate::Error::ImageResolution)
/// for build/pull failures, [`Error::Container`](crate::Error::Container)
/// for everything else.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Checks that the daemon answers.
    async fn ping(&self) -> Result<()>;

    /// State of the named container, `None` if it doesn't exist.
    async fn state(&self, name: &str) -> Result<Option<ContainerState>>;

    async fn start(&self, name: &str) -> Result<()>;

    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Builds `image` from the `Dockerfile` in `context`.
    async fn build_image(&self, image: &str, context: &Path) -> Result<()>;

    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Creates and starts a detached container.
    async fn run_detached(&self, spec: &ContainerSpec) -> Result<()>;

    /// Stops and removes the named container. Returns `false` if it
    /// didn't exist.
    async fn remove(&self, name: &str) -> Result<bool>;

    /// Runs `argv` inside the container, forwarding output chunks to `sink`
    /// as they arrive. Returns once the process has exited and both output
    /// streams are drained.
    async fn exec(
        &self,
        name: &str,
        argv: &[String],
        working_dir: &str,
        sink: &mut dyn OutputSink,
    ) -> Result<ExecOutput>;
}
