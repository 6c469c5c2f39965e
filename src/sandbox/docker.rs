//! Docker backend driven through the `docker` CLI.
//!
//! Every operation is one `docker` invocation via `tokio::process`. `exec`
//! pipes stdout and stderr and forwards whatever arrives first, so output
//! reaches the sink in roughly the order the process wrote it.

use std::path::Path;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::runtime::ContainerRuntime;
use super::{ContainerSpec, ContainerState, ExecOutput};
use crate::error::{Error, Result};
use crate::sink::OutputSink;

const READ_CHUNK: usize = 4096;

/// Seconds `docker stop` waits before killing the container.
const STOP_GRACE_SECS: &str = "5";

/// Container runtime backed by the `docker` binary.
#[derive(Debug, Clone)]
pub struct DockerCli {
    cli: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    /// `cli` is the binary name or path (`docker`, `podman`, …).
    pub fn new(cli: impl Into<String>) -> Self {
        Self { cli: cli.into() }
    }

    /// Runs one CLI command to completion. Failing to spawn the binary at
    /// all means there is no usable runtime.
    async fn run(&self, args: &[&str]) -> Result<Output> {
        debug!("{} {}", self.cli, args.join(" "));
        Command::new(&self.cli)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::RuntimeUnavailable(format!("cannot run `{}`: {e}", self.cli)))
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

fn is_not_found(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("no such container") || lower.contains("no such object")
}

/// Builds the `docker run` argument list for `spec`.
fn run_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        spec.name.clone(),
        "-w".to_string(),
        spec.working_dir.clone(),
    ];
    for bind in &spec.binds {
        args.extend(["-v".to_string(), bind.clone()]);
    }
    if let Some(ref user) = spec.user {
        args.extend(["--user".to_string(), user.clone()]);
    }
    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

/// Turns byte chunks into `&str` pieces without splitting a UTF-8
/// sequence across two emits. Invalid bytes are replaced.
#[derive(Debug, Default)]
struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        match std::str::from_utf8(&self.pending) {
            Ok(s) => {
                let out = s.to_string();
                self.pending.clear();
                out
            }
            Err(e) if e.error_len().is_none() => {
                // Incomplete sequence at the end: keep it for the next chunk
                let valid = e.valid_up_to();
                let out = String::from_utf8_lossy(&self.pending[..valid]).into_owned();
                self.pending.drain(..valid);
                out
            }
            Err(_) => {
                let out = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                out
            }
        }
    }

    fn finish(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn ping(&self) -> Result<()> {
        let output = self
            .run(&["version", "--format", "{{.Server.Version}}"])
            .await?;
        if !output.status.success() {
            return Err(Error::RuntimeUnavailable(stderr_of(&output)));
        }
        info!(
            "Docker daemon version {}",
            String::from_utf8_lossy(&output.stdout).trim()
        );
        Ok(())
    }

    async fn state(&self, name: &str) -> Result<Option<ContainerState>> {
        let output = self
            .run(&["inspect", "--type", "container", "--format", "{{.State.Running}}", name])
            .await?;
        if !output.status.success() {
            let stderr = stderr_of(&output);
            if is_not_found(&stderr) {
                return Ok(None);
            }
            return Err(Error::Container(format!("docker inspect {name}: {stderr}")));
        }
        let running = String::from_utf8_lossy(&output.stdout).trim() == "true";
        Ok(Some(if running {
            ContainerState::Running
        } else {
            ContainerState::Stopped
        }))
    }

    async fn start(&self, name: &str) -> Result<()> {
        let output = self.run(&["start", name]).await?;
        if !output.status.success() {
            return Err(Error::Container(format!(
                "docker start {name}: {}",
                stderr_of(&output)
            )));
        }
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        let output = self.run(&["image", "inspect", image]).await?;
        Ok(output.status.success())
    }

    async fn build_image(&self, image: &str, context: &Path) -> Result<()> {
        let context = context.to_string_lossy().into_owned();
        let output = self.run(&["build", "-t", image, context.as_str()]).await?;
        if !output.status.success() {
            return Err(Error::ImageResolution {
                image: image.to_string(),
                reason: format!("docker build failed: {}", stderr_of(&output)),
            });
        }
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let output = self.run(&["pull", image]).await?;
        if !output.status.success() {
            return Err(Error::ImageResolution {
                image: image.to_string(),
                reason: format!("docker pull failed: {}", stderr_of(&output)),
            });
        }
        Ok(())
    }

    async fn run_detached(&self, spec: &ContainerSpec) -> Result<()> {
        let args = run_args(spec);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run(&args).await?;
        if !output.status.success() {
            return Err(Error::Container(format!(
                "docker run {}: {}",
                spec.name,
                stderr_of(&output)
            )));
        }
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<bool> {
        // A stop failure is fine here: the forced rm below kills it anyway
        let _ = self.run(&["stop", "-t", STOP_GRACE_SECS, name]).await?;
        let output = self.run(&["rm", "-f", name]).await?;
        if output.status.success() {
            return Ok(true);
        }
        let stderr = stderr_of(&output);
        if is_not_found(&stderr) {
            return Ok(false);
        }
        Err(Error::Container(format!("docker rm {name}: {stderr}")))
    }

    async fn exec(
        &self,
        name: &str,
        argv: &[String],
        working_dir: &str,
        sink: &mut dyn OutputSink,
    ) -> Result<ExecOutput> {
        let mut child = Command::new(&self.cli)
            .args(["exec", "-w", working_dir, name])
            .args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            // The daemon already answered ping; this is about the block (e.g. E2BIG)
            .map_err(|e| Error::Container(format!("cannot exec in {name}: {e}")))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Container("exec stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Container("exec stderr not captured".to_string()))?;

        let mut out_buf = [0u8; READ_CHUNK];
        let mut err_buf = [0u8; READ_CHUNK];
        let mut out_text = Utf8Chunker::default();
        let mut err_text = Utf8Chunker::default();
        let mut out_open = true;
        let mut err_open = true;
        let mut captured = String::new();

        while out_open || err_open {
            let piece = tokio::select! {
                n = stdout.read(&mut out_buf), if out_open => {
                    let n = n?;
                    if n == 0 {
                        out_open = false;
                        out_text.finish()
                    } else {
                        out_text.push(&out_buf[..n])
                    }
                }
                n = stderr.read(&mut err_buf), if err_open => {
                    let n = n?;
                    if n == 0 {
                        err_open = false;
                        err_text.finish()
                    } else {
                        err_text.push(&err_buf[..n])
                    }
                }
            };
            if !piece.is_empty() {
                sink.emit(&piece);
                captured.push_str(&piece);
            }
        }

        let status = child.wait().await?;
        Ok(ExecOutput {
            output: captured,
            exit_code: status.code(),
        })
    }
}
