use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use super::docker::DockerCli;
use super::runtime::ContainerRuntime;
use super::{ContainerSpec, ContainerState, ExecOutput, SandboxEnvironment, WORKSPACE_MOUNT};
use crate::config::SandboxConfig;
use crate::error::{Error, Result};
use crate::extract::{CodeBlock, Language};
use crate::sink::OutputSink;

/// Owns the single named sandbox container.
///
/// Every operation is keyed on the configured container name, so at most
/// one environment exists no matter how often `get_or_create` is called.
pub struct SandboxManager {
    runtime: Arc<dyn ContainerRuntime>,
    settings: SandboxConfig,
    /// Canonical host path of the workspace
    workspace: PathBuf,
}

impl SandboxManager {
    /// Connects to the runtime and prepares the host workspace.
    ///
    /// Fails with `RuntimeUnavailable` when the daemon does not answer.
    pub async fn connect(settings: SandboxConfig, runtime: Arc<dyn ContainerRuntime>) -> Result<Self> {
        runtime.ping().await?;

        tokio::fs::create_dir_all(&settings.workspace).await?;
        let workspace = tokio::fs::canonicalize(&settings.workspace).await?;
        info!("Sandbox workspace: {}", workspace.display());

        Ok(Self {
            runtime,
            settings,
            workspace,
        })
    }

    /// Connects through the local `docker` binary.
    pub async fn docker(settings: SandboxConfig) -> Result<Self> {
        Self::connect(settings, Arc::new(DockerCli::default())).await
    }

    pub fn workspace(&self) -> &PathBuf {
        &self.workspace
    }

    pub fn container_name(&self) -> &str {
        &self.settings.container_name
    }

    fn environment(&self, state: ContainerState) -> SandboxEnvironment {
        SandboxEnvironment {
            name: self.settings.container_name.clone(),
            image: self.settings.image.clone(),
            workspace: self.workspace.clone(),
            state,
        }
    }

    /// Returns the running environment, creating or restarting it as needed.
    pub async fn get_or_create(&self) -> Result<SandboxEnvironment> {
        let name = &self.settings.container_name;

        match self.runtime.state(name).await? {
            Some(ContainerState::Running) => {
                debug!("Reusing running container {name}");
            }
            Some(ContainerState::Stopped) => {
                info!("Starting stopped container {name}");
                self.runtime.start(name).await?;
            }
            None => {
                self.ensure_image().await?;
                let spec = self.container_spec().await;
                info!("Creating container {name} from {}", spec.image);
                self.runtime.run_detached(&spec).await?;
            }
        }

        Ok(self.environment(ContainerState::Running))
    }

    /// Makes the configured image available locally, building or pulling it.
    async fn ensure_image(&self) -> Result<()> {
        let image = &self.settings.image;
        if self.runtime.image_exists(image).await? {
            return Ok(());
        }

        let resolved = if self.settings.builds_locally() {
            info!(
                "Building image {image} from {}",
                self.settings.dockerfile().display()
            );
            self.runtime
                .build_image(image, &self.settings.build_context)
                .await
        } else {
            info!("Pulling image {image}");
            self.runtime.pull_image(image).await
        };

        resolved.map_err(|e| match e {
            Error::ImageResolution { .. } | Error::RuntimeUnavailable(_) => e,
            other => Error::ImageResolution {
                image: image.clone(),
                reason: other.to_string(),
            },
        })
    }

    async fn container_spec(&self) -> ContainerSpec {
        ContainerSpec {
            name: self.settings.container_name.clone(),
            image: self.settings.image.clone(),
            command: vec!["tail".into(), "-f".into(), "/dev/null".into()],
            binds: vec![format!("{}:{WORKSPACE_MOUNT}:rw", self.workspace.display())],
            working_dir: WORKSPACE_MOUNT.to_string(),
            user: invoking_user().await,
        }
    }

    /// Stops and removes the container. A missing container is fine.
    pub async fn stop(&self) -> Result<()> {
        let name = &self.settings.container_name;
        if self.runtime.remove(name).await? {
            info!("Removed container {name}");
        } else {
            debug!("Container {name} was not present");
        }
        Ok(())
    }

    /// Runs one block inside an already running environment.
    pub async fn execute(
        &self,
        env: &SandboxEnvironment,
        block: &CodeBlock,
        sink: &mut dyn OutputSink,
    ) -> Result<ExecOutput> {
        let argv = command_for(block);
        debug!("exec in {}: {} block", env.name, block.language);
        let output = self
            .runtime
            .exec(&env.name, &argv, WORKSPACE_MOUNT, sink)
            .await?;
        debug!("exit code {:?}", output.exit_code);
        Ok(output)
    }

    /// Ensures the environment is up, then runs `block`.
    pub async fn run(&self, block: &CodeBlock, sink: &mut dyn OutputSink) -> Result<ExecOutput> {
        let env = self.get_or_create().await?;
        self.execute(&env, block, sink).await
    }

    /// Sorted names of the regular files at the top of the host workspace.
    pub async fn workspace_files(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.workspace).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Interpreter argv for a block.
fn command_for(block: &CodeBlock) -> Vec<String> {
    match block.language {
        Language::Shell => vec!["/bin/bash".into(), "-c".into(), block.text.clone()],
        Language::Code => vec!["python3".into(), "-c".into(), block.text.clone()],
    }
}

/// `uid:gid` of the current user, so files written in the workspace stay
/// owned by them on the host.
#[cfg(unix)]
async fn invoking_user() -> Option<String> {
    let uid = id_field("-u").await?;
    let gid = id_field("-g").await?;
    Some(format!("{uid}:{gid}"))
}

#[cfg(not(unix))]
async fn invoking_user() -> Option<String> {
    None
}

#[cfg(unix)]
async fn id_field(flag: &str) -> Option<String> {
    let output = tokio::process::Command::new("id")
        .arg(flag)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!value.is_empty()).then_some(value)
}
