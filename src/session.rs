//! One approval session: provider, sandbox and engine wired together.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{Config, SandboxConfig};
use crate::engine::{
    EnvProviderSource, ExecutionEngine, ExecutionRequest, FixedProviderSource, PlanOutcome,
    ProviderSource,
};
use crate::error::Result;
use crate::llm::{GeneratorFactory, LlmFactory};
use crate::provider::{self, HealthStatus, ProviderConfig};
use crate::sandbox::{ContainerRuntime, SandboxManager};
use crate::sink::OutputSink;

pub struct Session {
    provider: ProviderConfig,
    engine: ExecutionEngine,
    settings: SandboxConfig,
}

impl Session {
    /// Resolves the provider, checks its backend can be built (a missing
    /// API key fails here) and connects to Docker. All failures are fatal.
    pub async fn start(config: Config) -> Result<Self> {
        let provider = provider::resolve()?;
        let generators: Arc<dyn GeneratorFactory> = Arc::new(LlmFactory::new(config.generation));
        check_backend(&provider, generators.as_ref())?;
        let sandbox = SandboxManager::docker(config.sandbox.clone()).await?;
        let session = Self::assemble(
            provider,
            Arc::new(EnvProviderSource),
            sandbox,
            generators,
            config.sandbox,
        );
        session.warn_if_unhealthy().await;
        Ok(session)
    }

    /// Same as [`Session::start`] with explicit seams; the provider snapshot
    /// is used for every `plan()` instead of re-reading the environment.
    pub async fn with_parts(
        config: Config,
        provider: ProviderConfig,
        runtime: Arc<dyn ContainerRuntime>,
        generators: Arc<dyn GeneratorFactory>,
    ) -> Result<Self> {
        check_backend(&provider, generators.as_ref())?;
        let sandbox = SandboxManager::connect(config.sandbox.clone(), runtime).await?;
        let source = Arc::new(FixedProviderSource(provider.clone()));
        Ok(Self::assemble(provider, source, sandbox, generators, config.sandbox))
    }

    fn assemble(
        provider: ProviderConfig,
        source: Arc<dyn ProviderSource>,
        sandbox: SandboxManager,
        generators: Arc<dyn GeneratorFactory>,
        settings: SandboxConfig,
    ) -> Self {
        let engine = ExecutionEngine::new(source, generators, Arc::new(sandbox));
        Self {
            provider,
            engine,
            settings,
        }
    }

    /// Advisory only: generation may still work once the backend comes up.
    async fn warn_if_unhealthy(&self) {
        if !self.provider.kind.is_local() {
            return;
        }
        let status = self.health().await;
        if !status.reachable {
            warn!(
                "Ollama is not reachable at {}; is `ollama serve` running?",
                self.provider.ollama_base_url
            );
            return;
        }
        for model in provider::missing_models(&self.provider, &status.models) {
            warn!("Model {model} is not available locally; run `ollama pull {model}`");
        }
    }

    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    pub fn banner(&self) -> String {
        provider::banner(&self.provider)
    }

    pub async fn health(&self) -> HealthStatus {
        provider::health_check(&self.provider).await
    }

    /// Local models the session needs but the backend doesn't have.
    /// Empty for cloud providers.
    pub async fn missing_models(&self) -> Vec<String> {
        if !self.provider.kind.is_local() {
            return Vec::new();
        }
        let status = self.health().await;
        provider::missing_models(&self.provider, &status.models)
    }

    pub async fn plan(
        &mut self,
        task: &str,
        sink: Option<&mut dyn OutputSink>,
    ) -> Result<PlanOutcome> {
        self.engine.plan(task, sink).await
    }

    pub async fn confirm(&mut self, sink: Option<&mut dyn OutputSink>) -> Result<String> {
        self.engine.confirm(sink).await
    }

    pub fn reject(&mut self) -> Option<ExecutionRequest> {
        self.engine.reject()
    }

    pub fn pending(&self) -> Option<&ExecutionRequest> {
        self.engine.pending()
    }

    pub async fn workspace_files(&self) -> Result<Vec<String>> {
        self.engine.sandbox().workspace_files().await
    }

    /// Removes the container when `stop_on_exit` is set.
    pub async fn shutdown(self) -> Result<()> {
        if self.settings.stop_on_exit {
            info!("Stopping sandbox container {}", self.settings.container_name);
            self.engine.sandbox().stop().await?;
        }
        Ok(())
    }
}

/// Builds the generator once so configuration errors surface at startup.
fn check_backend(provider: &ProviderConfig, generators: &dyn GeneratorFactory) -> Result<()> {
    let generator = generators.build(provider)?;
    info!("Code generation backend: {}", generator.description());
    Ok(())
}
