//! Plan → approve → execute state machine.
//!
//! `plan()` turns a task into generated code and parks it as the single
//! pending request; nothing runs until `confirm()` consumes it. A new
//! `plan()` silently replaces whatever was pending, and a consumed request
//! can never run twice.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::extract::{self, CodeBlock};
use crate::llm::GeneratorFactory;
use crate::provider::{self, ProviderConfig};
use crate::sandbox::SandboxManager;
use crate::sink::{Discard, OutputSink};

/// Returned by `confirm()` when there is nothing to run.
pub const NO_PENDING: &str = "No pending code to execute.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    PendingApproval,
    Executed,
    Rejected,
}

/// Generated code awaiting a human decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub status: RequestStatus,
    pub reasoning: String,
    pub blocks: Vec<CodeBlock>,
}

/// What `plan()` produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutcome {
    /// No executable blocks; the text is shown as-is
    Answer(String),
    Request(ExecutionRequest),
}

/// Where the engine gets its provider configuration on each `plan()`.
#[async_trait]
pub trait ProviderSource: Send + Sync {
    async fn current(&self) -> Result<ProviderConfig>;
}

/// Re-reads the process environment every time.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvProviderSource;

#[async_trait]
impl ProviderSource for EnvProviderSource {
    async fn current(&self) -> Result<ProviderConfig> {
        provider::resolve()
    }
}

/// Always hands out the same snapshot.
#[derive(Debug, Clone)]
pub struct FixedProviderSource(pub ProviderConfig);

#[async_trait]
impl ProviderSource for FixedProviderSource {
    async fn current(&self) -> Result<ProviderConfig> {
        Ok(self.0.clone())
    }
}

/// Instruction sent to the backend for `task`.
fn build_prompt(task: &str) -> String {
    format!(
        "You are a code generator working inside a Linux sandbox.\n\
         Write code that accomplishes the task below.\n\
         Rules:\n\
         - Reply with fenced code blocks only, tagged ```bash or ```python.\n\
         - No explanations, no prose outside the fences.\n\
         - The working directory is /workspace; read and write files there.\n\
         \n\
         Task: {task}\n"
    )
}

/// Renders the per-block outputs of one confirmed request.
fn render_report(sections: &[(CodeBlock, String)]) -> String {
    sections
        .iter()
        .map(|(block, output)| format!("--- Output ({}) ---\n{output}", block.language))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct ExecutionEngine {
    providers: Arc<dyn ProviderSource>,
    generators: Arc<dyn GeneratorFactory>,
    sandbox: Arc<SandboxManager>,
    pending: Option<ExecutionRequest>,
}

impl ExecutionEngine {
    pub fn new(
        providers: Arc<dyn ProviderSource>,
        generators: Arc<dyn GeneratorFactory>,
        sandbox: Arc<SandboxManager>,
    ) -> Self {
        Self {
            providers,
            generators,
            sandbox,
            pending: None,
        }
    }

    pub fn pending(&self) -> Option<&ExecutionRequest> {
        self.pending.as_ref()
    }

    pub fn sandbox(&self) -> &Arc<SandboxManager> {
        &self.sandbox
    }

    /// Generates code for `task` and parks it for approval.
    ///
    /// Generated text is forwarded to `sink` while it arrives. Any request
    /// left pending from a previous call is dropped first, even if this
    /// call then fails.
    pub async fn plan(
        &mut self,
        task: &str,
        sink: Option<&mut dyn OutputSink>,
    ) -> Result<PlanOutcome> {
        if self.pending.take().is_some() {
            debug!("Discarding previous pending request");
        }

        let mut discard = Discard;
        let sink: &mut dyn OutputSink = match sink {
            Some(s) => s,
            None => &mut discard,
        };

        let config = self.providers.current().await?;
        let generator = self.generators.build(&config)?;
        info!("Planning with {}: {task}", generator.description());

        let raw = generator.generate(&build_prompt(task), sink).await?;
        let blocks = extract::extract(&raw);

        if blocks.is_empty() {
            debug!("No code blocks in response, treating it as an answer");
            return Ok(PlanOutcome::Answer(raw));
        }

        let request = ExecutionRequest {
            status: RequestStatus::PendingApproval,
            reasoning: format!("To accomplish: {task}"),
            blocks,
        };
        info!("{} block(s) awaiting approval", request.blocks.len());
        self.pending = Some(request.clone());
        Ok(PlanOutcome::Request(request))
    }

    /// Runs the pending request and returns the rendered report.
    ///
    /// Blocks run one after the other whatever their exit status. If the
    /// sandbox itself fails the error is returned and the request is gone.
    pub async fn confirm(&mut self, sink: Option<&mut dyn OutputSink>) -> Result<String> {
        let Some(request) = self.pending.take() else {
            return Ok(NO_PENDING.to_string());
        };

        let mut discard = Discard;
        let sink: &mut dyn OutputSink = match sink {
            Some(s) => s,
            None => &mut discard,
        };

        let env = self.sandbox.get_or_create().await?;
        info!("Executing {} block(s) in {}", request.blocks.len(), env.name);

        let mut sections = Vec::with_capacity(request.blocks.len());
        for (index, block) in request.blocks.into_iter().enumerate() {
            let output = self.sandbox.execute(&env, &block, sink).await?;
            if !output.success() {
                warn!(
                    "Block {} ({}) exited with {:?}",
                    index + 1,
                    block.language,
                    output.exit_code
                );
            }
            sections.push((block, output.output));
        }

        Ok(render_report(&sections))
    }

    /// Drops the pending request, returning it marked as rejected.
    pub fn reject(&mut self) -> Option<ExecutionRequest> {
        let mut request = self.pending.take()?;
        request.status = RequestStatus::Rejected;
        info!("Pending request rejected");
        Some(request)
    }
}
