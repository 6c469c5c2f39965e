//! Warden: generate code with an LLM, show it to a human, and run it in a
//! Docker sandbox only once they approve.

pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod llm;
pub mod provider;
pub mod sandbox;
pub mod session;
pub mod sink;

#[cfg(test)]
mod testing;

pub use engine::{ExecutionEngine, ExecutionRequest, PlanOutcome, RequestStatus};
pub use error::{Error, Result};
pub use session::Session;
