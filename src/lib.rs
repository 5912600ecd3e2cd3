//! # crewforge
//!
//! Plan-then-execute crew orchestration. A free-form goal is turned into a
//! crew (agents, tools and an ordered task graph) by a reasoning backend, and
//! a crew is run as a supervised execution with retries, pause/resume,
//! cancellation, persistence and live progress.
//!
//! The pipeline:
//!
//! 1. [`planning::IntentAnalyzer`] condenses the prompt into an [`planning::Intent`].
//! 2. [`planning::ToolSelector`] ranks the tools visible to the workspace.
//! 3. [`planning::CrewGenerator`] asks the backend for a crew and validates it.
//! 4. [`execution::CrewExecutor`] runs the tasks in dependency order and
//!    records every attempt in the [`store::ExecutionStore`].
//!
//! [`service::CrewService`] bundles these behind the operations the HTTP
//! server in [`server`] exposes.

pub mod agent;
pub mod config;
pub mod crew;
pub mod errors;
pub mod execution;
pub mod llms;
pub mod planning;
pub mod server;
pub mod service;
pub mod store;
pub mod task;
pub mod tools;

pub use agent::Agent;
pub use config::EngineConfig;
pub use crew::Crew;
pub use errors::{EngineError, EngineResult};
pub use execution::{
    CrewExecutor, Execution, ExecutionStarted, ExecutionStatus, ProgressEvent, ProgressEventKind,
    Step, StepStatus,
};
pub use llms::base_llm::BaseLLM;
pub use service::CrewService;
pub use store::{ExecutionStore, InMemoryExecutionStore, SqliteExecutionStore};
pub use task::Task;
pub use tools::{ToolDescriptor, ToolRegistry};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
