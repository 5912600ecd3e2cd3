//! Error taxonomy for crew generation and execution.
//!
//! Each phase of the pipeline surfaces its own error type; [`EngineError`]
//! is the umbrella returned by the service facade and mapped to HTTP status
//! codes by the server.

use thiserror::Error;

use crate::execution::types::ExecutionStatus;

/// A crew failed structural validation.
///
/// Never retried: it signals a defect in the plan itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Crew validation failed: {}", .issues.join("; "))]
pub struct ValidationError {
    /// One human-readable entry per violated rule.
    pub issues: Vec<String>,
}

impl ValidationError {
    pub fn new(issue: impl Into<String>) -> Self {
        Self {
            issues: vec![issue.into()],
        }
    }

    pub fn from_issues(issues: Vec<String>) -> Self {
        Self { issues }
    }
}

/// The generation pipeline could not produce a valid crew.
#[derive(Debug, Clone, Error)]
#[error("Crew synthesis failed after {attempts} attempt(s): {reason}")]
pub struct CrewSynthesisError {
    pub attempts: u32,
    pub reason: String,
}

/// Why a single tool or reasoning call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolFailureKind {
    Failed,
    Timeout,
    NotFound,
}

/// A single Step's tool/reasoning call failed.
#[derive(Debug, Clone, Error)]
#[error("Tool '{tool_id}' invocation failed: {message}")]
pub struct ToolInvocationError {
    pub tool_id: String,
    pub kind: ToolFailureKind,
    pub message: String,
}

impl ToolInvocationError {
    pub fn failed(tool_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            kind: ToolFailureKind::Failed,
            message: message.into(),
        }
    }

    pub fn timeout(tool_id: impl Into<String>, secs: u64) -> Self {
        Self {
            tool_id: tool_id.into(),
            kind: ToolFailureKind::Timeout,
            message: format!("timed out after {}s", secs),
        }
    }

    pub fn not_found(tool_id: impl Into<String>) -> Self {
        let tool_id = tool_id.into();
        Self {
            message: format!("no tool registered with id '{}'", tool_id),
            tool_id,
            kind: ToolFailureKind::NotFound,
        }
    }
}

/// Terminal execution failure.
#[derive(Debug, Clone, Error)]
pub enum ExecutionFatalError {
    #[error("Task '{task_id}' failed after {attempts} attempt(s): {last_error}")]
    RetryBudgetExhausted {
        task_id: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Internal executor fault: {0}")]
    Internal(String),
}

/// Errors from the Execution Store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Errors from the reasoning backend.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API key not set (expected in ${0})")]
    MissingApiKey(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unparseable provider response: {0}")]
    Parse(String),

    #[error("Reasoning call failed after all retries: {0}")]
    Exhausted(String),
}

/// Errors while loading [`crate::config::EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },
}

/// Umbrella error for the public operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Synthesis(#[from] CrewSynthesisError),

    #[error(transparent)]
    Tool(#[from] ToolInvocationError),

    #[error(transparent)]
    Fatal(#[from] ExecutionFatalError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Execution '{execution_id}' already has an active run")]
    AlreadyRunning { execution_id: String },

    #[error("Execution '{execution_id}' is already {status}")]
    ExecutionTerminal {
        execution_id: String,
        status: ExecutionStatus,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl EngineError {
    /// Short machine-readable tag used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::Synthesis(_) => "crew_synthesis",
            EngineError::Tool(_) => "tool_invocation",
            EngineError::Fatal(_) => "execution_fatal",
            EngineError::Store(StoreError::NotFound(_)) => "not_found",
            EngineError::Store(_) => "store",
            EngineError::Llm(_) => "llm",
            EngineError::NotFound { .. } => "not_found",
            EngineError::AlreadyRunning { .. } => "already_running",
            EngineError::ExecutionTerminal { .. } => "execution_terminal",
            EngineError::InvalidRequest(_) => "invalid_request",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_joins_issues() {
        let err = ValidationError::from_issues(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Crew validation failed: a; b");
    }

    #[test]
    fn test_engine_error_kinds() {
        let err: EngineError = ValidationError::new("empty").into();
        assert_eq!(err.kind(), "validation");

        let err: EngineError = StoreError::NotFound("x".into()).into();
        assert_eq!(err.kind(), "not_found");

        let err = EngineError::AlreadyRunning {
            execution_id: "e1".into(),
        };
        assert!(err.to_string().contains("e1"));
        assert_eq!(err.kind(), "already_running");
    }

    #[test]
    fn test_tool_error_constructors() {
        let err = ToolInvocationError::timeout("content.copywriter", 30);
        assert_eq!(err.kind, ToolFailureKind::Timeout);
        assert!(err.to_string().contains("timed out after 30s"));

        let err = ToolInvocationError::not_found("nope");
        assert_eq!(err.kind, ToolFailureKind::NotFound);
        assert_eq!(err.tool_id, "nope");
    }
}
