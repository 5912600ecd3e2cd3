//! Crew execution: the record types, the executor state machine, run
//! controls and the progress stream.

pub mod control;
pub mod executor;
pub mod progress;
pub mod types;

pub use control::{RunControl, RunGuard, RunRegistry};
pub use executor::{CrewExecutor, ExecutionTicket};
pub use progress::{subscribe_progress, ExecutionChanged, ProgressEvent, ProgressEventKind, ProgressHub};
pub use types::{
    Execution, ExecutionFailure, ExecutionStarted, ExecutionStatus, Step, StepStatus, TaskOutcome,
};
