//! Tool Registry and tool handlers.
//!
//! - [`base_tool`] - `ToolDescriptor`, the `ToolHandler` trait, closure tools
//! - [`builtin`] - LLM-backed built-in marketing tools
//! - [`webhook`] - tenant tools backed by an HTTP endpoint
//! - [`registry`] - the `ToolRegistry` trait and in-memory implementation

pub mod base_tool;
pub mod builtin;
pub mod registry;
pub mod webhook;

pub use base_tool::{FnTool, ToolDescriptor, ToolHandler, ToolResult};
pub use builtin::{PromptTool, GENERAL_CATEGORY, GENERAL_TOOL_ID};
pub use registry::{CustomToolSpec, InMemoryToolRegistry, ToolRegistry};
pub use webhook::WebhookTool;
