//! Plan synthesis: intent analysis, tool selection and crew generation.
//!
//! - [`intent`] - free-text prompt to structured [`Intent`]
//! - [`selector`] - ranks the workspace's tools against an intent
//! - [`generator`] - synthesizes, refines and saves crews
//! - [`prompts`] - Tera templates for the planning calls
//! - [`parser`] - recovers JSON drafts from model replies

pub mod generator;
pub mod intent;
pub mod parser;
pub mod prompts;
pub mod selector;

pub use generator::{CrewGenerator, GenerateRequest};
pub use intent::{Intent, IntentAnalyzer};
pub use selector::ToolSelector;
