//! Network-backed reasoning providers.
//!
//! Each provider implements [`BaseLLM`](crate::llms::base_llm::BaseLLM) and
//! handles authentication, request formatting and retry itself.

pub mod openai;
