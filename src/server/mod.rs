//! HTTP surface for crew generation and supervised execution.
//!
//! Tenant scope comes from the `x-workspace-id` and `x-owner-id` request
//! headers. See [`routes`] for the endpoint list.

pub mod routes;

pub use routes::{app_router, ApiError, AppState, Tenant};
