//! HTTP server: peer protocol endpoint plus the client/admin surface.
//!
//! - [`api`]: routes, request/response types and handlers

pub mod api;

pub use api::{build_router, AppState};
