//! Web control plane
//!
//! Authenticated REST API over the record store, served via HTTP and/or
//! HTTPS.

pub mod auth;
pub mod listener;
pub mod records;

pub use auth::{auth_middleware, ApiError, AuthMode, AuthState, Principal};
pub use listener::{serve_http, serve_https, TlsConfig};
pub use records::{records_router, ApiState};
