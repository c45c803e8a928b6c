//! Guardrail - composable security middleware for async actions
//!
//! This crate lets a caller declare an ordered sequence of security checks
//! (authentication, schema validation, rate limiting, CSRF validation, input
//! sanitization, audit logging) around an arbitrary async handler, and compile
//! them into a single callable that runs the checks and the handler and
//! returns a uniform [`ActionResult`].

pub mod audit;
pub mod auth;
pub mod context;
pub mod csrf;
pub mod error;
pub mod pipeline;
pub mod ratelimit;
pub mod sanitize;
pub mod schema;
pub mod token;

// Re-export commonly used types
pub use context::{ExecutionContext, Headers, User};
pub use error::{ActionResult, ConfigError, ErrorCode};
pub use pipeline::{Guard, GuardedAction};
