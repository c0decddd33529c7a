//! HTTP middleware.
//!
//! `security` is the request interception layer that every routed request
//! passes through before reaching the upstream.

pub mod security;

pub use security::{security_middleware, SecurityLayer};
