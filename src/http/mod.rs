//! HTTP surface of the guard.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing, timeout)
//!     → middleware/security.rs (IP resolution, block check, analysis)
//!         → inspect.rs (query, body and header decomposition)
//!     → forward.rs (upstream platform API)
//!     → middleware/security.rs (failed-login tracking, audit via sensitive.rs)
//!     → response to client
//! ```

pub mod forward;
pub mod inspect;
pub mod middleware;
pub mod response;
pub mod sensitive;
pub mod server;

pub use forward::Upstream;
pub use middleware::{security_middleware, SecurityLayer};
pub use sensitive::{SensitiveRoute, SensitiveRoutes};
pub use server::GuardServer;
