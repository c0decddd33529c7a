//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → encryption key → stores → tracker + sweeper
//!         → sinks + writers → interception layer → listeners
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     broadcast → stop accepting → sweeper stops → writers drain → exit
//! ```
//!
//! # Design Decisions
//! - Fail fast: a missing or malformed encryption key aborts startup
//! - Ordered startup: storage before the components that write to it
//! - Listeners start last (traffic only when ready)

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::{spawn_signal_handler, wait_for_signal};
pub use startup::{Guard, StartupError};
