//! Security subsystem: intrusion detection and behavioral tracking.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → client_ip.rs (resolve originating address)
//!     → tracker.rs (blocked? request rate)
//!     → detector.rs + rules.rs (pattern analysis of every input)
//!     → Vec<Threat> handed to the interception layer
//!
//! Login failure observed on the way out:
//!     → tracker.rs (failed-login ledger, escalation, blocking)
//! ```
//!
//! # Design Decisions
//! - Detector is pure; all mutable state lives in the tracker
//! - Severity is fixed per threat type so blocking can threshold on it
//! - No trust in client input, including forwarded headers from untrusted peers

pub mod client_ip;
pub mod detector;
pub mod rules;
pub mod tracker;
pub mod types;

pub use client_ip::{ClientIpResolver, UNKNOWN_IP};
pub use detector::{InspectedRequest, ThreatAnalyzer, ThreatDetector};
pub use rules::{RuleSet, BUILTIN_RULES};
pub use tracker::{BehavioralTracker, CleanupStats, TrackerSnapshot};
pub use types::{Actor, RequestContext, RuleFamily, SecurityEventType, Severity, Threat};
