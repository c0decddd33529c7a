//! fundguard: security layer for a crowdfunding platform.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────┐
//!                 │                      FUNDGUARD                       │
//!   Client        │  ┌──────────┐   ┌───────────────┐   ┌────────────┐   │
//!   ──────────────┼─▶│   http   │──▶│  interception │──▶│  forward   │───┼──▶ Platform API
//!                 │  │  server  │   │     layer     │   │ (upstream) │   │
//!                 │  └──────────┘   └──────┬────────┘   └────────────┘   │
//!                 │                        │                             │
//!                 │        ┌───────────────┼────────────────┐            │
//!                 │        ▼               ▼                ▼            │
//!                 │  ┌──────────┐   ┌────────────┐   ┌─────────────┐     │
//!                 │  │ detector │   │  tracker   │   │    sinks    │     │
//!                 │  │ (rules)  │   │ (per IP)   │   │ event/audit │     │
//!                 │  └──────────┘   └────────────┘   └──────┬──────┘     │
//!                 │                                         ▼            │
//!                 │  ┌────────┐ ┌────────┐ ┌─────────┐  memory | sqlite  │
//!                 │  │ crypto │ │ config │ │  admin  │                   │
//!                 │  └────────┘ └────────┘ └─────────┘                   │
//!                 └──────────────────────────────────────────────────────┘
//! ```
//!
//! Tracker state is process-local: several instances behind a balancer each
//! keep their own failed-login ledgers and block lists.

pub mod admin;
pub mod config;
pub mod crypto;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;
pub mod sinks;

pub use config::GuardConfig;
pub use crypto::FieldCipher;
pub use http::{GuardServer, SecurityLayer};
pub use lifecycle::{Guard, Shutdown};
