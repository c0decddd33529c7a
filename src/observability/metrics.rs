//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define guard metrics (verdicts, threats, sink health, upstream latency)
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `fundguard_requests_total` (counter): requests by verdict (passed, blocked, rejected, too_large)
//! - `fundguard_threats_total` (counter): threats by type, severity
//! - `fundguard_sink_dropped_total` (counter): records dropped under queue overload
//! - `fundguard_sink_write_errors_total` (counter): failed store appends
//! - `fundguard_blocked_ips` (gauge): currently blocked IPs
//! - `fundguard_upstream_duration_seconds` (histogram): forwarding latency by status
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op (library and test use)
//! - Label values are closed sets (enum strings, status codes)

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::security::types::Threat;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Outcome of the security middleware for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    /// Source IP was already blocked.
    Blocked,
    /// A threat met the rejection policy.
    Rejected,
    /// Body exceeded `max_body_size`.
    TooLarge,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Blocked => "blocked",
            Self::Rejected => "rejected",
            Self::TooLarge => "too_large",
        }
    }
}

pub fn record_verdict(verdict: Verdict) {
    ::metrics::counter!("fundguard_requests_total", "verdict" => verdict.as_str()).increment(1);
}

pub fn record_threat(threat: &Threat) {
    ::metrics::counter!(
        "fundguard_threats_total",
        "type" => threat.threat_type.as_str(),
        "severity" => threat.severity.as_str()
    )
    .increment(1);
}

pub fn record_sink_dropped(sink: &'static str) {
    ::metrics::counter!("fundguard_sink_dropped_total", "sink" => sink).increment(1);
}

pub fn record_sink_write_error(sink: &'static str) {
    ::metrics::counter!("fundguard_sink_write_errors_total", "sink" => sink).increment(1);
}

pub fn set_blocked_ips(count: usize) {
    ::metrics::gauge!("fundguard_blocked_ips").set(count as f64);
}

pub fn record_upstream(status: u16, start: Instant) {
    ::metrics::histogram!("fundguard_upstream_duration_seconds", "status" => status.to_string())
        .record(start.elapsed().as_secs_f64());
}
