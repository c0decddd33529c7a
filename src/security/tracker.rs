//! Per-IP behavioral tracking.
//!
//! # Responsibilities
//! - Sliding-window failed-login ledger with two escalation tiers
//! - Per-minute request and data-access counters
//! - Suspicious / blocked IP sets with administrative unblock
//! - Periodic sweep of expired state
//!
//! # Design Decisions
//! - Explicitly constructed and shared as `Arc`, never a global
//! - `DashMap` for the ledger and counters (per-shard locking)
//! - One `Mutex` guards both IP sets so `blocked ⊆ suspicious` holds atomically
//! - No lock is held across an `.await`
//! - State is process-local; instances behind a load balancer do not share it
//!
//! # Escalation
//! ```text
//! failures in window:  < failed_login_threshold  → LOW    FAILED_LOGIN
//!                      ≥ failed_login_threshold  → HIGH   FAILED_LOGIN  (+suspicious)
//!                      ≥ brute_force_threshold   → CRITICAL BRUTE_FORCE (+blocked, blocking)
//! ```

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::validation::MAX_DURATION_SECS;
use crate::config::TrackerConfig;
use crate::observability::metrics;
use crate::security::types::{SecurityEventType, Severity, Threat};

#[derive(Debug, Clone)]
struct FailedLogin {
    at: DateTime<Utc>,
    username: Option<String>,
}

#[derive(Debug, Default)]
struct IpSets {
    suspicious: BTreeSet<String>,
    blocked: BTreeSet<String>,
}

/// Point-in-time view of the IP sets, for the admin API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackerSnapshot {
    pub blocked: Vec<String>,
    pub suspicious: Vec<String>,
    pub tracked_login_ips: usize,
}

/// What a sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub expired_logins: usize,
    pub ips_released: usize,
    pub buckets_removed: usize,
}

/// Per-IP behavioral state.
#[derive(Debug)]
pub struct BehavioralTracker {
    failed_logins: DashMap<String, Vec<FailedLogin>>,
    request_buckets: DashMap<(String, i64), u64>,
    data_access_buckets: DashMap<(String, i64), u64>,
    sets: Mutex<IpSets>,
    config: TrackerConfig,
}

fn minute_of(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(60)
}

impl BehavioralTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            failed_logins: DashMap::new(),
            request_buckets: DashMap::new(),
            data_access_buckets: DashMap::new(),
            sets: Mutex::new(IpSets::default()),
            config,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Oldest instant still inside the failed-login window, saturating at the epoch floor.
    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        i64::try_from(self.config.failed_login_window_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Record a failed login and classify the IP.
    pub fn track_failed_login(&self, ip: &str, username: Option<&str>) -> Threat {
        self.track_failed_login_at(ip, username, Utc::now())
    }

    pub fn track_failed_login_at(&self, ip: &str, username: Option<&str>, now: DateTime<Utc>) -> Threat {
        let cutoff = self.cutoff(now);
        let attempts = {
            let mut ledger = self.failed_logins.entry(ip.to_string()).or_default();
            ledger.push(FailedLogin {
                at: now,
                username: username.map(str::to_string),
            });
            ledger.retain(|attempt| attempt.at > cutoff);
            ledger.len()
        };

        let window_minutes = self.config.failed_login_window_secs / 60;
        let threat = if attempts >= self.config.brute_force_threshold {
            self.block_ip(ip);
            Threat::new(
                SecurityEventType::BruteForce,
                Severity::Critical,
                format!("Brute force detected: {attempts} failed logins in {window_minutes} minutes"),
            )
            .blocking()
        } else if attempts >= self.config.failed_login_threshold {
            self.mark_suspicious(ip);
            Threat::new(
                SecurityEventType::FailedLogin,
                Severity::High,
                format!("Repeated failed logins: {attempts} in {window_minutes} minutes"),
            )
        } else {
            Threat::new(SecurityEventType::FailedLogin, Severity::Low, "Failed login attempt")
        };

        let threat = threat
            .with_meta("attempts", attempts)
            .with_meta("window_minutes", window_minutes);
        match username {
            Some(name) => threat.with_meta("username", name),
            None => threat,
        }
    }

    /// Count a request against the current minute.
    pub fn check_request_rate(&self, ip: &str) -> Option<Threat> {
        self.check_request_rate_at(ip, Utc::now())
    }

    pub fn check_request_rate_at(&self, ip: &str, now: DateTime<Utc>) -> Option<Threat> {
        let minute = minute_of(now);
        let count = {
            let mut bucket = self.request_buckets.entry((ip.to_string(), minute)).or_insert(0);
            *bucket += 1;
            *bucket
        };

        let limit = self.config.requests_per_minute;
        if count <= limit {
            return None;
        }

        self.mark_suspicious(ip);
        Some(
            Threat::new(
                SecurityEventType::RateLimitExceeded,
                Severity::Medium,
                format!("Rate limit exceeded: {count} requests in the current minute"),
            )
            .with_meta("requests", count)
            .with_meta("limit", limit),
        )
    }

    /// Count `records` read by `ip` against the current minute.
    pub fn check_data_access(&self, ip: &str, records: u64) -> Option<Threat> {
        self.check_data_access_at(ip, records, Utc::now())
    }

    pub fn check_data_access_at(&self, ip: &str, records: u64, now: DateTime<Utc>) -> Option<Threat> {
        let minute = minute_of(now);
        let total = {
            let mut bucket = self.data_access_buckets.entry((ip.to_string(), minute)).or_insert(0);
            *bucket += records;
            *bucket
        };

        let limit = self.config.mass_data_access_threshold;
        if total <= limit {
            return None;
        }

        self.mark_suspicious(ip);
        Some(
            Threat::new(
                SecurityEventType::MassDataAccess,
                Severity::High,
                format!("Mass data access: {total} records in the current minute"),
            )
            .with_meta("records", total)
            .with_meta("limit", limit),
        )
    }

    fn mark_suspicious(&self, ip: &str) {
        let mut sets = self.sets.lock().expect("tracker mutex poisoned");
        sets.suspicious.insert(ip.to_string());
    }

    /// Block an IP. Returns `false` when it was already blocked.
    pub fn block_ip(&self, ip: &str) -> bool {
        let (inserted, blocked) = {
            let mut sets = self.sets.lock().expect("tracker mutex poisoned");
            sets.suspicious.insert(ip.to_string());
            let inserted = sets.blocked.insert(ip.to_string());
            (inserted, sets.blocked.len())
        };
        if inserted {
            tracing::warn!(ip = %ip, "IP blocked");
            metrics::set_blocked_ips(blocked);
        }
        inserted
    }

    /// Unblock an IP, clearing its suspicion and failed-login history.
    /// Returns `false` when it was not blocked.
    pub fn unblock_ip(&self, ip: &str) -> bool {
        let (removed, blocked) = {
            let mut sets = self.sets.lock().expect("tracker mutex poisoned");
            let removed = sets.blocked.remove(ip);
            sets.suspicious.remove(ip);
            (removed, sets.blocked.len())
        };
        self.failed_logins.remove(ip);
        if removed {
            tracing::info!(ip = %ip, "IP unblocked");
            metrics::set_blocked_ips(blocked);
        }
        removed
    }

    pub fn is_blocked(&self, ip: &str) -> bool {
        self.sets.lock().expect("tracker mutex poisoned").blocked.contains(ip)
    }

    pub fn is_suspicious(&self, ip: &str) -> bool {
        self.sets.lock().expect("tracker mutex poisoned").suspicious.contains(ip)
    }

    /// Failed logins currently inside the window for `ip`.
    pub fn failed_login_count(&self, ip: &str) -> usize {
        let cutoff = self.cutoff(Utc::now());
        self.failed_logins
            .get(ip)
            .map(|ledger| ledger.iter().filter(|a| a.at > cutoff).count())
            .unwrap_or(0)
    }

    /// Usernames tried from `ip` inside the window, oldest first.
    pub fn attempted_usernames(&self, ip: &str) -> Vec<String> {
        let cutoff = self.cutoff(Utc::now());
        self.failed_logins
            .get(ip)
            .map(|ledger| {
                ledger
                    .iter()
                    .filter(|a| a.at > cutoff)
                    .filter_map(|a| a.username.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let sets = self.sets.lock().expect("tracker mutex poisoned");
        TrackerSnapshot {
            blocked: sets.blocked.iter().cloned().collect(),
            suspicious: sets.suspicious.iter().cloned().collect(),
            tracked_login_ips: self.failed_logins.len(),
        }
    }

    /// Drop expired ledger entries and stale minute buckets.
    pub fn cleanup(&self) -> CleanupStats {
        self.cleanup_at(Utc::now())
    }

    pub fn cleanup_at(&self, now: DateTime<Utc>) -> CleanupStats {
        let mut stats = CleanupStats::default();

        let cutoff = self.cutoff(now);
        self.failed_logins.retain(|_, ledger| {
            let before = ledger.len();
            ledger.retain(|attempt| attempt.at > cutoff);
            stats.expired_logins += before - ledger.len();
            if ledger.is_empty() {
                stats.ips_released += 1;
                false
            } else {
                true
            }
        });

        let retention_minutes = i64::try_from(self.config.bucket_retention_secs / 60).unwrap_or(i64::MAX);
        let oldest_minute = minute_of(now).saturating_sub(retention_minutes);
        for buckets in [&self.request_buckets, &self.data_access_buckets] {
            let before = buckets.len();
            buckets.retain(|(_, minute), _| *minute >= oldest_minute);
            stats.buckets_removed += before - buckets.len();
        }

        stats
    }

    /// Run `cleanup` every `cleanup_interval_secs` until shutdown.
    pub fn spawn_sweeper(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let period = Duration::from_secs(self.config.cleanup_interval_secs.clamp(1, MAX_DURATION_SECS));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let stats = self.cleanup();
                        tracing::debug!(
                            expired_logins = stats.expired_logins,
                            ips_released = stats.ips_released,
                            buckets_removed = stats.buckets_removed,
                            "Tracker sweep complete"
                        );
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!("Tracker sweeper stopping");
                        break;
                    }
                }
            }
        })
    }
}
