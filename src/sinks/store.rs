//! Storage contracts for security events and audit entries.
//!
//! Both stores are append-only: the traits offer `append`, `query` and
//! `stats`, nothing that edits or removes a record.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::security::types::{SecurityEventType, Severity};
use crate::sinks::audit::{AuditLogEntry, Outcome};
use crate::sinks::events::SecurityEvent;
use crate::sinks::taxonomy::{AuditAction, AuditCategory};

pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 500;

/// Number of addresses reported in `SecurityStats::top_ips`.
const TOP_IPS: usize = 10;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Inclusive time window; open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn contains(&self, at: &DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| *at >= from) && self.to.is_none_or(|to| *at <= to)
    }
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT)
}

/// Security event query. Deserializes from admin query strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EventFilter {
    pub ip: Option<String>,
    pub user_id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: Option<SecurityEventType>,
    pub severity: Option<Severity>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl EventFilter {
    pub fn range(&self) -> DateRange {
        DateRange {
            from: self.from,
            to: self.to,
        }
    }

    pub fn limit(&self) -> usize {
        clamp_limit(self.limit)
    }

    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }

    pub fn matches(&self, event: &SecurityEvent) -> bool {
        self.ip.as_ref().is_none_or(|ip| *ip == event.ip_address)
            && self
                .user_id
                .as_ref()
                .is_none_or(|id| event.user_id.as_ref() == Some(id))
            && self.event_type.is_none_or(|t| t == event.event_type)
            && self.severity.is_none_or(|s| s == event.severity)
            && self.range().contains(&event.created_at)
    }
}

/// Audit log query. Deserializes from admin query strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuditFilter {
    pub user_id: Option<String>,
    pub category: Option<AuditCategory>,
    pub action: Option<AuditAction>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    #[serde(rename = "status")]
    pub outcome: Option<Outcome>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl AuditFilter {
    pub fn range(&self) -> DateRange {
        DateRange {
            from: self.from,
            to: self.to,
        }
    }

    pub fn limit(&self) -> usize {
        clamp_limit(self.limit)
    }

    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }

    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.user_id.as_ref().is_none_or(|id| *id == entry.user_id)
            && self.category.is_none_or(|c| c == entry.category)
            && self.action.is_none_or(|a| a == entry.action)
            && self
                .resource_type
                .as_ref()
                .is_none_or(|t| entry.resource_type.as_ref() == Some(t))
            && self
                .resource_id
                .as_ref()
                .is_none_or(|id| entry.resource_id.as_ref() == Some(id))
            && self.outcome.is_none_or(|o| o == entry.outcome)
            && self.range().contains(&entry.created_at)
    }
}

/// One page of query results, newest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

impl<T> Page<T> {
    /// Sort-free pagination over already ordered matches.
    pub fn slice(matches: Vec<T>, limit: usize, offset: usize) -> Self {
        let total = matches.len();
        let items = matches.into_iter().skip(offset).take(limit).collect();
        Self {
            items,
            total,
            limit,
            offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpCount {
    pub ip: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SecurityStats {
    pub total: u64,
    pub by_severity: BTreeMap<Severity, u64>,
    pub by_type: BTreeMap<SecurityEventType, u64>,
    pub unique_ips: u64,
    pub top_ips: Vec<IpCount>,
}

impl SecurityStats {
    /// Fold a sequence of events into statistics.
    pub fn collect<'a>(events: impl IntoIterator<Item = &'a SecurityEvent>) -> Self {
        let mut stats = Self::default();
        let mut per_ip: HashMap<&str, u64> = HashMap::new();
        for event in events {
            stats.total += 1;
            *stats.by_severity.entry(event.severity).or_default() += 1;
            *stats.by_type.entry(event.event_type).or_default() += 1;
            *per_ip.entry(event.ip_address.as_str()).or_default() += 1;
        }
        stats.unique_ips = per_ip.len() as u64;
        stats.top_ips = top_ips(per_ip.into_iter().map(|(ip, count)| (ip.to_string(), count)));
        stats
    }
}

/// Highest counts first, ties broken by address.
pub fn top_ips(counts: impl IntoIterator<Item = (String, u64)>) -> Vec<IpCount> {
    let mut all: Vec<IpCount> = counts
        .into_iter()
        .map(|(ip, count)| IpCount { ip, count })
        .collect();
    all.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.ip.cmp(&b.ip)));
    all.truncate(TOP_IPS);
    all
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub success: u64,
    pub failure: u64,
    pub error: u64,
}

impl OutcomeCounts {
    pub fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Success => self.success += 1,
            Outcome::Failure => self.failure += 1,
            Outcome::Error => self.error += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditStats {
    pub total: u64,
    pub by_category: BTreeMap<AuditCategory, OutcomeCounts>,
}

impl AuditStats {
    pub fn collect<'a>(entries: impl IntoIterator<Item = &'a AuditLogEntry>) -> Self {
        let mut stats = Self::default();
        for entry in entries {
            stats.total += 1;
            stats.by_category.entry(entry.category).or_default().add(entry.outcome);
        }
        stats
    }
}

/// Append-only security event storage.
#[async_trait]
pub trait SecurityEventStore: Send + Sync {
    async fn append(&self, event: &SecurityEvent) -> Result<(), StoreError>;
    async fn query(&self, filter: &EventFilter) -> Result<Page<SecurityEvent>, StoreError>;
    async fn stats(&self, range: &DateRange) -> Result<SecurityStats, StoreError>;
}

/// Append-only audit log storage.
#[async_trait]
pub trait AuditLogStore: Send + Sync {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), StoreError>;
    async fn query(&self, filter: &AuditFilter) -> Result<Page<AuditLogEntry>, StoreError>;
    async fn stats(&self, range: &DateRange) -> Result<AuditStats, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_is_clamped() {
        let filter = EventFilter::default();
        assert_eq!(filter.limit(), DEFAULT_PAGE_LIMIT);
        let filter = EventFilter {
            limit: Some(10_000),
            ..Default::default()
        };
        assert_eq!(filter.limit(), MAX_PAGE_LIMIT);
        let filter = EventFilter {
            limit: Some(0),
            ..Default::default()
        };
        assert_eq!(filter.limit(), 1);
    }

    #[test]
    fn test_top_ips_ordering() {
        let top = top_ips(vec![
            ("b".to_string(), 2),
            ("a".to_string(), 2),
            ("c".to_string(), 5),
        ]);
        let order: Vec<_> = top.iter().map(|c| c.ip.as_str()).collect();
        assert_eq!(order, ["c", "a", "b"]);
    }

    #[test]
    fn test_page_slice() {
        let page = Page::slice((0..10).collect::<Vec<_>>(), 3, 8);
        assert_eq!(page.items, vec![8, 9]);
        assert_eq!(page.total, 10);
    }

    #[test]
    fn test_filters_deserialize_from_query_strings() {
        let filter: EventFilter =
            parse_query("type=SQL_INJECTION&severity=CRITICAL&limit=20");
        assert_eq!(filter.event_type, Some(SecurityEventType::SqlInjection));
        assert_eq!(filter.severity, Some(Severity::Critical));
        assert_eq!(filter.limit(), 20);
    }

    fn parse_query<T: serde::de::DeserializeOwned>(query: &str) -> T {
        let uri: axum::http::Uri = format!("/x?{query}").parse().unwrap();
        axum::extract::Query::<T>::try_from_uri(&uri).unwrap().0
    }
}
