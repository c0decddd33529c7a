//! Shared security vocabulary: severities, event types, threats.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Threat severity. Totally ordered: `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

/// Closed set of security event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventType {
    SqlInjection,
    XssAttempt,
    PathTraversal,
    CommandInjection,
    SuspiciousUserAgent,
    FailedLogin,
    BruteForce,
    RateLimitExceeded,
    MassDataAccess,
    IpBlacklisted,
    IpBlocked,
    IpUnblocked,
}

impl SecurityEventType {
    pub const ALL: [SecurityEventType; 12] = [
        Self::SqlInjection,
        Self::XssAttempt,
        Self::PathTraversal,
        Self::CommandInjection,
        Self::SuspiciousUserAgent,
        Self::FailedLogin,
        Self::BruteForce,
        Self::RateLimitExceeded,
        Self::MassDataAccess,
        Self::IpBlacklisted,
        Self::IpBlocked,
        Self::IpUnblocked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SqlInjection => "SQL_INJECTION",
            Self::XssAttempt => "XSS_ATTEMPT",
            Self::PathTraversal => "PATH_TRAVERSAL",
            Self::CommandInjection => "COMMAND_INJECTION",
            Self::SuspiciousUserAgent => "SUSPICIOUS_USER_AGENT",
            Self::FailedLogin => "FAILED_LOGIN",
            Self::BruteForce => "BRUTE_FORCE",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::MassDataAccess => "MASS_DATA_ACCESS",
            Self::IpBlacklisted => "IP_BLACKLISTED",
            Self::IpBlocked => "IP_BLOCKED",
            Self::IpUnblocked => "IP_UNBLOCKED",
        }
    }
}

impl fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityEventType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

/// Returned when parsing a closed enum from an unknown string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown value {0:?}")]
pub struct UnknownVariant(pub String);

/// Detector rule families. Severity is fixed per family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleFamily {
    SqlInjection,
    Xss,
    PathTraversal,
    CommandInjection,
    UserAgent,
}

impl RuleFamily {
    /// Families evaluated against every extracted input.
    pub const INPUT_FAMILIES: [RuleFamily; 4] = [
        Self::SqlInjection,
        Self::Xss,
        Self::PathTraversal,
        Self::CommandInjection,
    ];

    pub fn threat_type(&self) -> SecurityEventType {
        match self {
            Self::SqlInjection => SecurityEventType::SqlInjection,
            Self::Xss => SecurityEventType::XssAttempt,
            Self::PathTraversal => SecurityEventType::PathTraversal,
            Self::CommandInjection => SecurityEventType::CommandInjection,
            Self::UserAgent => SecurityEventType::SuspiciousUserAgent,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::SqlInjection | Self::CommandInjection => Severity::Critical,
            Self::Xss | Self::PathTraversal => Severity::High,
            Self::UserAgent => Severity::Low,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::SqlInjection => "SQL injection",
            Self::Xss => "XSS",
            Self::PathTraversal => "Path traversal",
            Self::CommandInjection => "Command injection",
            Self::UserAgent => "Suspicious user agent",
        }
    }
}

/// A single finding from the detector or the tracker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Threat {
    pub threat_type: SecurityEventType,
    pub severity: Severity,
    pub description: String,
    pub metadata: Map<String, Value>,
    /// Set only by the brute-force tier; forces rejection of the request.
    pub blocking: bool,
}

impl Threat {
    pub fn new(threat_type: SecurityEventType, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            threat_type,
            severity,
            description: description.into(),
            metadata: Map::new(),
            blocking: false,
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }
}

/// Where a request came from and what it asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub ip: String,
    pub user_agent: Option<String>,
    pub method: Option<String>,
    pub url: Option<String>,
}

impl RequestContext {
    pub fn for_ip(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            ..Default::default()
        }
    }
}

/// Verified identity handed over by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub email: Option<String>,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, email: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
        assert_eq!(Severity::ALL.iter().max(), Some(&Severity::Critical));
    }

    #[test]
    fn test_event_type_strings_match_serde() {
        for t in SecurityEventType::ALL {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
            assert_eq!(t.as_str().parse::<SecurityEventType>().unwrap(), t);
        }
        assert!("SQLI".parse::<SecurityEventType>().is_err());
    }

    #[test]
    fn test_family_severities() {
        assert_eq!(RuleFamily::SqlInjection.severity(), Severity::Critical);
        assert_eq!(RuleFamily::CommandInjection.severity(), Severity::Critical);
        assert_eq!(RuleFamily::Xss.severity(), Severity::High);
        assert_eq!(RuleFamily::PathTraversal.severity(), Severity::High);
        assert_eq!(RuleFamily::UserAgent.severity(), Severity::Low);
    }
}
