//! Request threat analysis.
//!
//! # Responsibilities
//! - Flatten a request into named inputs (`query.*`, `body.*`, `header.*`, `path`)
//! - Evaluate every input against the four injection families
//! - Evaluate the user agent separately
//!
//! # Design Decisions
//! - Stateless: the detector owns only its compiled rules
//! - One threat per field per family (first matching rule wins)
//! - Detector threats never block on their own; the interception layer decides
//!
//! # Data Flow
//! ```text
//! InspectedRequest
//!     → extract_inputs (field, value) pairs
//!     → RuleSet::first_match per family
//!     → user agent check
//!     → Vec<Threat>
//! ```

use serde_json::Value;

use crate::config::DetectorConfig;
use crate::security::rules::{CompiledRule, RuleSet};
use crate::security::types::{RuleFamily, Threat};

/// Nesting beyond this depth is not inspected.
const MAX_BODY_DEPTH: usize = 32;

/// Longest value excerpt kept in threat metadata.
const SAMPLE_LEN: usize = 100;

/// The parts of a request the detector looks at.
#[derive(Debug, Clone, Default)]
pub struct InspectedRequest {
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Lowercased header names with their values.
    pub headers: Vec<(String, String)>,
    pub user_agent: Option<String>,
}

/// Anything that can turn a request into threats.
pub trait ThreatAnalyzer: Send + Sync {
    fn analyze(&self, request: &InspectedRequest) -> Vec<Threat>;
}

/// Rule-table based analyzer.
#[derive(Debug, Clone)]
pub struct ThreatDetector {
    rules: RuleSet,
    header_prefix: String,
    min_user_agent_length: usize,
}

impl ThreatDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            rules: RuleSet::compile(&config.extra_rules),
            header_prefix: config.custom_header_prefix.to_ascii_lowercase(),
            min_user_agent_length: config.min_user_agent_length,
        }
    }

    /// Named inputs in evaluation order.
    pub fn extract_inputs<'a>(&self, request: &'a InspectedRequest) -> Vec<(String, &'a str)> {
        let mut inputs = Vec::new();

        for (name, value) in &request.query {
            inputs.push((format!("query.{name}"), value.as_str()));
        }
        if let Some(body) = &request.body {
            flatten(body, "body".to_string(), 0, &mut inputs);
        }
        for (name, value) in &request.headers {
            if name.starts_with(&self.header_prefix) {
                inputs.push((format!("header.{name}"), value.as_str()));
            }
        }
        inputs.push(("path".to_string(), request.path.as_str()));

        inputs
    }

    fn check_user_agent(&self, user_agent: Option<&str>) -> Option<Threat> {
        let family = RuleFamily::UserAgent;
        let ua = user_agent.map(str::trim).unwrap_or_default();

        if ua.chars().count() < self.min_user_agent_length {
            let reason = if ua.is_empty() { "missing" } else { "too short" };
            return Some(
                Threat::new(
                    family.threat_type(),
                    family.severity(),
                    format!("{} ({reason})", family.label()),
                )
                .with_meta("field", "user_agent")
                .with_meta("user_agent", ua),
            );
        }

        self.rules.first_match(family, ua).map(|rule| {
            Threat::new(family.threat_type(), rule.severity, format!("{}: {}", family.label(), rule.description))
                .with_meta("field", "user_agent")
                .with_meta("rule", rule.id.as_str())
                .with_meta("user_agent", sample(ua))
        })
    }
}

impl ThreatAnalyzer for ThreatDetector {
    fn analyze(&self, request: &InspectedRequest) -> Vec<Threat> {
        let mut threats = Vec::new();

        for (field, value) in self.extract_inputs(request) {
            if value.is_empty() {
                continue;
            }
            for family in RuleFamily::INPUT_FAMILIES {
                if let Some(rule) = self.rules.first_match(family, value) {
                    threats.push(input_threat(rule, &field, value));
                }
            }
        }

        if let Some(threat) = self.check_user_agent(request.user_agent.as_deref()) {
            threats.push(threat);
        }

        threats
    }
}

fn input_threat(rule: &CompiledRule, field: &str, value: &str) -> Threat {
    Threat::new(
        rule.family.threat_type(),
        rule.severity,
        format!("{} detected in {field}", rule.family.label()),
    )
    .with_meta("field", field)
    .with_meta("rule", rule.id.as_str())
    .with_meta("rule_description", rule.description.as_str())
    .with_meta("sample", sample(value))
}

fn flatten<'a>(value: &'a Value, name: String, depth: usize, out: &mut Vec<(String, &'a str)>) {
    if depth > MAX_BODY_DEPTH {
        return;
    }
    match value {
        Value::String(s) => out.push((name, s.as_str())),
        Value::Object(map) => {
            for (key, child) in map {
                flatten(child, format!("{name}.{key}"), depth + 1, out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                flatten(child, format!("{name}[{i}]"), depth + 1, out);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

fn sample(value: &str) -> String {
    value.chars().take(SAMPLE_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::types::{SecurityEventType, Severity};
    use serde_json::json;

    const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Gecko/20100101 Firefox/128.0";

    fn detector() -> ThreatDetector {
        ThreatDetector::new(&DetectorConfig::default())
    }

    fn request() -> InspectedRequest {
        InspectedRequest {
            method: "GET".into(),
            path: "/api/projects".into(),
            user_agent: Some(BROWSER_UA.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_clean_request_has_no_threats() {
        let mut req = request();
        req.query.push(("page".into(), "2".into()));
        req.body = Some(json!({"title": "Rice mill expansion", "amount": 5000}));
        assert!(detector().analyze(&req).is_empty());
    }

    #[test]
    fn test_sql_injection_in_query() {
        let mut req = request();
        req.query.push(("id".into(), "1' OR '1'='1".into()));

        let threats = detector().analyze(&req);
        assert_eq!(threats.len(), 1);
        assert_eq!(threats[0].threat_type, SecurityEventType::SqlInjection);
        assert_eq!(threats[0].severity, Severity::Critical);
        assert_eq!(threats[0].metadata["field"], "query.id");
        assert!(!threats[0].blocking);
    }

    #[test]
    fn test_xss_in_nested_body() {
        let mut req = request();
        req.body = Some(json!({
            "project": {"updates": [{"text": "fine"}, {"text": "<script>alert(1)</script>"}]}
        }));

        let threats = detector().analyze(&req);
        assert_eq!(threats.len(), 1);
        assert_eq!(threats[0].threat_type, SecurityEventType::XssAttempt);
        assert_eq!(threats[0].severity, Severity::High);
        assert_eq!(threats[0].metadata["field"], "body.project.updates[1].text");
    }

    #[test]
    fn test_one_threat_per_family_per_field() {
        let mut req = request();
        // Matches several SQL rules and one traversal rule.
        req.query.push((
            "q".into(),
            "1 UNION SELECT password FROM users; -- ../../etc/passwd".into(),
        ));

        let threats = detector().analyze(&req);
        let sql = threats
            .iter()
            .filter(|t| t.threat_type == SecurityEventType::SqlInjection)
            .count();
        assert_eq!(sql, 1);
        assert!(threats.iter().any(|t| t.threat_type == SecurityEventType::PathTraversal));
    }

    #[test]
    fn test_custom_headers_and_path_are_inspected() {
        let mut req = request();
        req.path = "/files/..%2f..%2fsecret".into();
        req.headers.push(("x-callback".into(), "$(whoami)".into()));
        req.headers.push(("accept".into(), "$(whoami)".into()));

        let threats = detector().analyze(&req);
        let fields: Vec<_> = threats.iter().map(|t| t.metadata["field"].clone()).collect();
        assert!(fields.contains(&json!("path")));
        assert!(fields.contains(&json!("header.x-callback")));
        assert!(!fields.contains(&json!("header.accept")));
    }

    #[test]
    fn test_user_agent_checks() {
        let d = detector();

        let mut req = request();
        req.user_agent = None;
        let threats = d.analyze(&req);
        assert_eq!(threats.len(), 1);
        assert_eq!(threats[0].threat_type, SecurityEventType::SuspiciousUserAgent);
        assert_eq!(threats[0].severity, Severity::Low);

        req.user_agent = Some("x/1".into());
        assert_eq!(d.analyze(&req).len(), 1);

        req.user_agent = Some("sqlmap/1.7.2#stable (https://sqlmap.org)".into());
        let threats = d.analyze(&req);
        assert_eq!(threats[0].metadata["rule"], "ua.scanner");
    }

    #[test]
    fn test_deep_bodies_are_bounded() {
        let mut body = json!("<script>alert(1)</script>");
        for _ in 0..(MAX_BODY_DEPTH + 5) {
            body = json!({ "n": body });
        }
        let mut req = request();
        req.body = Some(body);
        assert!(detector().analyze(&req).is_empty());
    }
}
