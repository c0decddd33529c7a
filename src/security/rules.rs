//! Detection rule table.
//!
//! # Responsibilities
//! - Hold the built-in rules as plain data
//! - Compile them once, together with operator-supplied extras
//! - Answer "first rule of family F matching value V"
//!
//! # Design Decisions
//! - Rules are data, not code: adding a pattern never touches the detector
//! - Severity comes from the family, so a rule cannot disagree with its family
//! - A pattern that fails to compile is logged and skipped, never fatal here
//!   (validation rejects broken extras before startup)

use regex::Regex;

use crate::config::CustomRuleConfig;
use crate::security::types::{RuleFamily, Severity};

/// A rule as written in the table.
#[derive(Debug, Clone, Copy)]
pub struct RuleSpec {
    pub id: &'static str,
    pub family: RuleFamily,
    pub pattern: &'static str,
    pub description: &'static str,
}

const fn rule(
    id: &'static str,
    family: RuleFamily,
    pattern: &'static str,
    description: &'static str,
) -> RuleSpec {
    RuleSpec {
        id,
        family,
        pattern,
        description,
    }
}

use RuleFamily::{CommandInjection, PathTraversal, SqlInjection, UserAgent, Xss};

/// Built-in rules, evaluated in order within each family.
pub const BUILTIN_RULES: &[RuleSpec] = &[
    // SQL injection
    rule("sqli.union", SqlInjection, r"(?i)\bunion\b[\s(]+(all\s+)?select\b", "UNION-based query"),
    rule(
        "sqli.statement",
        SqlInjection,
        r"(?i)\b(select\s[\s\S]*?\bfrom|insert\s+into|delete\s+from|drop\s+(table|database|schema)|update\s+\w+\s+set|truncate\s+table|alter\s+table)\b",
        "SQL statement keywords",
    ),
    rule(
        "sqli.tautology",
        SqlInjection,
        r"(?i)'\s*(or|and)\s+'?\w+'?\s*=\s*'?\w+",
        "Quoted boolean tautology",
    ),
    rule(
        "sqli.numeric_tautology",
        SqlInjection,
        r"(?i)\b(or|and)\s+\d+\s*=\s*\d+",
        "Numeric boolean tautology",
    ),
    rule("sqli.comment", SqlInjection, r"('|;)\s*(--|#)|/\*[\s\S]*?\*/", "SQL comment sequence"),
    rule(
        "sqli.functions",
        SqlInjection,
        r"(?i)\b(xp_cmdshell|exec(ute)?\s+(master|xp_|sp_)|sleep\s*\(\s*\d+\s*\)|benchmark\s*\(|waitfor\s+delay|pg_sleep\s*\()",
        "Dangerous SQL function",
    ),
    rule("sqli.stacked", SqlInjection, r"(?i);\s*(select|insert|update|delete|drop|exec)\b", "Stacked query"),
    rule("sqli.hex", SqlInjection, r"(?i)\b0x[0-9a-f]{16,}\b", "Hex-encoded payload"),
    // Cross-site scripting
    rule("xss.script", Xss, r"(?i)<\s*/?\s*script\b", "Script tag"),
    rule("xss.embed", Xss, r"(?i)<\s*(iframe|object|embed|applet|meta|base)\b", "Embedding tag"),
    rule("xss.protocol", Xss, r"(?i)(java|vb)script\s*:", "Script URL scheme"),
    rule("xss.handler", Xss, r"(?i)<[^>]*\bon[a-z]+\s*=", "Inline event handler"),
    rule("xss.eval", Xss, r"(?i)\b(eval|expression)\s*\(", "Script evaluation call"),
    rule("xss.data_uri", Xss, r"(?i)data\s*:\s*text/html", "HTML data URI"),
    // Path traversal
    rule("traversal.dotdot", PathTraversal, r"\.\.[/\\]", "Parent directory sequence"),
    rule(
        "traversal.encoded",
        PathTraversal,
        r"(?i)(%2e%2e|\.%2e|%2e\.)(%2f|%5c|/|\\)|\.\.(%2f|%5c)",
        "Encoded parent directory sequence",
    ),
    rule("traversal.double_encoded", PathTraversal, r"(?i)%252e%252e", "Double-encoded parent directory"),
    rule(
        "traversal.sensitive_file",
        PathTraversal,
        r"(?i)(/etc/(passwd|shadow|hosts)|c:\\windows\\|boot\.ini|/proc/self/)",
        "Sensitive system file",
    ),
    // Command injection
    rule(
        "cmd.chained",
        CommandInjection,
        r"(?i)[;&|`]\s*(cat|ls|rm|wget|curl|nc|ncat|bash|sh|zsh|python|perl|ruby|php|chmod|chown|whoami|id|uname|ping|nslookup|powershell|cmd)\b",
        "Chained shell command",
    ),
    rule("cmd.subshell", CommandInjection, r"\$\([^)]*\)", "Command substitution"),
    rule("cmd.backtick", CommandInjection, r"`[^`]+`", "Backtick command substitution"),
    rule("cmd.expansion", CommandInjection, r"\$\{[^}]+\}", "Shell variable expansion"),
    // User agent
    rule(
        "ua.scanner",
        UserAgent,
        r"(?i)(sqlmap|nikto|nmap|masscan|nessus|acunetix|netsparker|burp|dirbuster|gobuster|wpscan|zgrab|nuclei|havij|w3af|openvas)",
        "Security scanner",
    ),
    rule("ua.bot", UserAgent, r"(?i)(bot|crawler|spider|scraper)", "Automated crawler"),
    rule(
        "ua.http_client",
        UserAgent,
        r"(?i)^(curl|wget|python-requests|python-urllib|go-http-client|java/|libwww-perl|okhttp|httpie|axios|node-fetch)",
        "Scripted HTTP client",
    ),
];

/// A compiled, ready-to-match rule.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: String,
    pub family: RuleFamily,
    pub severity: Severity,
    pub description: String,
    regex: Regex,
}

impl CompiledRule {
    fn compile(id: String, family: RuleFamily, pattern: &str, description: String) -> Option<Self> {
        match Regex::new(pattern) {
            Ok(regex) => Some(Self {
                id,
                family,
                severity: family.severity(),
                description,
                regex,
            }),
            Err(e) => {
                tracing::error!(rule = %id, error = %e, "Skipping rule with invalid pattern");
                None
            }
        }
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

/// The compiled rule table.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// Compile the built-in table followed by `extra` rules.
    pub fn compile(extra: &[CustomRuleConfig]) -> Self {
        let builtin = BUILTIN_RULES.iter().filter_map(|spec| {
            CompiledRule::compile(
                spec.id.to_string(),
                spec.family,
                spec.pattern,
                spec.description.to_string(),
            )
        });
        let custom = extra.iter().enumerate().filter_map(|(i, rule)| {
            CompiledRule::compile(
                format!("custom.{i}"),
                rule.family,
                &rule.pattern,
                rule.description.clone(),
            )
        });

        let rules: Vec<_> = builtin.chain(custom).collect();
        tracing::debug!(rules = rules.len(), "Detection rules compiled");
        Self { rules }
    }

    /// First rule of `family` that matches `value`.
    pub fn first_match(&self, family: RuleFamily, value: &str) -> Option<&CompiledRule> {
        self.rules
            .iter()
            .filter(|r| r.family == family)
            .find(|r| r.is_match(value))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::compile(&[])
    }
}
