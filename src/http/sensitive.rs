//! Sensitive-route table for audit capture.
//!
//! Maps mutation routes of the platform API to an audit action and a
//! resource type. Patterns are matched segment by segment: `{id}` captures
//! one segment as the resource id, `{*}` matches any remainder (including
//! none). The first matching entry wins, so specific routes come before
//! their prefixes.

use axum::http::Method;

use crate::sinks::taxonomy::{
    AdminAction, AuditAction, AuthAction, FinancialAction, ProjectAction, UserAction,
};

const MUTATIONS: &[&str] = &["POST", "PUT", "PATCH", "DELETE"];
const POST: &[&str] = &["POST"];
const UPDATE: &[&str] = &["PUT", "PATCH"];
const DELETE: &[&str] = &["DELETE"];

#[derive(Debug, Clone)]
pub struct RouteRule {
    methods: &'static [&'static str],
    segments: Vec<Segment>,
    action: AuditAction,
    resource_type: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Id,
    Rest,
}

/// A matched sensitive request.
#[derive(Debug, Clone, PartialEq)]
pub struct SensitiveRoute {
    pub action: AuditAction,
    pub resource_type: &'static str,
    pub resource_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SensitiveRoutes {
    rules: Vec<RouteRule>,
}

impl RouteRule {
    fn new(
        methods: &'static [&'static str],
        pattern: &str,
        action: impl Into<AuditAction>,
        resource_type: &'static str,
    ) -> Self {
        let segments = split(pattern)
            .map(|s| match s {
                "{id}" => Segment::Id,
                "{*}" => Segment::Rest,
                lit => Segment::Literal(lit.to_string()),
            })
            .collect();
        Self {
            methods,
            segments,
            action: action.into(),
            resource_type,
        }
    }

    fn matches(&self, method: &Method, path: &str) -> Option<SensitiveRoute> {
        if !self.methods.contains(&method.as_str()) {
            return None;
        }
        let mut parts = split(path);
        let mut resource_id = None;
        for segment in &self.segments {
            match segment {
                Segment::Rest => {
                    return Some(self.route(resource_id));
                }
                Segment::Id => resource_id = Some(parts.next()?.to_string()),
                Segment::Literal(lit) => {
                    if parts.next()? != lit.as_str() {
                        return None;
                    }
                }
            }
        }
        if parts.next().is_some() {
            return None;
        }
        Some(self.route(resource_id))
    }

    fn route(&self, resource_id: Option<String>) -> SensitiveRoute {
        SensitiveRoute {
            action: self.action,
            resource_type: self.resource_type,
            resource_id,
        }
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

impl SensitiveRoutes {
    /// Routes of the crowdfunding platform API.
    pub fn builtin() -> Self {
        use RouteRule as R;
        let rules = vec![
            // Admin: project moderation
            R::new(POST, "/api/admin/projects/{id}/approve", ProjectAction::Approved, "project"),
            R::new(POST, "/api/admin/projects/{id}/reject", ProjectAction::Rejected, "project"),
            R::new(POST, "/api/admin/projects/{id}/suspend", ProjectAction::Suspended, "project"),
            R::new(POST, "/api/admin/projects/{id}/complete", ProjectAction::Completed, "project"),
            R::new(DELETE, "/api/admin/projects/{id}", ProjectAction::Deleted, "project"),
            // Admin: user management
            R::new(POST, "/api/admin/users/{id}/suspend", UserAction::Suspended, "user"),
            R::new(POST, "/api/admin/users/{id}/unsuspend", UserAction::Unsuspended, "user"),
            R::new(MUTATIONS, "/api/admin/users/{id}/role", UserAction::RoleChanged, "user"),
            R::new(POST, "/api/admin/users/{id}/grant-admin", AdminAction::AdminGranted, "user"),
            R::new(POST, "/api/admin/users/{id}/revoke-admin", AdminAction::AdminRevoked, "user"),
            R::new(DELETE, "/api/admin/users/{id}", UserAction::Deleted, "user"),
            R::new(UPDATE, "/api/admin/users/{id}", UserAction::Updated, "user"),
            R::new(POST, "/api/admin/users", UserAction::Created, "user"),
            // Admin: money movement
            R::new(POST, "/api/admin/topups/{id}/approve", FinancialAction::TopupApproved, "topup"),
            R::new(POST, "/api/admin/topups/{id}/reject", FinancialAction::TopupRejected, "topup"),
            R::new(POST, "/api/admin/investments/{id}/approve", FinancialAction::InvestmentApproved, "investment"),
            R::new(POST, "/api/admin/investments/{id}/reject", FinancialAction::InvestmentRejected, "investment"),
            R::new(POST, "/api/admin/withdrawals/{id}/approve", FinancialAction::WithdrawalApproved, "withdrawal"),
            // Admin: platform
            R::new(MUTATIONS, "/api/admin/settings/{*}", AdminAction::SettingsChanged, "settings"),
            R::new(POST, "/api/admin/bulk/{*}", AdminAction::BulkAction, "bulk"),
            R::new(POST, "/api/admin/export/{*}", AdminAction::DataExport, "export"),
            // Owners: projects
            R::new(POST, "/api/projects", ProjectAction::Created, "project"),
            R::new(UPDATE, "/api/projects/{id}", ProjectAction::Updated, "project"),
            R::new(DELETE, "/api/projects/{id}", ProjectAction::Deleted, "project"),
            // Investors: money movement
            R::new(POST, "/api/wallet/topup", FinancialAction::TopupRequested, "topup"),
            R::new(POST, "/api/investments", FinancialAction::InvestmentCreated, "investment"),
            R::new(POST, "/api/wallet/withdraw", FinancialAction::WithdrawalRequested, "withdrawal"),
            R::new(POST, "/api/payments/{*}", FinancialAction::PaymentProcessed, "payment"),
            // Users and auth
            R::new(UPDATE, "/api/users/{id}", UserAction::Updated, "user"),
            R::new(DELETE, "/api/users/{id}", UserAction::Deleted, "user"),
            R::new(POST, "/api/auth/register", AuthAction::Register, "user"),
            R::new(POST, "/api/auth/login", AuthAction::Login, "session"),
            R::new(POST, "/api/auth/logout", AuthAction::Logout, "session"),
            R::new(POST, "/api/auth/reset-password", AuthAction::PasswordReset, "user"),
            // Fallbacks for admin mutations not listed above
            R::new(MUTATIONS, "/api/admin/projects/{id}/{*}", ProjectAction::Updated, "project"),
            R::new(MUTATIONS, "/api/admin/users/{id}/{*}", UserAction::Updated, "user"),
        ];
        Self { rules }
    }

    pub fn match_route(&self, method: &Method, path: &str) -> Option<SensitiveRoute> {
        self.rules.iter().find_map(|rule| rule.matches(method, path))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for SensitiveRoutes {
    fn default() -> Self {
        Self::builtin()
    }
}
