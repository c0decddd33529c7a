//! Closed audit action taxonomy.
//!
//! Every action belongs to exactly one category; the category is derived
//! from the action and never supplied separately. Actions serialize as
//! their upper-snake name (`PROJECT_APPROVED`) and unknown names fail to
//! parse.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::security::types::UnknownVariant;

macro_rules! audit_taxonomy {
    ($(
        $category:ident($actions:ident) => $category_name:literal {
            $($variant:ident => $name:literal),+ $(,)?
        }
    )+) => {
        /// Audit category, derived from the action.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum AuditCategory {
            $(#[serde(rename = $category_name)] $category,)+
        }

        impl AuditCategory {
            pub const ALL: &'static [AuditCategory] = &[$(Self::$category),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$category => $category_name,)+
                }
            }
        }

        $(
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub enum $actions {
                $($variant,)+
            }

            impl $actions {
                pub fn as_str(&self) -> &'static str {
                    match self {
                        $(Self::$variant => $name,)+
                    }
                }
            }

            impl From<$actions> for AuditAction {
                fn from(action: $actions) -> Self {
                    AuditAction::$category(action)
                }
            }
        )+

        /// Any auditable action.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum AuditAction {
            $($category($actions),)+
        }

        impl AuditAction {
            pub const ALL: &'static [AuditAction] = &[
                $($(AuditAction::$category($actions::$variant),)+)+
            ];

            pub fn category(&self) -> AuditCategory {
                match self {
                    $(Self::$category(_) => AuditCategory::$category,)+
                }
            }

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$category(action) => action.as_str(),)+
                }
            }
        }
    };
}

audit_taxonomy! {
    Auth(AuthAction) => "AUTH" {
        Login => "LOGIN",
        Logout => "LOGOUT",
        Register => "REGISTER",
        PasswordReset => "PASSWORD_RESET",
        FailedLogin => "FAILED_LOGIN",
    }
    UserMgmt(UserAction) => "USER_MGMT" {
        Created => "USER_CREATED",
        Updated => "USER_UPDATED",
        Deleted => "USER_DELETED",
        Suspended => "USER_SUSPENDED",
        Unsuspended => "USER_UNSUSPENDED",
        RoleChanged => "USER_ROLE_CHANGED",
    }
    Project(ProjectAction) => "PROJECT" {
        Created => "PROJECT_CREATED",
        Updated => "PROJECT_UPDATED",
        Deleted => "PROJECT_DELETED",
        Approved => "PROJECT_APPROVED",
        Rejected => "PROJECT_REJECTED",
        Suspended => "PROJECT_SUSPENDED",
        Completed => "PROJECT_COMPLETED",
    }
    Financial(FinancialAction) => "FINANCIAL" {
        TopupRequested => "TOPUP_REQUESTED",
        TopupApproved => "TOPUP_APPROVED",
        TopupRejected => "TOPUP_REJECTED",
        InvestmentCreated => "INVESTMENT_CREATED",
        InvestmentApproved => "INVESTMENT_APPROVED",
        InvestmentRejected => "INVESTMENT_REJECTED",
        WithdrawalRequested => "WITHDRAWAL_REQUESTED",
        WithdrawalApproved => "WITHDRAWAL_APPROVED",
        PaymentProcessed => "PAYMENT_PROCESSED",
    }
    Admin(AdminAction) => "ADMIN" {
        AdminGranted => "ADMIN_GRANTED",
        AdminRevoked => "ADMIN_REVOKED",
        SettingsChanged => "SETTINGS_CHANGED",
        BulkAction => "BULK_ACTION",
        DataExport => "DATA_EXPORT",
        SecurityChange => "SECURITY_CHANGE",
    }
    System(SystemAction) => "SYSTEM" {
        MigrationRun => "MIGRATION_RUN",
        Backup => "BACKUP",
        SystemError => "SYSTEM_ERROR",
        Maintenance => "MAINTENANCE",
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

impl TryFrom<String> for AuditAction {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AuditAction> for String {
    fn from(action: AuditAction) -> Self {
        action.as_str().to_string()
    }
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditCategory {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownVariant(s.to_string()))
    }
}
