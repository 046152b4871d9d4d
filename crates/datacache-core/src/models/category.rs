use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Every kind of data the cache knows how to hold.
///
/// Each category carries its own TTL, may be related to other categories for
/// optimistic propagation, and may be allow-listed for persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Users,
    Roles,
    Permissions,
    Memberships,
    Organizations,
    Teams,
    Projects,
    Settings,
    Notifications,
    Analytics,
    AuditLogs,
    Profile,
}

impl Category {
    pub const ALL: [Category; 12] = [
        Category::Users,
        Category::Roles,
        Category::Permissions,
        Category::Memberships,
        Category::Organizations,
        Category::Teams,
        Category::Projects,
        Category::Settings,
        Category::Notifications,
        Category::Analytics,
        Category::AuditLogs,
        Category::Profile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Users => "users",
            Category::Roles => "roles",
            Category::Permissions => "permissions",
            Category::Memberships => "memberships",
            Category::Organizations => "organizations",
            Category::Teams => "teams",
            Category::Projects => "projects",
            Category::Settings => "settings",
            Category::Notifications => "notifications",
            Category::Analytics => "analytics",
            Category::AuditLogs => "audit_logs",
            Category::Profile => "profile",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownCategory(s.to_string()))
    }
}
