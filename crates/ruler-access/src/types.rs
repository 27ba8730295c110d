//! Core types for authorization.
//!
//! This module defines the fundamental types:
//! - [`OrgRole`]: The basic role a principal holds in an organization
//! - [`Permission`]: An action-scope pair granted to a principal
//! - [`Principal`]: The signed-in user a request is executed for

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AccessError, Result};

/// Query a data source.
pub const ACTION_DATASOURCES_QUERY: &str = "datasources:query";
/// Read alert rules in a folder.
pub const ACTION_ALERT_RULES_READ: &str = "alert.rules:read";
/// Create alert rules in a folder.
pub const ACTION_ALERT_RULES_CREATE: &str = "alert.rules:create";
/// Update alert rules in a folder.
pub const ACTION_ALERT_RULES_WRITE: &str = "alert.rules:write";
/// Delete alert rules from a folder.
pub const ACTION_ALERT_RULES_DELETE: &str = "alert.rules:delete";

/// Scope that matches every resource.
pub const SCOPE_ALL: &str = "*";

/// Returns the scope of a single data source.
#[must_use]
pub fn datasource_scope(uid: &str) -> String {
    format!("datasources:uid:{uid}")
}

/// Returns the scope of a single folder.
#[must_use]
pub fn folder_scope(uid: &str) -> String {
    format!("folders:uid:{uid}")
}

/// Basic organization role of a principal.
///
/// Roles are ordered: every role includes the capabilities of the roles before it.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum OrgRole {
    /// No basic role.
    #[default]
    None,
    /// Read-only member.
    Viewer,
    /// Member allowed to edit content.
    Editor,
    /// Organization administrator.
    Admin,
}

impl OrgRole {
    /// Returns the role as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Viewer => "viewer",
            Self::Editor => "editor",
            Self::Admin => "admin",
        }
    }

    /// Returns true if this role includes `other`.
    #[must_use]
    pub fn includes(self, other: Self) -> bool {
        self >= other
    }
}

impl fmt::Display for OrgRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrgRole {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "viewer" => Ok(Self::Viewer),
            "editor" => Ok(Self::Editor),
            "admin" => Ok(Self::Admin),
            _ => Err(AccessError::InvalidRole {
                reason: format!("unknown role: {s}"),
            }),
        }
    }
}

/// A permission allows an action on every resource matched by its scope.
///
/// Scopes are colon-separated paths (e.g. `datasources:uid:abc`). A trailing `*`
/// matches any suffix, so `datasources:*` grants the action on every data source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    /// The action allowed.
    pub action: String,
    /// The scope the action is allowed on. Empty means unscoped.
    pub scope: String,
}

impl Permission {
    /// Creates a new permission.
    ///
    /// # Errors
    ///
    /// Returns an error if the action is empty.
    pub fn new(action: impl Into<String>, scope: impl Into<String>) -> Result<Self> {
        let action = action.into();
        if action.is_empty() {
            return Err(AccessError::InvalidPermission {
                reason: "action cannot be empty".to_string(),
            });
        }
        Ok(Self {
            action,
            scope: scope.into(),
        })
    }

    /// Creates a permission for the action on every resource.
    #[must_use]
    pub fn wildcard(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            scope: SCOPE_ALL.to_string(),
        }
    }

    /// Checks if this permission allows the action on the given scope.
    #[must_use]
    pub fn matches(&self, action: &str, scope: &str) -> bool {
        if self.action != action {
            return false;
        }
        if self.scope.is_empty() || self.scope == scope {
            return true;
        }
        self.scope
            .strip_suffix('*')
            .is_some_and(|prefix| scope.starts_with(prefix))
    }

    /// Parses a permission from a string in the format `action=scope`.
    ///
    /// # Errors
    ///
    /// Returns an error if the format is invalid.
    pub fn parse(s: &str) -> Result<Self> {
        match s.split_once('=') {
            Some((action, scope)) => Self::new(action.trim(), scope.trim()),
            None => Err(AccessError::InvalidPermission {
                reason: format!("invalid format: expected 'action=scope', got '{s}'"),
            }),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.action, self.scope)
    }
}

/// The signed-in user a request runs on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Numeric user ID.
    pub user_id: i64,
    /// Organization the user is signed in to.
    pub org_id: i64,
    /// Login name, used for logging.
    pub login: String,
    /// Basic role in the organization.
    pub org_role: OrgRole,
    /// Resolved fine-grained permissions.
    permissions: Vec<Permission>,
}

impl Principal {
    /// Creates a principal without fine-grained permissions.
    #[must_use]
    pub fn new(user_id: i64, org_id: i64, org_role: OrgRole) -> Self {
        Self {
            user_id,
            org_id,
            login: format!("user-{user_id}"),
            org_role,
            permissions: Vec::new(),
        }
    }

    /// Sets the login name.
    #[must_use]
    pub fn with_login(mut self, login: impl Into<String>) -> Self {
        self.login = login.into();
        self
    }

    /// Adds a single permission.
    #[must_use]
    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.push(permission);
        self
    }

    /// Adds several permissions.
    #[must_use]
    pub fn with_permissions(mut self, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.permissions.extend(permissions);
        self
    }

    /// Returns the resolved permissions.
    #[must_use]
    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }

    /// Checks if any permission allows the action on the scope.
    #[must_use]
    pub fn has_permission(&self, action: &str, scope: &str) -> bool {
        self.permissions.iter().any(|p| p.matches(action, scope))
    }
}
