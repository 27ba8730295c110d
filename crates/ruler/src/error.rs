//! Error types for the ruler crate.

use thiserror::Error;

/// Errors that can occur while reading or reconciling alert rules.
#[derive(Debug, Error)]
pub enum RulerError {
    /// A submitted rule UID does not exist in the organization.
    #[error("failed to update rule with UID {uid} because alert rule not found")]
    RuleNotFound {
        /// The UID that was not found.
        uid: String,
    },

    /// The namespace (folder) does not exist.
    #[error("folder not found: {title}")]
    NamespaceNotFound {
        /// The folder title that was looked up.
        title: String,
    },

    /// The principal may not use the namespace in the requested way.
    #[error("user does not have permissions to {action} folder '{title}'")]
    NamespaceAccessDenied {
        /// The folder title.
        title: String,
        /// `view` or `edit`.
        action: &'static str,
    },

    /// The submitted group or a rule in it is invalid.
    #[error("invalid alert rule: {reason}")]
    ValidationFailed {
        /// The reason validation failed.
        reason: String,
    },

    /// The change touches rules created through provisioning.
    #[error("request affects resources created via provisioning API: alert rule group [{groups}]")]
    ProvisionedResource {
        /// Comma-separated keys of the affected groups.
        groups: String,
    },

    /// The alert rule quota would be exceeded.
    #[error("quota has been exceeded")]
    QuotaReached,

    /// The principal lacks a required permission.
    #[error("user is not authorized {reason}")]
    Unauthorized {
        /// What the principal was not allowed to do.
        reason: String,
    },

    /// A row changed after it was read.
    #[error(
        "version conflict while updating alert rule {uid}: expected version {expected}, found {actual}"
    )]
    OptimisticLock {
        /// The rule whose version did not match.
        uid: String,
        /// Version the update was computed against.
        expected: i64,
        /// Version currently persisted.
        actual: i64,
    },

    /// The request was cancelled or its deadline passed.
    #[error("request cancelled")]
    Cancelled,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Store or transport failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for RulerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Externally observable class of a [`RulerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Rule or namespace absent.
    NotFound,
    /// Malformed input or provisioned resource conflict.
    ValidationFailed,
    /// Quota exceeded.
    QuotaReached,
    /// Missing capability.
    Unauthorized,
    /// Namespace not usable by the principal.
    Forbidden,
    /// Concurrent modification.
    Conflict,
    /// Request cancelled.
    Cancelled,
    /// Everything else.
    Internal,
}

impl ErrorKind {
    /// HTTP status the handler layer reports for this class.
    #[must_use]
    pub const fn status_code(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::ValidationFailed => 400,
            Self::QuotaReached | Self::Forbidden => 403,
            Self::Unauthorized => 401,
            Self::Conflict => 409,
            Self::Cancelled => 499,
            Self::Internal => 500,
        }
    }
}

impl RulerError {
    /// Returns the externally observable class of the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::RuleNotFound { .. } | Self::NamespaceNotFound { .. } => ErrorKind::NotFound,
            Self::ValidationFailed { .. } | Self::ProvisionedResource { .. } => {
                ErrorKind::ValidationFailed
            }
            Self::QuotaReached => ErrorKind::QuotaReached,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::NamespaceAccessDenied { .. } => ErrorKind::Forbidden,
            Self::OptimisticLock { .. } => ErrorKind::Conflict,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Serialization(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// HTTP status the handler layer reports for this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Self::ValidationFailed {
            reason: reason.into(),
        }
    }

    pub(crate) fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }
}

/// Result type for ruler operations.
pub type Result<T> = std::result::Result<T, RulerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn error_display_rule_not_found() {
        let err = RulerError::RuleNotFound {
            uid: "abc".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to update rule with UID abc because alert rule not found"
        );
    }

    #[test]
    fn error_display_provisioned_resource() {
        let err = RulerError::ProvisionedResource {
            groups: "{orgID: 1, namespaceUID: f, groupName: g}".to_string(),
        };
        assert!(err.to_string().contains("provisioning API"));
        assert!(err.to_string().contains("groupName: g"));
    }

    #[test]
    fn error_display_optimistic_lock() {
        let err = RulerError::OptimisticLock {
            uid: "r1".to_string(),
            expected: 2,
            actual: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("r1"));
        assert!(msg.contains("expected version 2"));
        assert!(msg.contains("found 3"));
    }

    #[test_case(RulerError::RuleNotFound { uid: "x".into() }, 404 ; "rule not found")]
    #[test_case(RulerError::NamespaceNotFound { title: "x".into() }, 404 ; "namespace not found")]
    #[test_case(RulerError::validation("bad"), 400 ; "validation")]
    #[test_case(RulerError::ProvisionedResource { groups: String::new() }, 400 ; "provisioned")]
    #[test_case(RulerError::QuotaReached, 403 ; "quota")]
    #[test_case(RulerError::unauthorized("to do it"), 401 ; "unauthorized")]
    #[test_case(RulerError::NamespaceAccessDenied { title: "x".into(), action: "edit" }, 403 ; "namespace denied")]
    #[test_case(RulerError::OptimisticLock { uid: "x".into(), expected: 1, actual: 2 }, 409 ; "optimistic lock")]
    #[test_case(RulerError::Internal("db".into()), 500 ; "internal")]
    fn error_status_codes(err: RulerError, status: u16) {
        assert_eq!(err.status_code(), status);
    }

    #[test]
    fn error_from_serde_json() {
        let json_err = serde_json::from_str::<String>("invalid json").unwrap_err();
        let err: RulerError = json_err.into();
        assert!(matches!(err, RulerError::Serialization(_)));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
