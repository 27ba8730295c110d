//! Error types for the access-control crate.

use thiserror::Error;

/// Errors that can occur while building principals and permissions.
#[derive(Debug, Error)]
pub enum AccessError {
    /// Invalid permission format.
    #[error("invalid permission: {reason}")]
    InvalidPermission {
        /// The reason the permission is invalid.
        reason: String,
    },

    /// Invalid organization role.
    #[error("invalid role: {reason}")]
    InvalidRole {
        /// The reason the role is invalid.
        reason: String,
    },
}

/// Result type for access-control operations.
pub type Result<T> = std::result::Result<T, AccessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_invalid_permission() {
        let err = AccessError::InvalidPermission {
            reason: "action cannot be empty".to_string(),
        };
        assert_eq!(err.to_string(), "invalid permission: action cannot be empty");
    }

    #[test]
    fn error_display_invalid_role() {
        let err = AccessError::InvalidRole {
            reason: "unknown role: owner".to_string(),
        };
        assert_eq!(err.to_string(), "invalid role: unknown role: owner");
    }
}
