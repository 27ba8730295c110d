//! Principals, permissions and access-control evaluation for the alert rule ruler.
//!
//! This crate provides the authorization vocabulary used by the `ruler` crate:
//!
//! - **Principals**: The signed-in user with a basic [`OrgRole`] and resolved permissions
//! - **Permissions**: Action/scope pairs such as `datasources:query` on
//!   `datasources:uid:prom`
//! - **Evaluators**: Composable requirements checked against a principal
//! - **Access control**: A pluggable backend with a basic-role fallback for
//!   deployments where fine-grained access control is disabled
//!
//! # Example
//!
//! ```rust
//! use ruler_access::{
//!     datasource_scope, has_access, Evaluator, OrgRole, Permission, Principal,
//!     RbacAccessControl, RoleRequirement, ACTION_DATASOURCES_QUERY,
//! };
//!
//! let principal = Principal::new(1, 1, OrgRole::Editor)
//!     .with_permission(Permission::new(ACTION_DATASOURCES_QUERY, "datasources:*").unwrap());
//!
//! let requirement = Evaluator::permission(ACTION_DATASOURCES_QUERY, [datasource_scope("prom")]);
//! let ac = RbacAccessControl::new();
//!
//! assert!(has_access(&ac, &principal, RoleRequirement::OrgAdminOrEditor, &requirement));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod control;
pub mod error;
pub mod evaluator;
pub mod types;

pub use control::{
    has_access, AccessCheck, AccessControl, PrincipalAccess, RbacAccessControl, RoleRequirement,
};
pub use error::{AccessError, Result};
pub use evaluator::Evaluator;
pub use types::{
    datasource_scope, folder_scope, OrgRole, Permission, Principal, ACTION_ALERT_RULES_CREATE,
    ACTION_ALERT_RULES_DELETE, ACTION_ALERT_RULES_READ, ACTION_ALERT_RULES_WRITE,
    ACTION_DATASOURCES_QUERY, SCOPE_ALL,
};
