//! Access-control evaluation.
//!
//! This module provides:
//! - [`AccessControl`]: The pluggable access-control backend
//! - [`RbacAccessControl`]: Evaluation against a principal's resolved permissions
//! - [`AccessCheck`]: A capability check bound to one principal, injected into callers
//!   that must stay independent of how the principal was authenticated

use tracing::debug;

use crate::evaluator::Evaluator;
use crate::types::{OrgRole, Principal};

/// Basic-role requirement used when fine-grained access control is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleRequirement {
    /// Any member with at least the viewer role.
    Viewer,
    /// Editors and organization administrators.
    OrgAdminOrEditor,
}

impl RoleRequirement {
    /// Checks whether the role satisfies this requirement.
    #[must_use]
    pub fn is_satisfied_by(self, role: OrgRole) -> bool {
        match self {
            Self::Viewer => role.includes(OrgRole::Viewer),
            Self::OrgAdminOrEditor => role.includes(OrgRole::Editor),
        }
    }
}

/// An access-control backend.
pub trait AccessControl: Send + Sync {
    /// Evaluates the requirement for the principal.
    fn evaluate(&self, principal: &Principal, evaluator: &Evaluator) -> bool;

    /// Returns true if fine-grained access control is turned off.
    fn is_disabled(&self) -> bool;
}

/// Checks access, falling back to the basic role when fine-grained access control
/// is disabled.
#[must_use]
pub fn has_access(
    ac: &dyn AccessControl,
    principal: &Principal,
    fallback: RoleRequirement,
    evaluator: &Evaluator,
) -> bool {
    if ac.is_disabled() {
        return fallback.is_satisfied_by(principal.org_role);
    }
    ac.evaluate(principal, evaluator)
}

/// Access control that evaluates requirements against the principal's own permissions.
#[derive(Debug, Clone, Default)]
pub struct RbacAccessControl {
    disabled: bool,
}

impl RbacAccessControl {
    /// Creates an enabled access-control backend.
    #[must_use]
    pub const fn new() -> Self {
        Self { disabled: false }
    }

    /// Creates a backend with fine-grained access control turned off.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { disabled: true }
    }
}

impl AccessControl for RbacAccessControl {
    fn evaluate(&self, principal: &Principal, evaluator: &Evaluator) -> bool {
        let allowed = evaluator.evaluate(principal.permissions());
        if !allowed {
            debug!(
                user_id = principal.user_id,
                org_id = principal.org_id,
                requirement = %evaluator,
                "access denied"
            );
        }
        allowed
    }

    fn is_disabled(&self) -> bool {
        self.disabled
    }
}

/// A capability check already bound to a principal.
pub trait AccessCheck {
    /// Returns true if the requirement is satisfied.
    fn has_access(&self, evaluator: &Evaluator) -> bool;
}

impl<F> AccessCheck for F
where
    F: Fn(&Evaluator) -> bool,
{
    fn has_access(&self, evaluator: &Evaluator) -> bool {
        self(evaluator)
    }
}

/// [`AccessCheck`] for one principal against an [`AccessControl`] backend.
pub struct PrincipalAccess<'a> {
    ac: &'a dyn AccessControl,
    principal: &'a Principal,
    fallback: RoleRequirement,
}

impl<'a> PrincipalAccess<'a> {
    /// Binds a backend, a principal and the fallback role requirement.
    #[must_use]
    pub fn new(
        ac: &'a dyn AccessControl,
        principal: &'a Principal,
        fallback: RoleRequirement,
    ) -> Self {
        Self {
            ac,
            principal,
            fallback,
        }
    }
}

impl AccessCheck for PrincipalAccess<'_> {
    fn has_access(&self, evaluator: &Evaluator) -> bool {
        has_access(self.ac, self.principal, self.fallback, evaluator)
    }
}
